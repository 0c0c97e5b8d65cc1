//! Ordinal daemon: Unix-socket transport for list / save_order / migrate,
//! a serialized job queue for store writes, and the maintenance cadence.

mod auth;
mod error;
pub mod paths;
pub mod protocol;
mod rate_limit;
mod runtime;

pub use auth::authorize;
pub use error::DaemonError;
pub use protocol::{
    parse_ordered_ids, request_list, request_migrate, request_save_order, request_status,
    request_stop, send_request, ListItem, OrdinalRequest, OrdinalResponse, SaveOrderData,
};
pub use rate_limit::RateLimiter;
pub use runtime::{run, start_blocking, MaintenanceTimestamps};
