//! # ordinal-sync
//!
//! Ordering logic over an [`ordinal_core::OrderStore`].
//!
//! - [`reconcile`] folds the legacy ordinal into the primary ordinal.
//! - [`duplicates`] repairs primary-ordinal collisions.
//! - [`migration`] runs the legacy migration exactly once per collection.
//! - [`reorder`] validates and saves client-submitted orders.
//! - [`pipeline`] is the maintenance entrypoint shared by CLI and daemon.

pub mod duplicates;
pub mod error;
pub mod migration;
pub mod pass;
pub mod pipeline;
pub mod reconcile;
pub mod reorder;

pub use error::OrderingError;
pub use migration::{MigrationGate, MigrationOutcome};
pub use pass::{OrdinalChange, Pass, PassCounts};
pub use reorder::{ReorderService, SaveOutcome};
