//! Ordinal core library: domain types, the record store, flags, config, errors.
//!
//! - [`types`]: newtypes and domain structs
//! - [`error`]: [`StoreError`]
//! - [`store`]: [`OrderStore`] and the YAML-backed [`FileStore`]
//! - [`flags`]: one-shot and time-boxed persisted flags
//! - [`config`]: `~/.ordinal/config.yaml`

pub mod config;
pub mod error;
pub mod flags;
pub mod store;
pub mod types;

pub use config::{Capability, OrdinalConfig, TokenGrant};
pub use error::StoreError;
pub use flags::{Claim, FlagState, FlagStore};
pub use store::{Batch, CommitReport, FileStore, NewRecord, OrderStore, Snapshot};
pub use types::{
    ordinal_in_range, Collection, CollectionName, Ordinal, Record, RecordId, RecordStatus,
    MAX_ORDINAL,
};
