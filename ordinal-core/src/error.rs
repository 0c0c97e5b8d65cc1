//! Error types for ordinal-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{CollectionName, RecordId};

/// All errors that can arise from store, flag, and config operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure, with the path it happened at.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON error on the flag files.
    #[error("flag JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parse error on load; includes file path and line context from serde_yaml.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`; cannot locate `~/.ordinal/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The collection file did not exist at the expected path.
    #[error("collection '{name}' not found at {path}")]
    CollectionNotFound { name: CollectionName, path: PathBuf },

    /// A single-record update referenced a record that does not exist.
    #[error("record {id} not found in collection '{collection}'")]
    RecordNotFound {
        collection: CollectionName,
        id: RecordId,
    },

    /// Another writer holds the collection lock.
    #[error("collection '{collection}' is locked by another writer ({path})")]
    Locked {
        collection: CollectionName,
        path: PathBuf,
    },

    /// Compare-and-swap commit found a newer revision on disk.
    #[error("collection '{collection}' changed concurrently (expected revision {expected}, found {found})")]
    Conflict {
        collection: CollectionName,
        expected: u64,
        found: u64,
    },

    /// An ordinal outside `-MAX_ORDINAL..=MAX_ORDINAL`; nothing was written.
    #[error("ordinal {value} is out of range (limit ±{})", crate::types::MAX_ORDINAL)]
    OrdinalOutOfRange { value: crate::types::Ordinal },

    /// Collection names become file names; reject anything path-like.
    #[error("invalid collection name '{0}'")]
    InvalidName(String),
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
