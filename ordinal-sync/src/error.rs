//! Error types for ordinal-sync.

use thiserror::Error;

use ordinal_core::{CollectionName, RecordId, StoreError};

/// All errors that can arise from ordering operations.
#[derive(Debug, Error)]
pub enum OrderingError {
    /// Malformed or invalid input; nothing was written.
    #[error("invalid order: {0}")]
    Validation(String),

    /// One or more referenced records are missing or not published.
    #[error("record(s) {} not found among published records of '{collection}'", format_ids(.ids))]
    NotFound {
        collection: CollectionName,
        ids: Vec<RecordId>,
    },

    /// An error from the record store. Any in-flight commit was rolled back.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl OrderingError {
    /// Whether the same request may succeed if simply sent again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrderingError::Store(StoreError::Locked { .. } | StoreError::Conflict { .. })
        )
    }
}

fn format_ids(ids: &[RecordId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
