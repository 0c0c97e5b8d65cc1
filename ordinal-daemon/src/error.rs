use std::path::PathBuf;

use thiserror::Error;

use ordinal_core::StoreError;
use ordinal_sync::OrderingError;

/// Error surface for the daemon runtime, its wire protocol, and its clients.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ordering(#[from] OrderingError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    /// The blocking task running a job panicked or was cancelled.
    #[error("{job} job aborted: {reason}")]
    JobAborted { job: &'static str, reason: String },

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("rate limit exceeded for '{caller}'; retry in {retry_after_secs}s")]
    RateLimited { caller: String, retry_after_secs: u64 },

    #[error("invalid request: {0}")]
    Validation(String),

    /// An error response received from the daemon by a client.
    #[error("daemon returned {code}: {message}")]
    Remote { code: u16, message: String },
}

impl DaemonError {
    /// HTTP-style status code carried in the response `code` field.
    pub fn status_code(&self) -> u16 {
        match self {
            DaemonError::Validation(_) | DaemonError::Json(_) => 400,
            DaemonError::Permission(_) => 403,
            DaemonError::RateLimited { .. } => 429,
            DaemonError::Remote { code, .. } => *code,
            DaemonError::Store(err) => store_code(err),
            DaemonError::Ordering(err) => match err {
                OrderingError::Validation(_) => 400,
                OrderingError::NotFound { .. } => 404,
                OrderingError::Store(err) => store_code(err),
            },
            _ => 500,
        }
    }
}

fn store_code(err: &StoreError) -> u16 {
    match err {
        StoreError::CollectionNotFound { .. } | StoreError::RecordNotFound { .. } => 404,
        StoreError::Locked { .. } | StoreError::Conflict { .. } => 409,
        StoreError::InvalidName(_) | StoreError::OrdinalOutOfRange { .. } => 400,
        _ => 500,
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
