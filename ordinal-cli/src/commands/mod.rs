pub mod daemon;
pub mod diff;
pub mod init;
pub mod list;
pub mod migrate;
pub mod record;
pub mod reorder;
pub mod status;

use std::path::PathBuf;

use anyhow::{Context, Result};

use ordinal_daemon::DaemonError;

pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Attach a hint when the daemon is not reachable.
pub(crate) fn daemon_context(err: DaemonError, action: &str) -> anyhow::Error {
    let hint = match &err {
        DaemonError::DaemonNotRunning { .. } => " (start it with `ordinal daemon start`)",
        DaemonError::Remote { code: 403, .. } => " (check --token or ORDINAL_TOKEN)",
        _ => "",
    };
    anyhow::Error::new(err).context(format!("{action} failed{hint}"))
}
