//! `ordinal daemon`: foreground runtime and socket control.

use anyhow::{Context, Result};
use clap::Subcommand;

use ordinal_daemon::paths::socket_path;
use ordinal_daemon::{request_status, request_stop, start_blocking, DaemonError};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (socket server + maintenance cadence).
    Start,
    /// Request graceful shutdown (needs an administer token).
    Stop,
    /// Query daemon runtime status over the Unix socket.
    Status,
}

pub fn run(command: DaemonCommand, token: Option<&str>) -> Result<()> {
    let home = super::home()?;

    match command {
        DaemonCommand::Start => {
            start_blocking(&home).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(&home, token) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(super::daemon_context(err, "daemon stop")),
        },
        DaemonCommand::Status => {
            let payload = match request_status(&home) {
                Ok(status) => status,
                Err(DaemonError::DaemonNotRunning { .. }) => serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                }),
                Err(err) => return Err(err).context("failed to query daemon status"),
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload)
                    .context("failed to render daemon status JSON")?
            );
        }
    }

    Ok(())
}
