//! Ordinal: keep a collection of records in one strict, duplicate-free order.
//!
//! # Usage
//!
//! ```text
//! ordinal init <collection>
//! ordinal record add <collection> <title> [--thumbnail URL] [--legacy N] [--draft]
//! ordinal record status <collection> <id> published|draft|trash
//! ordinal record remove <collection> <id>
//! ordinal list <collection> [--json]
//! ordinal reorder <collection> <id>...
//! ordinal migrate <collection> [--reset]
//! ordinal diff [<collection>]
//! ordinal status [--json]
//! ordinal daemon start|stop|status
//! ```
//!
//! `list`, `reorder`, `migrate` and `daemon stop` talk to the daemon and send
//! the token from `--token` or `ORDINAL_TOKEN`.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand, diff::DiffArgs, init::InitArgs, list::ListArgs,
    migrate::MigrateArgs, record::RecordCommand, reorder::ReorderArgs, status::StatusArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "ordinal",
    version,
    about = "Maintain a strict, duplicate-free order over record collections",
    long_about = None,
)]
struct Cli {
    /// Access token sent to the daemon.
    #[arg(long, global = true, env = "ORDINAL_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an empty collection.
    Init(InitArgs),

    /// Add, publish, unpublish, or remove records.
    Record {
        #[command(subcommand)]
        command: RecordCommand,
    },

    /// Show published records in display order (via the daemon).
    List(ListArgs),

    /// Save a new order for a collection (via the daemon).
    Reorder(ReorderArgs),

    /// Run the one-time legacy ordinal migration (via the daemon).
    Migrate(MigrateArgs),

    /// Preview what maintenance would change, without writing.
    Diff(DiffArgs),

    /// Show ordering health for every collection.
    Status(StatusArgs),

    /// Run or control the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let token = cli.token.as_deref();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Record { command } => commands::record::run(command),
        Commands::List(args) => args.run(token),
        Commands::Reorder(args) => args.run(token),
        Commands::Migrate(args) => args.run(token),
        Commands::Diff(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command, token),
    }
}
