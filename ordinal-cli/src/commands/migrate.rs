//! `ordinal migrate <collection> [--reset]`

use anyhow::{Context, Result};
use clap::Args;
use serde_json::Value;

use ordinal_core::{CollectionName, FileStore};
use ordinal_daemon::request_migrate;
use ordinal_sync::MigrationGate;

#[derive(Args, Debug)]
pub struct MigrateArgs {
    pub collection: String,

    /// Forget that the migration ran so the next trigger runs it again.
    /// Works on local files; the daemon is not contacted.
    #[arg(long)]
    pub reset: bool,
}

impl MigrateArgs {
    pub fn run(self, token: Option<&str>) -> Result<()> {
        let home = super::home()?;

        if self.reset {
            let name = CollectionName::from(self.collection.as_str());
            let store = FileStore::open_at(&home, &name)
                .with_context(|| format!("cannot open collection '{name}'"))?;
            let existed = MigrationGate::new(&home, &store)
                .reset()
                .context("failed to reset migration flag")?;
            if existed {
                println!("✓ Migration flag for '{name}' reset");
            } else {
                println!("Migration for '{name}' has not run yet; nothing to reset.");
            }
            return Ok(());
        }

        let data = request_migrate(&home, token, &self.collection)
            .map_err(|err| super::daemon_context(err, "migrate"))?;
        println!("{}", describe(&self.collection, &data));
        Ok(())
    }
}

fn describe(collection: &str, data: &Value) -> String {
    match data["outcome"].as_str() {
        Some("ran") => {
            let pass = &data["pass"];
            format!(
                "✓ Migrated '{collection}': {} reconciled, {} deduplicated, {} backfilled",
                pass["counts"]["reconciled"],
                pass["counts"]["deduplicated"],
                pass["counts"]["backfilled"]
            )
        }
        Some("already_done") => format!("Migration for '{collection}' already completed."),
        Some("in_progress") => format!("Migration for '{collection}' is running elsewhere."),
        _ => format!("Unexpected migrate response: {data}"),
    }
}
