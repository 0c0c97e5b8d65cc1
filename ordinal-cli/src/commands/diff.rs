//! `ordinal diff [<collection>]`: dry-run maintenance preview.

use anyhow::{Context, Result};
use clap::Args;
use tabled::{settings::Style, Table, Tabled};

use ordinal_core::CollectionName;
use ordinal_sync::pipeline::{self, MaintenanceScope};

#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Collection to preview; every collection when omitted.
    pub collection: Option<String>,
}

#[derive(Tabled)]
struct ChangeRow {
    #[tabled(rename = "id")]
    id: u64,
    #[tabled(rename = "title")]
    title: String,
    #[tabled(rename = "ordinal")]
    primary: String,
    #[tabled(rename = "legacy")]
    legacy: String,
}

impl DiffArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let scope = match self.collection {
            Some(name) => MaintenanceScope::Collection(CollectionName::from(name)),
            None => MaintenanceScope::All,
        };

        let passes = pipeline::run(&home, scope, true).context("maintenance preview failed")?;
        if passes.is_empty() {
            println!("No collections.");
            return Ok(());
        }

        for pass in passes {
            if pass.changes.is_empty() {
                println!("No differences for '{}'.", pass.collection);
                continue;
            }
            println!(
                "'{}': {} change(s) ({} reconciled, {} deduplicated)",
                pass.collection,
                pass.changes.len(),
                pass.counts.reconciled,
                pass.counts.deduplicated
            );
            let rows: Vec<ChangeRow> = pass
                .changes
                .into_iter()
                .map(|c| ChangeRow {
                    id: c.id.0,
                    title: c.title,
                    primary: arrow(Some(c.from_primary), Some(c.to_primary)),
                    legacy: arrow(c.from_legacy, c.to_legacy),
                })
                .collect();
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        }
        Ok(())
    }
}

fn arrow(from: Option<i64>, to: Option<i64>) -> String {
    let show = |v: Option<i64>| v.map_or_else(|| "-".to_string(), |v| v.to_string());
    if from == to {
        show(from)
    } else {
        format!("{} -> {}", show(from), show(to))
    }
}
