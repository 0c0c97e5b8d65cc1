//! `ordinal status`: ordering health per collection, read from local files.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use ordinal_core::{
    store::{self, order_fingerprint},
    Collection, FileStore, FlagState, FlagStore,
};
use ordinal_sync::migration::LEGACY_SYNC_FLAG;

/// Arguments for `ordinal status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Serialize)]
struct CollectionStatus {
    name: String,
    revision: u64,
    records: usize,
    published: usize,
    /// Published records sharing an ordinal with an earlier one.
    duplicates: usize,
    /// Published records with neither ordinal set.
    unordered: usize,
    /// Records whose legacy ordinal disagrees with the primary one.
    divergent: usize,
    migrated: bool,
    migrated_at: Option<String>,
    fingerprint: String,
}

impl CollectionStatus {
    fn healthy(&self) -> bool {
        self.duplicates == 0 && self.unordered == 0 && self.divergent == 0
    }
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "collection")]
    name: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "published")]
    published: String,
    #[tabled(rename = "duplicates")]
    duplicates: usize,
    #[tabled(rename = "unordered")]
    unordered: usize,
    #[tabled(rename = "divergent")]
    divergent: usize,
    #[tabled(rename = "migrated")]
    migrated: String,
    #[tabled(rename = "order")]
    fingerprint: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let rows = build_report(&home)?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&rows).context("failed to serialize status JSON")?
            );
            return Ok(());
        }

        print_table(rows);
        Ok(())
    }
}

fn build_report(home: &Path) -> Result<Vec<CollectionStatus>> {
    let names = store::list_collections_at(home).context("failed to list collections")?;
    let mut rows = Vec::with_capacity(names.len());
    for name in names {
        let collection = FileStore::open_at(home, &name)
            .and_then(|s| s.load())
            .with_context(|| format!("failed to load collection '{name}'"))?;
        let migrated = FlagStore::at(home, &name)
            .state(LEGACY_SYNC_FLAG)
            .with_context(|| format!("failed to read migration flag for '{name}'"))?;
        rows.push(summarize(&collection, &migrated));
    }
    Ok(rows)
}

fn summarize(collection: &Collection, migrated: &FlagState) -> CollectionStatus {
    let published: Vec<_> = collection.ordered();
    let mut seen = HashSet::new();
    let duplicates = published
        .iter()
        .filter(|r| !seen.insert(r.primary_ordinal))
        .count();
    let unordered = published
        .iter()
        .filter(|r| r.primary_ordinal == 0 && r.legacy_ordinal.is_none())
        .count();
    let divergent = collection
        .records
        .iter()
        .filter(|r| r.legacy_ordinal.is_some_and(|l| l != r.primary_ordinal))
        .count();

    CollectionStatus {
        name: collection.name.0.clone(),
        revision: collection.revision,
        records: collection.records.len(),
        published: published.len(),
        duplicates,
        unordered,
        divergent,
        migrated: migrated.is_done(),
        migrated_at: match migrated {
            FlagState::Done { completed_at } => format_completed(*completed_at),
            FlagState::NotRun => None,
        },
        fingerprint: order_fingerprint(collection),
    }
}

fn format_completed(at: Option<DateTime<Utc>>) -> Option<String> {
    at.map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
}

fn print_table(rows: Vec<CollectionStatus>) {
    let issues = rows.iter().filter(|r| !r.healthy()).count();
    println!(
        "Ordinal v{} | {} collections | {} need maintenance",
        env!("CARGO_PKG_VERSION"),
        rows.len(),
        issues,
    );

    if rows.is_empty() {
        println!("No collections. Run: ordinal init <collection>");
        return;
    }

    let table_rows: Vec<StatusTableRow> = rows
        .into_iter()
        .map(|row| StatusTableRow {
            state: if row.healthy() {
                "OK".green().bold().to_string()
            } else {
                "NEEDS SYNC".yellow().bold().to_string()
            },
            published: format!("{}/{}", row.published, row.records),
            duplicates: row.duplicates,
            unordered: row.unordered,
            divergent: row.divergent,
            migrated: row.migrated_at.unwrap_or_else(|| {
                if row.migrated { "yes" } else { "no" }.to_string()
            }),
            fingerprint: row.fingerprint.chars().take(12).collect(),
            name: row.name,
        })
        .collect();
    let mut table = Table::new(table_rows);
    table.with(Style::rounded());
    println!("{table}");

    if issues > 0 {
        println!("Run 'ordinal diff' to preview the repair, or start the daemon to apply it.");
    }
}
