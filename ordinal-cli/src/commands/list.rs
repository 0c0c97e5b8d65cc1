//! `ordinal list <collection>`: the published order, as the daemon serves it.

use anyhow::{Context, Result};
use clap::Args;
use tabled::{settings::Style, Table, Tabled};

use ordinal_daemon::request_list;

#[derive(Args, Debug)]
pub struct ListArgs {
    pub collection: String,

    /// Emit the raw list response as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct ListRow {
    #[tabled(rename = "#")]
    position: usize,
    #[tabled(rename = "id")]
    id: u64,
    #[tabled(rename = "title")]
    title: String,
    #[tabled(rename = "ordinal")]
    ordinal: i64,
    #[tabled(rename = "thumbnail")]
    thumbnail: String,
}

impl ListArgs {
    pub fn run(self, token: Option<&str>) -> Result<()> {
        let home = super::home()?;
        let items = request_list(&home, token, &self.collection)
            .map_err(|err| super::daemon_context(err, "list"))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&items).context("failed to serialize list JSON")?
            );
            return Ok(());
        }

        if items.is_empty() {
            println!("No published records in '{}'.", self.collection);
            return Ok(());
        }

        let rows: Vec<ListRow> = items
            .into_iter()
            .enumerate()
            .map(|(position, item)| ListRow {
                position,
                id: item.id.0,
                title: item.title,
                ordinal: item.primary_ordinal,
                thumbnail: item.thumbnail_url.unwrap_or_else(|| "-".to_string()),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
