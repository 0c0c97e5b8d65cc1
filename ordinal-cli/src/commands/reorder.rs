//! `ordinal reorder <collection> <id>...`

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use ordinal_core::RecordId;
use ordinal_daemon::request_save_order;

/// Position `i` in the list becomes ordinal `i`; unlisted records keep theirs.
#[derive(Args, Debug)]
pub struct ReorderArgs {
    pub collection: String,

    /// Record ids in their new display order.
    #[arg(required = true, num_args = 1..)]
    pub ids: Vec<u64>,
}

impl ReorderArgs {
    pub fn run(self, token: Option<&str>) -> Result<()> {
        let home = super::home()?;
        let ids: Vec<RecordId> = self.ids.iter().copied().map(RecordId).collect();
        let saved = request_save_order(&home, token, &self.collection, &ids)
            .map_err(|err| super::daemon_context(err, "reorder"))?;

        match saved.warning {
            Some(warning) => println!("{} {warning}", "!".yellow().bold()),
            None => println!(
                "✓ Saved order of {} record(s) in '{}'",
                saved.updated_count, self.collection
            ),
        }
        Ok(())
    }
}
