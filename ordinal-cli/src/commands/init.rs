//! `ordinal init <collection>`

use anyhow::{Context, Result};
use clap::Args;

use ordinal_core::{CollectionName, FileStore};

/// Create an empty collection.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Collection name (letters, digits, `-` and `_`). Creates
    /// ~/.ordinal/collections/<collection>.yaml
    pub collection: String,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let name = CollectionName::from(self.collection.as_str());
        let store = FileStore::init_at(&home, &name)
            .with_context(|| format!("failed to init collection '{name}'"))?;

        println!("✓ Collection '{name}' ready");
        println!("  Saved to: {}", store.path().display());
        Ok(())
    }
}
