//! `ordinal record add|status|remove`

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use ordinal_core::{
    CollectionName, FileStore, NewRecord, Ordinal, RecordId, RecordStatus, MAX_ORDINAL,
};

/// Manage the records of a collection.
#[derive(Subcommand, Debug)]
pub enum RecordCommand {
    /// Add a record. New records are published unless `--draft` is given.
    Add(AddArgs),

    /// Change a record's status.
    Status(StatusArgs),

    /// Delete a record. Its id is never reused.
    Remove(RemoveArgs),
}

#[derive(Args, Debug)]
pub struct AddArgs {
    pub collection: String,

    pub title: String,

    /// Thumbnail URL shown in listings.
    #[arg(long)]
    pub thumbnail: Option<String>,

    /// Historical ordinal carried over from an older system.
    #[arg(
        long,
        allow_negative_numbers = true,
        value_parser = clap::value_parser!(i64).range(-MAX_ORDINAL..=MAX_ORDINAL)
    )]
    pub legacy: Option<Ordinal>,

    /// Create the record as a draft.
    #[arg(long)]
    pub draft: bool,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    pub collection: String,

    pub id: u64,

    /// published | draft | trash
    pub status: RecordStatus,
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    pub collection: String,

    pub id: u64,
}

pub fn run(cmd: RecordCommand) -> Result<()> {
    match cmd {
        RecordCommand::Add(args) => add(args),
        RecordCommand::Status(args) => set_status(args),
        RecordCommand::Remove(args) => remove(args),
    }
}

fn open(collection: &str) -> Result<FileStore> {
    let home = super::home()?;
    let name = CollectionName::from(collection);
    FileStore::open_at(&home, &name)
        .with_context(|| format!("cannot open collection '{name}'; run `ordinal init {name}` first"))
}

fn add(args: AddArgs) -> Result<()> {
    let store = open(&args.collection)?;
    let record = store
        .insert(NewRecord {
            title: args.title,
            status: if args.draft {
                RecordStatus::Draft
            } else {
                RecordStatus::Published
            },
            legacy_ordinal: args.legacy,
            thumbnail_url: args.thumbnail,
        })
        .context("failed to add record")?;

    println!(
        "✓ Added record {} '{}' ({}) to '{}'",
        record.id, record.title, record.status, args.collection
    );
    Ok(())
}

fn set_status(args: StatusArgs) -> Result<()> {
    let store = open(&args.collection)?;
    store
        .set_status(RecordId(args.id), args.status)
        .with_context(|| format!("failed to update record {}", args.id))?;
    println!("✓ Record {} is now {}", args.id, args.status);
    Ok(())
}

fn remove(args: RemoveArgs) -> Result<()> {
    let store = open(&args.collection)?;
    store
        .remove(RecordId(args.id))
        .with_context(|| format!("failed to remove record {}", args.id))?;
    println!("✓ Removed record {} from '{}'", args.id, args.collection);
    Ok(())
}
