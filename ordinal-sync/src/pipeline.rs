//! Shared maintenance entrypoint used by CLI and daemon.
//!
//! [`run`] reconciles unconditionally (the CLI `diff` preview uses it with
//! `dry_run`). [`run_if_due`] is the daemon's cadence: it skips collections
//! whose time-boxed maintenance flag is still fresh, and treats per-collection
//! failures as log lines rather than errors.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};

use ordinal_core::{store, CollectionName, FileStore, FlagStore};

use crate::error::OrderingError;
use crate::pass::Pass;
use crate::reconcile;

/// Time-boxed flag bounding how often the cadence re-syncs a collection.
pub const MAINTENANCE_FLAG: &str = "maintenance_sync";

/// Scope for a maintenance run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaintenanceScope {
    /// Every collection under the home directory.
    All,
    /// A single named collection.
    Collection(CollectionName),
}

fn collections(home: &Path, scope: &MaintenanceScope) -> Result<Vec<CollectionName>, OrderingError> {
    Ok(match scope {
        MaintenanceScope::All => store::list_collections_at(home)?,
        MaintenanceScope::Collection(name) => vec![name.clone()],
    })
}

/// Reconcile + resolve duplicates for every collection in `scope`.
pub fn run(home: &Path, scope: MaintenanceScope, dry_run: bool) -> Result<Vec<Pass>, OrderingError> {
    let mut passes = Vec::new();
    for name in collections(home, &scope)? {
        let store = FileStore::open_at(home, &name)?;
        passes.push(reconcile::run(&store, dry_run)?);
    }
    Ok(passes)
}

/// Cadence entrypoint: reconcile collections whose maintenance flag expired.
///
/// Never fails on a single collection; errors are logged and that collection
/// is retried on the next tick (its flag is left stale).
pub fn run_if_due(
    home: &Path,
    scope: MaintenanceScope,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<Vec<Pass>, OrderingError> {
    let mut passes = Vec::new();
    for name in collections(home, &scope)? {
        let flags = FlagStore::at(home, &name);
        match flags.is_fresh(MAINTENANCE_FLAG, now) {
            Ok(true) => continue,
            Ok(false) => {}
            Err(err) => {
                tracing::warn!("cannot read maintenance flag for '{name}': {err}");
                continue;
            }
        }

        let result = FileStore::open_at(home, &name)
            .map_err(OrderingError::from)
            .and_then(|store| reconcile::run(&store, false));
        match result {
            Ok(pass) => {
                if let Err(err) = flags.mark_fresh(MAINTENANCE_FLAG, now, ttl) {
                    tracing::warn!("cannot mark maintenance fresh for '{name}': {err}");
                }
                passes.push(pass);
            }
            Err(err) => tracing::error!("maintenance of '{name}' failed: {err}"),
        }
    }
    Ok(passes)
}

#[cfg(test)]
mod tests {
    use ordinal_core::{NewRecord, OrderStore, RecordId};
    use tempfile::TempDir;

    use super::*;

    fn seed(home: &Path, name: &str, primaries: &[i64]) -> FileStore {
        let store = FileStore::init_at(home, &CollectionName::from(name)).unwrap();
        for (i, p) in primaries.iter().enumerate() {
            let record = store
                .insert(NewRecord {
                    title: format!("{name}-{i}"),
                    ..NewRecord::default()
                })
                .unwrap();
            store.set_primary_ordinal(record.id, *p).unwrap();
        }
        store
    }

    #[test]
    fn run_all_empty_home_returns_empty_vec() {
        let home = TempDir::new().expect("home");
        let result = run(home.path(), MaintenanceScope::All, true).expect("run");
        assert!(result.is_empty());
    }

    #[test]
    fn dry_run_reports_without_writing() {
        let home = TempDir::new().expect("home");
        let store = seed(home.path(), "gallery", &[1, 1]);
        let before = store.load().unwrap();

        let passes = run(
            home.path(),
            MaintenanceScope::Collection(CollectionName::from("gallery")),
            true,
        )
        .expect("run");
        assert_eq!(passes.len(), 1);
        assert!(!passes[0].committed);
        assert_eq!(passes[0].changes.len(), 1);
        assert_eq!(passes[0].changes[0].id, RecordId(2));
        assert_eq!(store.load().unwrap(), before);
    }

    #[test]
    fn fresh_flag_skips_collection_until_ttl_expires() {
        let _ = env_logger::builder().is_test(true).try_init();
        let home = TempDir::new().expect("home");
        let store = seed(home.path(), "gallery", &[4, 4]);
        let now = Utc::now();
        let ttl = Duration::from_secs(3600);

        let first = run_if_due(home.path(), MaintenanceScope::All, now, ttl).unwrap();
        assert_eq!(first.len(), 1);
        assert!(first[0].committed);

        // A divergence introduced inside the TTL window waits for the next one.
        store.set_primary_ordinal(RecordId(2), 4).unwrap();
        let skipped = run_if_due(home.path(), MaintenanceScope::All, now, ttl).unwrap();
        assert!(skipped.is_empty());

        let later = now + chrono::Duration::hours(2);
        let second = run_if_due(home.path(), MaintenanceScope::All, later, ttl).unwrap();
        assert_eq!(second.len(), 1);
        assert!(second[0].committed);
    }

    #[test]
    fn corrupt_collection_does_not_block_others() {
        let home = TempDir::new().expect("home");
        let bad = seed(home.path(), "broken", &[]);
        std::fs::write(bad.path(), "records: [unclosed").unwrap();
        seed(home.path(), "gallery", &[2, 2]);

        let passes =
            run_if_due(home.path(), MaintenanceScope::All, Utc::now(), Duration::from_secs(60))
                .unwrap();
        assert_eq!(passes.len(), 1);
        assert_eq!(passes[0].collection, "gallery");
    }

    #[test]
    fn ordinal_overflow_is_logged_and_other_collections_proceed() {
        let _ = env_logger::builder().is_test(true).try_init();
        let home = TempDir::new().expect("home");
        let edge = FileStore::init_at(home.path(), &CollectionName::from("edge")).unwrap();
        for legacy in [Some(4_242_424_242), None] {
            edge.insert(NewRecord {
                title: "edge".into(),
                legacy_ordinal: legacy,
                ..NewRecord::default()
            })
            .unwrap();
        }
        // Values this large only arrive through a hand-edited file.
        let yaml = std::fs::read_to_string(edge.path()).unwrap();
        std::fs::write(edge.path(), yaml.replace("4242424242", &i64::MAX.to_string())).unwrap();
        let before = std::fs::read(edge.path()).unwrap();
        seed(home.path(), "gallery", &[3, 3]);

        let passes =
            run_if_due(home.path(), MaintenanceScope::All, Utc::now(), Duration::from_secs(60))
                .unwrap();
        assert_eq!(passes.len(), 1);
        assert_eq!(passes[0].collection, "gallery");
        assert_eq!(std::fs::read(edge.path()).unwrap(), before);
        assert!(!FlagStore::at(home.path(), &CollectionName::from("edge"))
            .is_fresh(MAINTENANCE_FLAG, Utc::now())
            .unwrap());
    }
}
