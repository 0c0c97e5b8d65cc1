//! Client-driven reorder: replace the sequence for a list of records.
//!
//! Position `i` in the submitted list becomes primary ordinal `i` (0-based),
//! mirrored into the legacy ordinal. The list is validated in full before
//! anything is written, and all writes land in a single commit.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use ordinal_core::{Batch, Ordinal, OrderStore, Record, RecordId};

use crate::error::OrderingError;

/// Result of a successful save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveOutcome {
    pub requested: usize,
    pub updated: usize,
    pub revision: u64,
    /// Records that disappeared or were unpublished between validation and commit.
    pub skipped: Vec<RecordId>,
}

impl SaveOutcome {
    pub fn is_partial(&self) -> bool {
        self.updated < self.requested
    }

    /// Human-readable partial-success warning, if any.
    pub fn warning(&self) -> Option<String> {
        self.is_partial().then(|| {
            format!(
                "only {} of {} records were updated; reload the order",
                self.updated, self.requested
            )
        })
    }
}

/// Validates and persists submitted orders for one store.
pub struct ReorderService<'a, S: OrderStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: OrderStore + ?Sized> ReorderService<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Published records in display order (primary ordinal, then identity).
    pub fn listing(&self) -> Result<Vec<Record>, OrderingError> {
        let mut records = self.store.snapshot()?.published();
        records.sort_by_key(|r| (r.primary_ordinal, r.id));
        Ok(records)
    }

    /// Persist `ordered_ids` as the new sequence, all or nothing.
    pub fn save_order(&self, ordered_ids: &[RecordId]) -> Result<SaveOutcome, OrderingError> {
        validate_shape(ordered_ids)?;

        let snapshot = self.store.snapshot()?;
        let published: HashMap<RecordId, &Record> = snapshot
            .records
            .iter()
            .filter(|r| r.is_published())
            .map(|r| (r.id, r))
            .collect();
        let missing: Vec<RecordId> = ordered_ids
            .iter()
            .filter(|id| !published.contains_key(id))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(OrderingError::NotFound {
                collection: self.store.collection().clone(),
                ids: missing,
            });
        }

        let mut batch = Batch::new().published_only();
        for (position, id) in ordered_ids.iter().enumerate() {
            batch.set_both(*id, position as Ordinal);
        }
        let report = self.store.commit(batch)?;

        let outcome = SaveOutcome {
            requested: ordered_ids.len(),
            updated: report.applied,
            revision: report.revision,
            skipped: report.skipped,
        };
        if let Some(warning) = outcome.warning() {
            tracing::warn!("'{}': {warning}", self.store.collection());
        } else {
            tracing::info!(
                "saved order of {} record(s) in '{}' (revision {})",
                outcome.updated,
                self.store.collection(),
                outcome.revision
            );
        }
        Ok(outcome)
    }
}

fn validate_shape(ordered_ids: &[RecordId]) -> Result<(), OrderingError> {
    if ordered_ids.is_empty() {
        return Err(OrderingError::Validation(
            "ordered id list must not be empty".to_string(),
        ));
    }
    if let Some(id) = ordered_ids.iter().find(|id| id.0 == 0) {
        return Err(OrderingError::Validation(format!(
            "record id must be positive, got {id}"
        )));
    }
    let mut seen = HashSet::with_capacity(ordered_ids.len());
    for id in ordered_ids {
        if !seen.insert(id) {
            return Err(OrderingError::Validation(format!(
                "record {id} appears more than once"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordinal_core::{
        CollectionName, CommitReport, FileStore, NewRecord, RecordStatus, Snapshot, StoreError,
    };
    use tempfile::TempDir;

    fn seeded(home: &std::path::Path) -> FileStore {
        let store = FileStore::init_at(home, &CollectionName::from("gallery")).unwrap();
        for title in ["one", "two", "three"] {
            store
                .insert(NewRecord {
                    title: title.into(),
                    ..NewRecord::default()
                })
                .unwrap();
        }
        store
    }

    #[test]
    fn positions_become_zero_based_ordinals() {
        let home = TempDir::new().unwrap();
        let store = seeded(home.path());
        let service = ReorderService::new(&store);

        let outcome = service
            .save_order(&[RecordId(3), RecordId(1), RecordId(2)])
            .unwrap();
        assert_eq!(outcome.updated, 3);
        assert!(outcome.warning().is_none());

        let c = store.load().unwrap();
        for (id, expected) in [(3, 0), (1, 1), (2, 2)] {
            let r = c.get(RecordId(id)).unwrap();
            assert_eq!(r.primary_ordinal, expected);
            assert_eq!(r.legacy_ordinal, Some(expected));
        }
        let listed: Vec<u64> = service.listing().unwrap().iter().map(|r| r.id.0).collect();
        assert_eq!(listed, vec![3, 1, 2]);
    }

    #[test]
    fn unknown_id_rejects_whole_call() {
        let home = TempDir::new().unwrap();
        let store = seeded(home.path());
        let before = store.load().unwrap();

        let err = ReorderService::new(&store)
            .save_order(&[RecordId(1), RecordId(999999)])
            .unwrap_err();
        match err {
            OrderingError::NotFound { ids, .. } => assert_eq!(ids, vec![RecordId(999999)]),
            other => panic!("expected NotFound, got {other}"),
        }
        assert_eq!(store.load().unwrap(), before);
    }

    #[test]
    fn unpublished_record_counts_as_missing() {
        let home = TempDir::new().unwrap();
        let store = seeded(home.path());
        store.set_status(RecordId(2), RecordStatus::Draft).unwrap();
        let err = ReorderService::new(&store)
            .save_order(&[RecordId(2), RecordId(1)])
            .unwrap_err();
        assert!(matches!(err, OrderingError::NotFound { .. }));
    }

    #[test]
    fn shape_errors_are_validation_errors() {
        let home = TempDir::new().unwrap();
        let store = seeded(home.path());
        let service = ReorderService::new(&store);
        for ids in [
            vec![],
            vec![RecordId(0), RecordId(1)],
            vec![RecordId(1), RecordId(2), RecordId(1)],
        ] {
            let err = service.save_order(&ids).unwrap_err();
            assert!(matches!(err, OrderingError::Validation(_)), "{ids:?}: {err}");
        }
    }

    /// Deletes one record right before delegating each commit.
    struct VanishingStore {
        inner: FileStore,
        vanish: RecordId,
    }

    impl OrderStore for VanishingStore {
        fn collection(&self) -> &CollectionName {
            self.inner.collection()
        }

        fn list(&self, status: RecordStatus) -> Result<Vec<Record>, StoreError> {
            self.inner.list(status)
        }

        fn snapshot(&self) -> Result<Snapshot, StoreError> {
            self.inner.snapshot()
        }

        fn commit(&self, batch: Batch) -> Result<CommitReport, StoreError> {
            self.inner.remove(self.vanish)?;
            self.inner.commit(batch)
        }
    }

    #[test]
    fn record_deleted_before_commit_yields_partial_save_with_warning() {
        let home = TempDir::new().unwrap();
        let store = VanishingStore {
            inner: seeded(home.path()),
            vanish: RecordId(1),
        };

        let outcome = ReorderService::new(&store)
            .save_order(&[RecordId(3), RecordId(1), RecordId(2)])
            .unwrap();
        assert_eq!(outcome.requested, 3);
        assert_eq!(outcome.updated, 2);
        assert!(outcome.is_partial());
        assert_eq!(outcome.skipped, vec![RecordId(1)]);
        assert!(outcome.warning().unwrap().contains("2 of 3"));

        let c = store.inner.load().unwrap();
        assert!(c.get(RecordId(1)).is_none());
        for (id, position) in [(3, 0), (2, 2)] {
            let r = c.get(RecordId(id)).unwrap();
            assert_eq!((r.primary_ordinal, r.legacy_ordinal), (position, Some(position)));
        }
    }
}
