//! Planning and committing a maintenance pass.
//!
//! A pass reads a snapshot, rewrites the published records in memory, diffs
//! the result against the snapshot, and commits the diff as one batch pinned
//! to the snapshot's revision. A concurrent commit between read and write
//! surfaces as a conflict; the pass is then re-planned from a fresh snapshot,
//! up to [`MAX_CONFLICT_RETRIES`] times.

use std::collections::HashMap;

use serde::Serialize;

use ordinal_core::{Batch, CollectionName, Ordinal, OrderStore, Record, RecordId, StoreError};

use crate::error::OrderingError;

pub const MAX_CONFLICT_RETRIES: usize = 3;

/// One record's ordinal change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrdinalChange {
    pub id: RecordId,
    pub title: String,
    pub from_primary: Ordinal,
    pub to_primary: Ordinal,
    pub from_legacy: Option<Ordinal>,
    pub to_legacy: Option<Ordinal>,
}

/// Per-step counters reported by a planner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassCounts {
    /// Records whose primary ordinal was taken from, or backfilled into, the legacy value.
    pub reconciled: usize,
    /// Records moved by the duplicate sweep.
    pub deduplicated: usize,
    /// Records whose legacy value was backfilled from the primary.
    pub backfilled: usize,
}

/// Outcome of one pass over a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pass {
    pub collection: String,
    /// Revision after the pass (unchanged when nothing was written).
    pub revision: u64,
    pub counts: PassCounts,
    pub changes: Vec<OrdinalChange>,
    /// False for dry runs and for passes that found nothing to change.
    pub committed: bool,
}

/// Diff two views of the same records, matched by identity.
pub fn changes(before: &[Record], after: &[Record]) -> Vec<OrdinalChange> {
    let original: HashMap<RecordId, &Record> = before.iter().map(|r| (r.id, r)).collect();
    let mut out: Vec<OrdinalChange> = after
        .iter()
        .filter_map(|new| {
            let old = original.get(&new.id)?;
            if old.primary_ordinal == new.primary_ordinal && old.legacy_ordinal == new.legacy_ordinal
            {
                return None;
            }
            Some(OrdinalChange {
                id: new.id,
                title: new.title.clone(),
                from_primary: old.primary_ordinal,
                to_primary: new.primary_ordinal,
                from_legacy: old.legacy_ordinal,
                to_legacy: new.legacy_ordinal,
            })
        })
        .collect();
    out.sort_by_key(|c| c.id);
    out
}

fn to_batch(changes: &[OrdinalChange], revision: u64) -> Batch {
    let mut batch = Batch::new().expecting(revision).published_only();
    for change in changes {
        batch.set_primary(change.id, change.to_primary);
        if change.from_legacy != change.to_legacy {
            batch.set_legacy(change.id, change.to_legacy);
        }
    }
    batch
}

/// Plan over the published records of `store` and commit the result.
pub fn execute<S, F>(store: &S, dry_run: bool, planner: F) -> Result<Pass, OrderingError>
where
    S: OrderStore + ?Sized,
    F: Fn(&mut Vec<Record>) -> Result<PassCounts, OrderingError>,
{
    let collection = store.collection().clone();
    let mut attempt = 0;
    loop {
        let snapshot = store.snapshot()?;
        let before = snapshot.published();
        let mut after = before.clone();
        let counts = planner(&mut after)?;
        let changes = changes(&before, &after);

        if dry_run || changes.is_empty() {
            return Ok(pass(&collection, snapshot.revision, counts, changes, false));
        }

        match store.commit(to_batch(&changes, snapshot.revision)) {
            Ok(report) => {
                for id in &report.skipped {
                    tracing::debug!("record {id} vanished before commit; nothing to fix");
                }
                return Ok(pass(&collection, report.revision, counts, changes, true));
            }
            Err(StoreError::Conflict { found, .. }) if attempt < MAX_CONFLICT_RETRIES => {
                attempt += 1;
                tracing::info!(
                    "'{collection}' moved to revision {found} during maintenance; re-planning (attempt {attempt})"
                );
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn pass(
    collection: &CollectionName,
    revision: u64,
    counts: PassCounts,
    changes: Vec<OrdinalChange>,
    committed: bool,
) -> Pass {
    Pass {
        collection: collection.0.clone(),
        revision,
        counts,
        changes,
        committed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordinal_core::RecordStatus;

    fn record(id: u64, primary: Ordinal, legacy: Option<Ordinal>) -> Record {
        Record {
            id: RecordId(id),
            title: format!("r{id}"),
            status: RecordStatus::Published,
            primary_ordinal: primary,
            legacy_ordinal: legacy,
            thumbnail_url: None,
        }
    }

    #[test]
    fn changes_ignore_untouched_records_and_sort_by_id() {
        let before = vec![record(2, 1, None), record(1, 0, Some(3)), record(3, 5, Some(5))];
        let mut after = before.clone();
        after[0].legacy_ordinal = Some(1);
        after[1].primary_ordinal = 3;

        let diff = changes(&before, &after);
        let ids: Vec<RecordId> = diff.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![RecordId(1), RecordId(2)]);
        assert_eq!(diff[0].from_primary, 0);
        assert_eq!(diff[0].to_primary, 3);
        assert_eq!(diff[1].to_legacy, Some(1));
    }

    #[test]
    fn batch_pins_snapshot_revision() {
        let before = vec![record(1, 0, None)];
        let mut after = before.clone();
        after[0].primary_ordinal = 1;
        let batch = to_batch(&changes(&before, &after), 7);
        assert_eq!(batch.expected_revision(), Some(7));
        assert_eq!(batch.len(), 1);
    }
}
