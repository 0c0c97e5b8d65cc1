//! Reconciliation of the legacy ordinal into the primary ordinal.
//!
//! One deterministic pass in identity order:
//!
//! 1. legacy set and different from primary → adopt legacy; if another record
//!    already claimed that value in this pass, walk upward to the next free
//!    one (and rewrite legacy to match).
//! 2. legacy unset and primary `0` → deferred; after the pass each such record
//!    takes `max(claimed) + 1` and gets legacy backfilled.
//! 3. legacy unset and primary nonzero → untouched.
//!
//! Duplicate resolution runs afterward. A second run over unchanged data
//! produces no changes. Running out of ordinals above `i64::MAX` is a
//! validation error, never a wrap-around.

use std::collections::BTreeSet;

use ordinal_core::{Ordinal, OrderStore, Record, RecordId};

use crate::duplicates;
use crate::error::OrderingError;
use crate::pass::{self, Pass, PassCounts};

/// Apply steps 1–3 in place. Returns the identities whose ordinals changed.
pub fn reconcile(records: &mut [Record]) -> Result<Vec<RecordId>, OrderingError> {
    records.sort_by_key(|r| r.id);

    let mut claimed: BTreeSet<Ordinal> = BTreeSet::new();
    let mut unordered = Vec::new();
    let mut changed = Vec::new();

    for (idx, record) in records.iter_mut().enumerate() {
        match record.legacy_ordinal {
            Some(legacy) if legacy != record.primary_ordinal => {
                let mut target = legacy;
                while claimed.contains(&target) {
                    target = duplicates::above(target, record.id)?;
                }
                record.primary_ordinal = target;
                if target != legacy {
                    record.legacy_ordinal = Some(target);
                }
                claimed.insert(target);
                changed.push(record.id);
            }
            None if record.primary_ordinal == 0 => unordered.push(idx),
            _ => {
                claimed.insert(record.primary_ordinal);
            }
        }
    }

    // 0 means "unordered", so never hand it out even if every claim is negative.
    for idx in unordered {
        let record = &mut records[idx];
        let next = duplicates::above(claimed.last().copied().unwrap_or(0).max(0), record.id)?;
        record.primary_ordinal = next;
        record.legacy_ordinal = Some(next);
        claimed.insert(next);
        changed.push(record.id);
    }

    Ok(changed)
}

/// Backfill the legacy value from the primary wherever it is unset.
pub fn backfill_legacy(records: &mut [Record]) -> Vec<RecordId> {
    records
        .iter_mut()
        .filter(|r| r.legacy_ordinal.is_none())
        .map(|r| {
            r.legacy_ordinal = Some(r.primary_ordinal);
            r.id
        })
        .collect()
}

/// Planner used by every reconciling pass.
pub fn plan(records: &mut [Record], backfill: bool) -> Result<PassCounts, OrderingError> {
    let reconciled = reconcile(records)?.len();
    let deduplicated = duplicates::resolve(records)?.len();
    let backfilled = if backfill {
        backfill_legacy(records).len()
    } else {
        0
    };
    Ok(PassCounts {
        reconciled,
        deduplicated,
        backfilled,
    })
}

/// Reconcile, then resolve duplicates, against the published records of `store`.
pub fn run<S: OrderStore + ?Sized>(store: &S, dry_run: bool) -> Result<Pass, OrderingError> {
    let pass = pass::execute(store, dry_run, |records| plan(records, false))?;
    if pass.committed {
        tracing::info!(
            "reconciled '{}': {} adopted/assigned, {} deduplicated (revision {})",
            pass.collection,
            pass.counts.reconciled,
            pass.counts.deduplicated,
            pass.revision
        );
    }
    Ok(pass)
}
