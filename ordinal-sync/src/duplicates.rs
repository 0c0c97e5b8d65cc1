//! Duplicate resolution: make primary ordinals pairwise unique.
//!
//! Records are swept in `(primary_ordinal, id)` order. A record whose value
//! is already taken moves to `max(used) + 1`; everything else keeps its
//! value. Moved records only ever move upward, so relative order is kept.
//! Gaps left behind are fine; only relative order matters. A record that
//! would have to move past `i64::MAX` fails the sweep instead of wrapping.

use std::collections::BTreeSet;

use ordinal_core::{Ordinal, OrderStore, Record, RecordId};

use crate::error::OrderingError;
use crate::pass::{self, Pass, PassCounts};

/// Sweep `records` in place. Returns the identities that were moved.
///
/// Moved records get their legacy value re-synced to the new primary, so a
/// later reconciliation does not pull them back onto the collision.
/// On return `records` is sorted by the new `(primary_ordinal, id)`.
pub fn resolve(records: &mut [Record]) -> Result<Vec<RecordId>, OrderingError> {
    records.sort_by_key(|r| (r.primary_ordinal, r.id));

    let mut used: BTreeSet<Ordinal> = BTreeSet::new();
    let mut moved = Vec::new();
    for record in records.iter_mut() {
        if used.contains(&record.primary_ordinal) {
            let top = used.last().copied().unwrap_or(record.primary_ordinal);
            let next = above(top, record.id)?;
            record.primary_ordinal = next;
            record.legacy_ordinal = Some(next);
            moved.push(record.id);
        }
        used.insert(record.primary_ordinal);
    }
    Ok(moved)
}

/// `value + 1`, or a validation error naming the record that needed it.
pub(crate) fn above(value: Ordinal, id: RecordId) -> Result<Ordinal, OrderingError> {
    value.checked_add(1).ok_or_else(|| {
        OrderingError::Validation(format!(
            "no ordinal above {value} is left for record {id}"
        ))
    })
}

/// Run the sweep against the published records of `store`.
pub fn run<S: OrderStore + ?Sized>(store: &S, dry_run: bool) -> Result<Pass, OrderingError> {
    let pass = pass::execute(store, dry_run, |records| {
        Ok(PassCounts {
            deduplicated: resolve(records)?.len(),
            ..PassCounts::default()
        })
    })?;
    if pass.committed {
        tracing::info!(
            "resolved {} duplicate ordinal(s) in '{}'",
            pass.counts.deduplicated,
            pass.collection
        );
    }
    Ok(pass)
}
