//! Exactly-once legacy-ordinal migration.
//!
//! The gate checks the persisted flag, atomically claims it, re-checks, runs
//! the body, and flips the flag to done. Callers that lose the claim return
//! immediately with [`MigrationOutcome::InProgress`]. The body is idempotent,
//! so a rerun after a crashed claim is only wasted work.

use std::path::Path;

use serde::Serialize;

use ordinal_core::{FlagState, FlagStore, OrderStore};

use crate::error::OrderingError;
use crate::pass::{self, Pass};
use crate::reconcile;

/// Flag guarding the legacy-ordinal migration.
pub const LEGACY_SYNC_FLAG: &str = "legacy_ordinal_sync";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MigrationOutcome {
    /// This caller ran the body and set the flag.
    Ran { pass: Pass },
    /// The flag was already set; nothing was read or written.
    AlreadyDone,
    /// Another caller holds the claim right now.
    InProgress,
}

/// Runs a guarded body at most once per collection.
pub struct MigrationGate<'a, S: OrderStore + ?Sized> {
    store: &'a S,
    flags: FlagStore,
    flag: &'static str,
}

impl<'a, S: OrderStore + ?Sized> MigrationGate<'a, S> {
    /// Gate for the legacy-ordinal migration of `store`'s collection.
    pub fn new(home: &Path, store: &'a S) -> Self {
        Self {
            flags: FlagStore::at(home, store.collection()),
            store,
            flag: LEGACY_SYNC_FLAG,
        }
    }

    pub fn state(&self) -> Result<FlagState, OrderingError> {
        Ok(self.flags.state(self.flag)?)
    }

    /// Trigger the migration.
    pub fn run(&self) -> Result<MigrationOutcome, OrderingError> {
        self.flags.ensure(self.flag)?;
        if self.flags.state(self.flag)?.is_done() {
            return Ok(MigrationOutcome::AlreadyDone);
        }

        let Some(claim) = self.flags.try_claim(self.flag)? else {
            tracing::info!(
                "migration '{}' for '{}' is already running elsewhere",
                self.flag,
                self.store.collection()
            );
            return Ok(MigrationOutcome::InProgress);
        };

        // The previous holder may have finished between our check and claim.
        if self.flags.state(self.flag)?.is_done() {
            return Ok(MigrationOutcome::AlreadyDone);
        }

        let pass = pass::execute(self.store, false, |records| reconcile::plan(records, true))?;
        self.flags.mark_done(self.flag, &claim)?;
        tracing::info!(
            "migration '{}' completed for '{}': {} reconciled, {} deduplicated, {} backfilled",
            self.flag,
            pass.collection,
            pass.counts.reconciled,
            pass.counts.deduplicated,
            pass.counts.backfilled
        );
        Ok(MigrationOutcome::Ran { pass })
    }

    /// Operator action: forget that the migration ran.
    pub fn reset(&self) -> Result<bool, OrderingError> {
        let existed = self.flags.reset(self.flag)?;
        if existed {
            tracing::warn!(
                "migration '{}' reset for '{}'",
                self.flag,
                self.store.collection()
            );
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordinal_core::{CollectionName, FileStore, NewRecord, RecordId};
    use tempfile::TempDir;

    fn store(home: &Path) -> FileStore {
        let store = FileStore::init_at(home, &CollectionName::from("gallery")).unwrap();
        for legacy in [Some(2), None, Some(1)] {
            store
                .insert(NewRecord {
                    title: "r".into(),
                    legacy_ordinal: legacy,
                    ..NewRecord::default()
                })
                .unwrap();
        }
        store
    }

    #[test]
    fn first_run_migrates_and_sets_flag() {
        let home = TempDir::new().unwrap();
        let store = store(home.path());
        let gate = MigrationGate::new(home.path(), &store);

        let outcome = gate.run().unwrap();
        assert!(matches!(outcome, MigrationOutcome::Ran { .. }));
        assert!(gate.state().unwrap().is_done());

        let c = store.load().unwrap();
        let order: Vec<u64> = c.ordered().iter().map(|r| r.id.0).collect();
        assert_eq!(order, vec![3, 1, 2]);
        assert!(c.records.iter().all(|r| r.legacy_ordinal == Some(r.primary_ordinal)));
    }

    #[test]
    fn held_claim_reports_in_progress_without_writes() {
        let home = TempDir::new().unwrap();
        let store = store(home.path());
        let before = store.load().unwrap();
        let flags = FlagStore::at(home.path(), store.collection());
        let _claim = flags.try_claim(LEGACY_SYNC_FLAG).unwrap().unwrap();

        let gate = MigrationGate::new(home.path(), &store);
        assert_eq!(gate.run().unwrap(), MigrationOutcome::InProgress);
        assert_eq!(store.load().unwrap(), before);
        assert!(!gate.state().unwrap().is_done());
    }

    #[test]
    fn outcome_serializes_with_tag() {
        assert_eq!(
            serde_json::to_value(MigrationOutcome::AlreadyDone).unwrap(),
            serde_json::json!({"outcome": "already_done"})
        );
        assert_eq!(
            serde_json::to_value(MigrationOutcome::InProgress).unwrap(),
            serde_json::json!({"outcome": "in_progress"})
        );
    }

    #[test]
    fn reset_allows_rerun() {
        let home = TempDir::new().unwrap();
        let store = store(home.path());
        let gate = MigrationGate::new(home.path(), &store);
        gate.run().unwrap();
        assert!(gate.reset().unwrap());

        store.set_legacy_ordinal(RecordId(2), Some(-1)).unwrap();
        match gate.run().unwrap() {
            MigrationOutcome::Ran { pass } => assert!(pass.committed),
            other => panic!("expected a rerun, got {other:?}"),
        }
    }
}
