//! Persisted flags: one-shot migration markers and time-boxed markers.
//!
//! Flags live at `<home>/.ordinal/flags/<collection>/<flag>.json`. A one-shot
//! flag is either absent/false (not run) or true (done); there is no
//! persisted "running" state. Concurrent runners coordinate through an
//! exclusive `flock` on `<flag>.claim`; exactly one caller holds it, and the
//! kernel releases it if that caller dies. Writes use the same atomic `.tmp`
//! + rename pattern as the collection store.

use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::{io_err, StoreError};
use crate::store::{is_contended, open_lock_file, ordinal_root};
use crate::types::CollectionName;

/// On-disk flag payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlagFile {
    pub name: String,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Set only on time-boxed flags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// State of a one-shot flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagState {
    NotRun,
    Done { completed_at: Option<DateTime<Utc>> },
}

impl FlagState {
    pub fn is_done(&self) -> bool {
        matches!(self, FlagState::Done { .. })
    }
}

/// `<home>/.ordinal/flags/<collection>`
pub fn flags_dir_at(home: &Path, collection: &CollectionName) -> PathBuf {
    ordinal_root(home).join("flags").join(&collection.0)
}

/// Flag storage for one collection.
#[derive(Debug, Clone)]
pub struct FlagStore {
    dir: PathBuf,
}

impl FlagStore {
    pub fn at(home: &Path, collection: &CollectionName) -> Self {
        Self {
            dir: flags_dir_at(home, collection),
        }
    }

    pub fn flag_path(&self, flag: &str) -> PathBuf {
        self.dir.join(format!("{flag}.json"))
    }

    fn claim_path(&self, flag: &str) -> PathBuf {
        self.dir.join(format!("{flag}.claim"))
    }

    fn load(&self, flag: &str) -> Result<Option<FlagFile>, StoreError> {
        let path = self.flag_path(flag);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_err(path, err)),
        }
    }

    /// Write `file` to a private `.tmp` sibling and return its path.
    fn stage(&self, flag: &str, file: &FlagFile) -> Result<PathBuf, StoreError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| io_err(&self.dir, e))?;
        let tmp = unique_tmp(&self.flag_path(flag));
        let json = serde_json::to_string_pretty(file)?;
        std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
        Ok(tmp)
    }

    fn save(&self, flag: &str, file: &FlagFile) -> Result<(), StoreError> {
        let path = self.flag_path(flag);
        let tmp = self.stage(flag, file)?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(&path, e));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // One-shot flags
    // -----------------------------------------------------------------------

    pub fn state(&self, flag: &str) -> Result<FlagState, StoreError> {
        Ok(match self.load(flag)? {
            Some(file) if file.done => FlagState::Done {
                completed_at: file.completed_at,
            },
            _ => FlagState::NotRun,
        })
    }

    /// Create the flag as `false` if it has never been seen.
    ///
    /// Uses `hard_link` so a racing `mark_done` is never overwritten.
    pub fn ensure(&self, flag: &str) -> Result<(), StoreError> {
        let path = self.flag_path(flag);
        if path.exists() {
            return Ok(());
        }
        let tmp = self.stage(
            flag,
            &FlagFile {
                name: flag.to_string(),
                done: false,
                completed_at: None,
                expires_at: None,
            },
        )?;
        let linked = std::fs::hard_link(&tmp, &path);
        let _ = std::fs::remove_file(&tmp);
        match linked {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(err) => Err(io_err(path, err)),
        }
    }

    /// Atomically claim the right to run the body guarded by `flag`.
    ///
    /// Returns `None` when another caller currently holds the claim. Does not
    /// wait.
    pub fn try_claim(&self, flag: &str) -> Result<Option<Claim>, StoreError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| io_err(&self.dir, e))?;
        let path = self.claim_path(flag);
        let mut file = open_lock_file(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = file.set_len(0).and_then(|()| {
                    writeln!(file, "{} {}", std::process::id(), Utc::now().to_rfc3339())
                });
                Ok(Some(Claim { file }))
            }
            Err(err) if is_contended(&err) => Ok(None),
            Err(err) => Err(io_err(path, err)),
        }
    }

    /// Flip the flag to done. Only the claim holder calls this.
    pub fn mark_done(&self, flag: &str, _claim: &Claim) -> Result<(), StoreError> {
        self.save(
            flag,
            &FlagFile {
                name: flag.to_string(),
                done: true,
                completed_at: Some(Utc::now()),
                expires_at: None,
            },
        )
    }

    /// Operator reset: forget the flag entirely. Returns whether it existed.
    pub fn reset(&self, flag: &str) -> Result<bool, StoreError> {
        let path = self.flag_path(flag);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_err(path, err)),
        }
    }

    // -----------------------------------------------------------------------
    // Time-boxed flags
    // -----------------------------------------------------------------------

    /// True while a time-boxed flag exists and has not expired at `now`.
    pub fn is_fresh(&self, flag: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        Ok(self
            .load(flag)?
            .and_then(|file| file.expires_at)
            .map(|expires| expires > now)
            .unwrap_or(false))
    }

    /// Mark a time-boxed flag fresh for `ttl` from `now`.
    pub fn mark_fresh(
        &self,
        flag: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        self.save(
            flag,
            &FlagFile {
                name: flag.to_string(),
                done: true,
                completed_at: Some(now),
                expires_at: Some(now + ttl),
            },
        )
    }
}

/// Exclusive right to run a guarded body; released on drop.
#[derive(Debug)]
pub struct Claim {
    file: File,
}

impl Drop for Claim {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// `<flag>.json.<pid>.<n>.tmp`, unique across threads and processes.
fn unique_tmp(path: &Path) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_extension(format!("json.{}.{n}.tmp", std::process::id()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn flags(home: &TempDir) -> FlagStore {
        FlagStore::at(home.path(), &CollectionName::from("gallery"))
    }

    #[test]
    fn missing_flag_is_not_run() {
        let home = TempDir::new().unwrap();
        assert_eq!(flags(&home).state("legacy_sync").unwrap(), FlagState::NotRun);
    }

    #[test]
    fn ensure_creates_false_flag_once() {
        let home = TempDir::new().unwrap();
        let store = flags(&home);
        store.ensure("legacy_sync").unwrap();
        assert!(store.flag_path("legacy_sync").exists());
        assert_eq!(store.state("legacy_sync").unwrap(), FlagState::NotRun);
    }

    #[test]
    fn second_claim_loses_while_first_is_held() {
        let home = TempDir::new().unwrap();
        let store = flags(&home);
        let first = store.try_claim("legacy_sync").unwrap();
        assert!(first.is_some());
        assert!(store.try_claim("legacy_sync").unwrap().is_none());
        drop(first);
        assert!(store.try_claim("legacy_sync").unwrap().is_some());
    }

    #[test]
    fn leftover_claim_file_from_dead_runner_is_claimable() {
        let home = TempDir::new().unwrap();
        let store = flags(&home);
        std::fs::create_dir_all(&store.dir).unwrap();
        std::fs::write(store.claim_path("legacy_sync"), "4242 2001-01-01T00:00:00Z\n").unwrap();
        assert!(store.try_claim("legacy_sync").unwrap().is_some());
    }

    #[test]
    fn releasing_a_claim_leaves_a_later_holder_in_place() {
        let home = TempDir::new().unwrap();
        let store = flags(&home);
        let first = store.try_claim("legacy_sync").unwrap().unwrap();
        drop(first);
        let second = store.try_claim("legacy_sync").unwrap().unwrap();

        // A third caller still loses while the second holds the claim.
        assert!(store.try_claim("legacy_sync").unwrap().is_none());
        drop(second);
        assert!(store.try_claim("legacy_sync").unwrap().is_some());
    }

    #[test]
    fn mark_done_then_reset() {
        let home = TempDir::new().unwrap();
        let store = flags(&home);
        let claim = store.try_claim("legacy_sync").unwrap().unwrap();
        store.mark_done("legacy_sync", &claim).unwrap();
        assert!(store.state("legacy_sync").unwrap().is_done());
        assert!(store.reset("legacy_sync").unwrap());
        assert_eq!(store.state("legacy_sync").unwrap(), FlagState::NotRun);
        assert!(!store.reset("legacy_sync").unwrap());
    }

    #[test]
    fn timed_flag_expires() {
        let home = TempDir::new().unwrap();
        let store = flags(&home);
        let now = Utc::now();
        assert!(!store.is_fresh("maintenance", now).unwrap());
        store
            .mark_fresh("maintenance", now, Duration::from_secs(3600))
            .unwrap();
        assert!(store.is_fresh("maintenance", now).unwrap());
        assert!(!store
            .is_fresh("maintenance", now + chrono::Duration::hours(2))
            .unwrap());
    }
}
