//! Per-collection YAML record store.
//!
//! # Storage layout
//!
//! ```text
//! ~/.ordinal/
//!   collections/
//!     <collection>.yaml   (one file per collection, mode 0600)
//!     <collection>.lock   (flock target; locked only while a commit is in flight)
//! ```
//!
//! # Commit protocol
//!
//! Every mutation goes through the same path:
//!
//! 1. Take an exclusive `flock` on `<collection>.lock`, retrying briefly.
//! 2. Re-read the collection from disk.
//! 3. Check `expected_revision` when the batch carries one.
//! 4. Apply the staged writes in memory.
//! 5. Write `<collection>.yaml.tmp`, `chmod 0600`, `rename` over the original.
//! 6. Drop the lock.
//!
//! A crash before step 5 completes leaves the previous file untouched, so
//! readers never observe half of a batch.
//!
//! # API pattern
//!
//! As with every home-rooted API in this workspace, functions come in pairs:
//! `fn_at(home: &Path, …)` for tests and `fn(…)` deriving home from
//! `dirs::home_dir()`.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use chrono::Utc;
use fs2::FileExt;
use sha2::{Digest, Sha256};

use crate::error::{io_err, StoreError};
use crate::types::{
    ordinal_in_range, Collection, CollectionName, Ordinal, Record, RecordId, RecordStatus,
};

/// How long to keep retrying a held lock before giving up.
pub const LOCK_ATTEMPTS: u32 = 50;
pub const LOCK_RETRY_DELAY: Duration = Duration::from_millis(20);

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.ordinal`
pub fn ordinal_root(home: &Path) -> PathBuf {
    home.join(".ordinal")
}

/// `<home>/.ordinal/collections`
pub fn collections_dir(home: &Path) -> PathBuf {
    ordinal_root(home).join("collections")
}

/// `<home>/.ordinal/collections/<collection>.yaml`. Pure, no I/O.
pub fn collection_path_at(home: &Path, name: &CollectionName) -> PathBuf {
    collections_dir(home).join(format!("{}.yaml", name.0))
}

fn lock_path(path: &Path) -> PathBuf {
    path.with_extension("lock")
}

fn tmp_path(path: &Path) -> PathBuf {
    path.with_extension("yaml.tmp")
}

/// Collection names become file names, so only a conservative charset passes.
pub fn validate_name(name: &CollectionName) -> Result<(), StoreError> {
    let ok = !name.0.is_empty()
        && !name.0.starts_with('.')
        && name
            .0
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.0.clone()))
    }
}

/// Lists every collection under `<home>/.ordinal/collections/`, sorted by name.
pub fn list_collections_at(home: &Path) -> Result<Vec<CollectionName>, StoreError> {
    let dir = collections_dir(home);
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut names: Vec<CollectionName> = std::fs::read_dir(&dir)
        .map_err(|e| io_err(&dir, e))?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let path = e.path();
            if path.extension().and_then(|x| x.to_str()) != Some("yaml") {
                return None;
            }
            path.file_stem()
                .map(|s| CollectionName::from(s.to_string_lossy().into_owned()))
        })
        .collect();
    names.sort();
    Ok(names)
}

/// `list_collections_at` convenience wrapper.
pub fn list_collections() -> Result<Vec<CollectionName>, StoreError> {
    list_collections_at(&home()?)
}

// ---------------------------------------------------------------------------
// 2. Staged writes
// ---------------------------------------------------------------------------

/// Ordinal changes for one record inside a [`Batch`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrdinalWrite {
    pub primary: Option<Ordinal>,
    /// Outer `None` leaves the legacy value alone; `Some(None)` clears it.
    pub legacy: Option<Option<Ordinal>>,
}

/// A set of ordinal writes applied all-or-nothing by [`OrderStore::commit`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    writes: BTreeMap<RecordId, OrdinalWrite>,
    expected_revision: Option<u64>,
    published_only: bool,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the commit with [`StoreError::Conflict`] unless the collection is
    /// still at `revision`.
    pub fn expecting(mut self, revision: u64) -> Self {
        self.expected_revision = Some(revision);
        self
    }

    /// Skip records that are no longer published at commit time.
    pub fn published_only(mut self) -> Self {
        self.published_only = true;
        self
    }

    pub fn set_primary(&mut self, id: RecordId, value: Ordinal) {
        self.writes.entry(id).or_default().primary = Some(value);
    }

    pub fn set_legacy(&mut self, id: RecordId, value: Option<Ordinal>) {
        self.writes.entry(id).or_default().legacy = Some(value);
    }

    /// Set the primary ordinal and mirror it into the legacy attribute.
    pub fn set_both(&mut self, id: RecordId, value: Ordinal) {
        let write = self.writes.entry(id).or_default();
        write.primary = Some(value);
        write.legacy = Some(Some(value));
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn expected_revision(&self) -> Option<u64> {
        self.expected_revision
    }

    /// First staged value outside the accepted ordinal range, if any.
    fn out_of_range(&self) -> Option<Ordinal> {
        self.writes
            .values()
            .flat_map(|w| [w.primary, w.legacy.flatten()])
            .flatten()
            .find(|v| !ordinal_in_range(*v))
    }

    pub fn writes(&self) -> impl Iterator<Item = (&RecordId, &OrdinalWrite)> {
        self.writes.iter()
    }
}

/// What a commit did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReport {
    /// Revision visible after the commit.
    pub revision: u64,
    /// Records the batch addressed that were present (and eligible).
    pub applied: usize,
    /// Records whose stored values actually changed.
    pub changed: usize,
    /// Records the batch addressed that were missing or ineligible.
    pub skipped: Vec<RecordId>,
}

/// All records of a collection, read at one revision.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub revision: u64,
    pub records: Vec<Record>,
}

impl Snapshot {
    pub fn published(&self) -> Vec<Record> {
        self.records
            .iter()
            .filter(|r| r.is_published())
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// 3. OrderStore
// ---------------------------------------------------------------------------

/// Persisted records with two ordinal fields each.
///
/// `list` makes no ordering promise. Single-record setters are atomic on
/// their own; multi-record atomicity comes from [`OrderStore::commit`].
pub trait OrderStore {
    fn collection(&self) -> &CollectionName;

    fn list(&self, status: RecordStatus) -> Result<Vec<Record>, StoreError>;

    fn snapshot(&self) -> Result<Snapshot, StoreError>;

    fn commit(&self, batch: Batch) -> Result<CommitReport, StoreError>;

    fn set_primary_ordinal(&self, id: RecordId, value: Ordinal) -> Result<(), StoreError> {
        let mut batch = Batch::new();
        batch.set_primary(id, value);
        self.commit_one(id, batch)
    }

    fn set_legacy_ordinal(&self, id: RecordId, value: Option<Ordinal>) -> Result<(), StoreError> {
        let mut batch = Batch::new();
        batch.set_legacy(id, value);
        self.commit_one(id, batch)
    }

    #[doc(hidden)]
    fn commit_one(&self, id: RecordId, batch: Batch) -> Result<(), StoreError> {
        let report = self.commit(batch)?;
        if report.applied == 0 {
            return Err(StoreError::RecordNotFound {
                collection: self.collection().clone(),
                id,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 4. FileStore
// ---------------------------------------------------------------------------

/// Fields for a new record; identity and ordinal are assigned by the store.
#[derive(Debug, Clone, Default)]
pub struct NewRecord {
    pub title: String,
    pub status: RecordStatus,
    pub legacy_ordinal: Option<Ordinal>,
    pub thumbnail_url: Option<String>,
}

/// [`OrderStore`] backed by `<home>/.ordinal/collections/<name>.yaml`.
#[derive(Debug, Clone)]
pub struct FileStore {
    name: CollectionName,
    path: PathBuf,
}

impl FileStore {
    /// Open an existing collection.
    ///
    /// Returns [`StoreError::CollectionNotFound`] if the file is absent.
    pub fn open_at(home: &Path, name: &CollectionName) -> Result<Self, StoreError> {
        validate_name(name)?;
        let path = collection_path_at(home, name);
        if !path.exists() {
            return Err(StoreError::CollectionNotFound {
                name: name.clone(),
                path,
            });
        }
        Ok(Self {
            name: name.clone(),
            path,
        })
    }

    /// `open_at` convenience wrapper.
    pub fn open(name: &CollectionName) -> Result<Self, StoreError> {
        Self::open_at(&home()?, name)
    }

    /// Create the collection file if it does not exist yet.
    ///
    /// Idempotent: an existing collection is opened unchanged.
    pub fn init_at(home: &Path, name: &CollectionName) -> Result<Self, StoreError> {
        validate_name(name)?;
        let path = collection_path_at(home, name);
        if !path.exists() {
            let dir = collections_dir(home);
            if !dir.exists() {
                std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
                set_dir_permissions(&dir)?;
            }
            save_collection(&path, &Collection::new(name.clone()))?;
        }
        Ok(Self {
            name: name.clone(),
            path,
        })
    }

    /// `init_at` convenience wrapper.
    pub fn init(name: &CollectionName) -> Result<Self, StoreError> {
        Self::init_at(&home()?, name)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole collection document.
    pub fn load(&self) -> Result<Collection, StoreError> {
        load_collection(&self.name, &self.path)
    }

    /// Add a record with `primary_ordinal = 0` and a fresh identity.
    pub fn insert(&self, new: NewRecord) -> Result<Record, StoreError> {
        if let Some(value) = new.legacy_ordinal.filter(|v| !ordinal_in_range(*v)) {
            return Err(StoreError::OrdinalOutOfRange { value });
        }
        self.mutate(|collection| {
            let id = RecordId(collection.next_id.max(1));
            collection.next_id = id.0 + 1;
            let record = Record {
                id,
                title: new.title,
                status: new.status,
                primary_ordinal: 0,
                legacy_ordinal: new.legacy_ordinal,
                thumbnail_url: new.thumbnail_url,
            };
            collection.records.push(record.clone());
            Ok(record)
        })
    }

    pub fn set_status(&self, id: RecordId, status: RecordStatus) -> Result<(), StoreError> {
        let name = self.name.clone();
        self.mutate(|collection| {
            let record = collection
                .get_mut(id)
                .ok_or(StoreError::RecordNotFound { collection: name, id })?;
            record.status = status;
            Ok(())
        })
    }

    pub fn remove(&self, id: RecordId) -> Result<(), StoreError> {
        let name = self.name.clone();
        self.mutate(|collection| {
            let before = collection.records.len();
            collection.records.retain(|r| r.id != id);
            if collection.records.len() == before {
                return Err(StoreError::RecordNotFound { collection: name, id });
            }
            Ok(())
        })
    }

    /// Lock, reload, apply `f`, persist atomically, bump the revision.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Collection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _lock = LockGuard::acquire(&self.name, &lock_path(&self.path))?;
        let mut collection = self.load()?;
        let out = f(&mut collection)?;
        collection.revision += 1;
        collection.updated_at = Utc::now();
        save_collection(&self.path, &collection)?;
        Ok(out)
    }
}

impl OrderStore for FileStore {
    fn collection(&self) -> &CollectionName {
        &self.name
    }

    fn list(&self, status: RecordStatus) -> Result<Vec<Record>, StoreError> {
        Ok(self
            .load()?
            .records
            .into_iter()
            .filter(|r| r.status == status)
            .collect())
    }

    fn snapshot(&self) -> Result<Snapshot, StoreError> {
        let collection = self.load()?;
        Ok(Snapshot {
            revision: collection.revision,
            records: collection.records,
        })
    }

    fn commit(&self, batch: Batch) -> Result<CommitReport, StoreError> {
        if let Some(value) = batch.out_of_range() {
            return Err(StoreError::OrdinalOutOfRange { value });
        }
        let _lock = LockGuard::acquire(&self.name, &lock_path(&self.path))?;
        let mut collection = self.load()?;

        if let Some(expected) = batch.expected_revision {
            if collection.revision != expected {
                return Err(StoreError::Conflict {
                    collection: self.name.clone(),
                    expected,
                    found: collection.revision,
                });
            }
        }

        let mut applied = 0usize;
        let mut changed = 0usize;
        let mut skipped = Vec::new();
        for (id, write) in &batch.writes {
            let Some(record) = collection.get_mut(*id) else {
                skipped.push(*id);
                continue;
            };
            if batch.published_only && !record.is_published() {
                skipped.push(*id);
                continue;
            }
            applied += 1;
            let mut touched = false;
            if let Some(primary) = write.primary {
                touched |= record.primary_ordinal != primary;
                record.primary_ordinal = primary;
            }
            if let Some(legacy) = write.legacy {
                touched |= record.legacy_ordinal != legacy;
                record.legacy_ordinal = legacy;
            }
            if touched {
                changed += 1;
            }
        }

        if changed > 0 {
            collection.revision += 1;
            collection.updated_at = Utc::now();
            save_collection(&self.path, &collection)?;
        }

        Ok(CommitReport {
            revision: collection.revision,
            applied,
            changed,
            skipped,
        })
    }
}

// ---------------------------------------------------------------------------
// 5. Fingerprint
// ---------------------------------------------------------------------------

/// SHA-256 over the visible order (`id:primary` per published record).
///
/// Two collections with the same fingerprint present the same sequence.
pub fn order_fingerprint(collection: &Collection) -> String {
    let mut h = Sha256::new();
    for record in collection.ordered() {
        h.update(format!("{}:{}\n", record.id, record.primary_ordinal).as_bytes());
    }
    hex::encode(h.finalize())
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn load_collection(name: &CollectionName, path: &Path) -> Result<Collection, StoreError> {
    if !path.exists() {
        return Err(StoreError::CollectionNotFound {
            name: name.clone(),
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_yaml::from_str(&contents).map_err(|e| StoreError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
fn save_collection(path: &Path, collection: &Collection) -> Result<(), StoreError> {
    let tmp = tmp_path(path);
    let yaml = serde_yaml::to_string(collection)?;
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

/// Advisory `flock` on `<collection>.lock`, held for the guard's lifetime.
///
/// The lock file itself is never deleted: the kernel drops the lock when the
/// file handle closes, including when the holder dies.
struct LockGuard {
    file: File,
}

impl LockGuard {
    fn acquire(collection: &CollectionName, path: &Path) -> Result<Self, StoreError> {
        let mut file = open_lock_file(path)?;
        for attempt in 0..LOCK_ATTEMPTS {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    // Best effort: the pid only helps a human reading the file.
                    let _ = file.set_len(0).and_then(|()| {
                        writeln!(file, "{} {}", std::process::id(), Utc::now().to_rfc3339())
                    });
                    return Ok(Self { file });
                }
                Err(err) if is_contended(&err) => {
                    if attempt + 1 < LOCK_ATTEMPTS {
                        sleep(LOCK_RETRY_DELAY);
                    }
                }
                Err(err) => return Err(io_err(path, err)),
            }
        }
        Err(StoreError::Locked {
            collection: collection.clone(),
            path: path.to_path_buf(),
        })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Open (creating if needed) a lock file without truncating it.
pub(crate) fn open_lock_file(path: &Path) -> Result<File, StoreError> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| io_err(path, e))
}

/// Whether a `try_lock_*` error means "someone else holds it".
pub(crate) fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

pub(crate) fn home() -> Result<PathBuf, StoreError> {
    dirs::home_dir().ok_or(StoreError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
