//! Domain types for ordered record collections.
//!
//! All types are serializable/deserializable via serde + serde_yaml.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Stable identity of a record inside a collection. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for RecordId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A strongly-typed name for a collection (the managed record type).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionName(pub String);

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for CollectionName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CollectionName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Integer sort key. `0` on a primary ordinal means "unordered".
pub type Ordinal = i64;

/// Largest ordinal magnitude accepted from callers.
///
/// JSON clients lose precision above 2^53, and the headroom below `i64::MAX`
/// keeps `max + 1` assignment exact.
pub const MAX_ORDINAL: Ordinal = (1 << 53) - 1;

/// Whether `value` lies in `-MAX_ORDINAL..=MAX_ORDINAL`.
pub fn ordinal_in_range(value: Ordinal) -> bool {
    (-MAX_ORDINAL..=MAX_ORDINAL).contains(&value)
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle status of a record. Only `Published` records are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    #[default]
    Published,
    Draft,
    Trash,
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordStatus::Published => write!(f, "published"),
            RecordStatus::Draft => write!(f, "draft"),
            RecordStatus::Trash => write!(f, "trash"),
        }
    }
}

impl std::str::FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "published" | "publish" => Ok(Self::Published),
            "draft" => Ok(Self::Draft),
            "trash" => Ok(Self::Trash),
            other => Err(format!(
                "unknown record status '{other}'; expected: published, draft, trash"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// A single ordered record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub title: String,
    #[serde(default)]
    pub status: RecordStatus,
    /// Native sort key; `0` until something assigns it.
    #[serde(default)]
    pub primary_ordinal: Ordinal,
    /// Historical sort attribute. `None` means the record never had one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_ordinal: Option<Ordinal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

impl Record {
    pub fn is_published(&self) -> bool {
        self.status == RecordStatus::Published
    }
}

/// On-disk document for one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub name: CollectionName,
    /// Bumped on every successful commit; the optimistic version.
    #[serde(default)]
    pub revision: u64,
    /// Next identity handed out by `insert`.
    #[serde(default = "first_id")]
    pub next_id: u64,
    #[serde(default)]
    pub records: Vec<Record>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn first_id() -> u64 {
    1
}

impl Collection {
    pub fn new(name: CollectionName) -> Self {
        let now = Utc::now();
        Self {
            name,
            revision: 0,
            next_id: first_id(),
            records: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    pub fn get(&self, id: RecordId) -> Option<&Record> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: RecordId) -> Option<&mut Record> {
        self.records.iter_mut().find(|r| r.id == id)
    }

    /// Published records sorted by primary ordinal, ties broken by identity.
    pub fn ordered(&self) -> Vec<&Record> {
        let mut published: Vec<&Record> =
            self.records.iter().filter(|r| r.is_published()).collect();
        published.sort_by_key(|r| (r.primary_ordinal, r.id));
        published
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
