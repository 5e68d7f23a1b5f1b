//! Entry metadata: the replicated attributes of a filesystem entry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::EntryId;

/// Whether an entry is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    /// Wire/hash discriminator.
    pub const fn to_u8(self) -> u8 {
        match self {
            EntryKind::File => 0,
            EntryKind::Directory => 1,
        }
    }

    /// Parse from discriminator.
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(EntryKind::File),
            1 => Some(EntryKind::Directory),
            _ => None,
        }
    }

    /// Whether this is a directory.
    pub const fn is_dir(self) -> bool {
        matches!(self, EntryKind::Directory)
    }
}

/// Metadata of a single entry as supplied by the entry store.
///
/// Every field except `hints` contributes to the entry's own digest.
/// `attributes` carries the remaining store columns that replicas must agree
/// on (path, sharing flags, symlink target, sort order, ...). `hints` carries
/// client-side caching hints that must not cause replicas to drift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Entry name within its parent directory.
    pub name: String,
    /// File or directory.
    pub kind: EntryKind,
    /// Size in bytes (0 for directories unless the store reports otherwise).
    pub size: u64,
    /// Last-modified marker (Unix seconds).
    pub modified: i64,
    /// Additional replicated attributes.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Non-replicated hints, excluded from digests.
    #[serde(default)]
    pub hints: BTreeMap<String, String>,
}

impl EntryMetadata {
    /// Metadata for a file.
    pub fn file(name: impl Into<String>, size: u64, modified: i64) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
            size,
            modified,
            attributes: BTreeMap::new(),
            hints: BTreeMap::new(),
        }
    }

    /// Metadata for a directory.
    pub fn directory(name: impl Into<String>, modified: i64) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
            size: 0,
            modified,
            attributes: BTreeMap::new(),
            hints: BTreeMap::new(),
        }
    }

    /// Add a replicated attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Add a non-replicated hint.
    pub fn with_hint(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.hints.insert(key.into(), value.into());
        self
    }

    /// Whether this entry is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

/// A flat entry row: what the entry store holds and what hydration consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub entry_id: EntryId,
    /// None only for the per-user root.
    pub parent_id: Option<EntryId>,
    pub metadata: EntryMetadata,
}

impl EntryRecord {
    /// Create a new record.
    pub fn new(entry_id: EntryId, parent_id: Option<EntryId>, metadata: EntryMetadata) -> Self {
        Self {
            entry_id,
            parent_id,
            metadata,
        }
    }

    /// Whether this record describes the per-user root.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}
