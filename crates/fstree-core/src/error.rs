//! Error types for the fstree core.

use thiserror::Error;

use crate::digest::Digest;
use crate::types::EntryId;

/// Structural errors raised by tree mutation and hydration.
///
/// These are returned to the immediate caller and never retried by the
/// engine: they indicate an out-of-order or duplicated event from the entry
/// store, or corrupted input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("parent entry not found: {0}")]
    ParentNotFound(EntryId),

    #[error("entry already exists: {0}")]
    DuplicateEntry(EntryId),

    #[error("entry not found: {0}")]
    EntryNotFound(EntryId),

    #[error("cannot remove the root entry {0}")]
    CannotRemoveRoot(EntryId),

    #[error("tree already has a root ({0})")]
    RootAlreadyExists(EntryId),

    #[error("entry set has no root")]
    MissingRoot,

    #[error("entry set has more than one root: {first} and {second}")]
    MultipleRoots { first: EntryId, second: EntryId },

    #[error("entry {0} is not reachable from the root")]
    Orphaned(EntryId),

    #[error("digest mismatch at {entry_id}: expected {expected}, computed {computed}")]
    DigestMismatch {
        entry_id: EntryId,
        expected: Digest,
        computed: Digest,
    },

    #[error("cannot move {entry_id} under {new_parent_id}")]
    InvalidMove {
        entry_id: EntryId,
        new_parent_id: EntryId,
    },

    #[error("corrupt tree: {0}")]
    Corrupt(String),
}

/// Metadata and identifier validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("entry name is empty")]
    EmptyName,

    #[error("entry name {0:?} is not allowed")]
    InvalidName(String),

    #[error("entry name is {len} bytes, maximum is {max}")]
    NameTooLong { len: usize, max: usize },

    #[error("entry has {count} attributes, maximum is {max}")]
    TooManyAttributes { count: usize, max: usize },

    #[error("attribute key is empty")]
    EmptyAttributeKey,

    #[error("attribute {key} is {len} bytes, maximum is {max}")]
    AttributeTooLong { key: String, len: usize, max: usize },

    #[error("entry id is empty")]
    EmptyEntryId,

    #[error("entry id is {len} bytes, maximum is {max}")]
    EntryIdTooLong { len: usize, max: usize },
}

/// Result type for tree operations.
pub type Result<T> = std::result::Result<T, TreeError>;
