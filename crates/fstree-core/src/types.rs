//! Strong type definitions for fstree.
//!
//! Identifiers are newtypes to prevent misuse at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque, globally-unique identifier for a filesystem entry.
///
/// Supplied by the external entry store and stable for the lifetime of the
/// entry, across renames and moves. Ordering is bytewise on the identifier,
/// which is the order children are combined in when hashing.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    /// Create a new EntryId.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Length of the identifier in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the identifier is empty (never valid for a real entry).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({})", self.0)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntryId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for EntryId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for EntryId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier of the user owning a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    /// Create from a raw numeric id.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw numeric id.
    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_id_ordering_is_bytewise() {
        let mut ids = vec![EntryId::from("b"), EntryId::from("aa"), EntryId::from("a")];
        ids.sort();
        assert_eq!(ids, vec![EntryId::from("a"), EntryId::from("aa"), EntryId::from("b")]);
    }

    #[test]
    fn test_entry_id_display() {
        let id = EntryId::new("f3a1-docs");
        assert_eq!(format!("{}", id), "f3a1-docs");
        assert_eq!(format!("{:?}", id), "EntryId(f3a1-docs)");
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let id = EntryId::new("readme");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"readme\"");
        assert_eq!(serde_json::to_string(&UserId(42)).unwrap(), "42");
    }
}
