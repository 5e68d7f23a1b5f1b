//! Bounded revision journal.
//!
//! Every mutation of a resident tree records the root digest before and
//! after, plus enough undo information to reconstruct the earlier state.
//! This is what lets PullDiff recognise a requester's stale root digest and
//! diff against the state it actually holds.

use std::collections::VecDeque;

use crate::digest::Digest;
use crate::error::Result;
use crate::metadata::{EntryMetadata, EntryRecord};
use crate::tree::MerkleTree;
use crate::types::EntryId;

/// Undo information for one mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// A single entry was inserted.
    Inserted {
        entry_id: EntryId,
        parent_id: Option<EntryId>,
    },
    /// A subtree was removed; records are in pre-order.
    Removed { records: Vec<EntryRecord> },
    /// An entry's metadata was replaced.
    Updated {
        entry_id: EntryId,
        previous: EntryMetadata,
    },
    /// An entry was moved, optionally with new metadata.
    Moved {
        entry_id: EntryId,
        previous_parent: EntryId,
        new_parent: EntryId,
        previous_metadata: EntryMetadata,
    },
}

/// One journal entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub before: Digest,
    pub after: Digest,
    pub change: Change,
}

/// Fixed-capacity ring of recent revisions, oldest first.
#[derive(Debug, Clone)]
pub struct Journal {
    revisions: VecDeque<Revision>,
    capacity: usize,
}

impl Journal {
    pub fn new(capacity: usize) -> Self {
        Self {
            revisions: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a revision, dropping the oldest when full.
    pub fn record(&mut self, revision: Revision) {
        if self.capacity == 0 {
            return;
        }
        while self.revisions.len() >= self.capacity {
            self.revisions.pop_front();
        }
        self.revisions.push_back(revision);
    }

    pub fn clear(&mut self) {
        self.revisions.clear();
    }

    /// Revisions applied since the tree had root digest `digest`, oldest
    /// first. `None` when the digest is not in the journal.
    ///
    /// If the digest occurs more than once, the most recent occurrence wins.
    pub fn revisions_since(
        &self,
        digest: &Digest,
    ) -> Option<std::collections::vec_deque::Iter<'_, Revision>> {
        let position = self.revisions.iter().rposition(|r| r.before == *digest)?;
        Some(self.revisions.range(position..))
    }

    /// Whether `digest` was the root digest at some journaled point.
    pub fn recognizes(&self, digest: &Digest) -> bool {
        self.revisions.iter().any(|r| r.before == *digest)
    }
}

/// A tree plus its revision journal.
///
/// All mutation goes through here so that the journal cannot miss a change.
#[derive(Debug, Clone)]
pub struct VersionedTree {
    tree: MerkleTree,
    journal: Journal,
}

impl VersionedTree {
    /// An empty tree with the given journal depth.
    pub fn new(history_depth: usize) -> Self {
        Self::from_tree(MerkleTree::new(), history_depth)
    }

    pub fn from_tree(tree: MerkleTree, history_depth: usize) -> Self {
        Self {
            tree,
            journal: Journal::new(history_depth),
        }
    }

    pub fn tree(&self) -> &MerkleTree {
        &self.tree
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn root_digest(&self) -> Digest {
        self.tree.root_digest()
    }

    pub fn insert(
        &mut self,
        parent_id: Option<&EntryId>,
        entry_id: EntryId,
        metadata: EntryMetadata,
    ) -> Result<()> {
        let before = self.tree.root_digest();
        self.tree.insert(parent_id, entry_id.clone(), metadata)?;
        self.commit(
            before,
            Change::Inserted {
                entry_id,
                parent_id: parent_id.cloned(),
            },
        );
        Ok(())
    }

    /// Remove a subtree. Returns the removed records in pre-order.
    pub fn remove(&mut self, entry_id: &EntryId) -> Result<Vec<EntryRecord>> {
        let before = self.tree.root_digest();
        let records = self.tree.remove(entry_id)?;
        self.commit(
            before,
            Change::Removed {
                records: records.clone(),
            },
        );
        Ok(records)
    }

    pub fn update_metadata(&mut self, entry_id: &EntryId, metadata: EntryMetadata) -> Result<()> {
        let before = self.tree.root_digest();
        let previous = self.tree.update_metadata(entry_id, metadata)?;
        self.commit(
            before,
            Change::Updated {
                entry_id: entry_id.clone(),
                previous,
            },
        );
        Ok(())
    }

    pub fn move_entry(
        &mut self,
        entry_id: &EntryId,
        new_parent_id: &EntryId,
        metadata: Option<EntryMetadata>,
    ) -> Result<()> {
        let before = self.tree.root_digest();
        let (previous_parent, previous_metadata) =
            self.tree.move_entry(entry_id, new_parent_id, metadata)?;
        self.commit(
            before,
            Change::Moved {
                entry_id: entry_id.clone(),
                previous_parent,
                new_parent: new_parent_id.clone(),
                previous_metadata,
            },
        );
        Ok(())
    }

    /// Swap in a freshly hydrated tree. The journal no longer describes it,
    /// so it is cleared.
    pub fn replace(&mut self, tree: MerkleTree) {
        self.tree = tree;
        self.journal.clear();
    }

    fn commit(&mut self, before: Digest, change: Change) {
        let after = self.tree.root_digest();
        // A digest-neutral change (hint-only update) leaves nothing to undo.
        if before == after {
            return;
        }
        self.journal.record(Revision {
            before,
            after,
            change,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> EntryId {
        EntryId::from(s)
    }

    fn seeded(depth: usize) -> VersionedTree {
        let mut v = VersionedTree::new(depth);
        v.insert(None, id("root"), EntryMetadata::directory("/", 0)).unwrap();
        v.insert(Some(&id("root")), id("docs"), EntryMetadata::directory("docs", 0))
            .unwrap();
        v
    }

    #[test]
    fn test_records_each_mutation() {
        let mut v = seeded(16);
        let d0 = v.root_digest();

        v.insert(Some(&id("docs")), id("a"), EntryMetadata::file("a", 1, 0))
            .unwrap();
        let d1 = v.root_digest();
        v.update_metadata(&id("a"), EntryMetadata::file("a", 2, 0)).unwrap();
        let d2 = v.root_digest();
        v.remove(&id("a")).unwrap();

        assert_eq!(v.journal().len(), 5);
        let since: Vec<_> = v.journal().revisions_since(&d0).unwrap().collect();
        assert_eq!(since.len(), 3);
        assert_eq!(since[0].before, d0);
        assert_eq!(since[0].after, d1);
        assert_eq!(since[1].after, d2);
        assert!(matches!(since[2].change, Change::Removed { .. }));
    }

    #[test]
    fn test_failed_mutation_not_recorded() {
        let mut v = seeded(16);
        let len = v.journal().len();
        assert!(v.remove(&id("missing")).is_err());
        assert!(v
            .insert(Some(&id("ghost")), id("x"), EntryMetadata::file("x", 0, 0))
            .is_err());
        assert_eq!(v.journal().len(), len);
    }

    #[test]
    fn test_bounded_capacity() {
        let mut v = seeded(2);
        let d_old = v.root_digest();
        for i in 0..4 {
            v.insert(
                Some(&id("docs")),
                id(&format!("f{i}")),
                EntryMetadata::file(format!("f{i}"), i, 0),
            )
            .unwrap();
        }
        assert_eq!(v.journal().len(), 2);
        assert!(v.journal().revisions_since(&d_old).is_none());
        assert!(!v.journal().recognizes(&d_old));
    }

    #[test]
    fn test_hint_only_update_not_journaled() {
        let mut v = seeded(8);
        let len = v.journal().len();
        v.update_metadata(&id("docs"), EntryMetadata::directory("docs", 0).with_hint("k", "v"))
            .unwrap();
        assert_eq!(v.journal().len(), len);
    }

    #[test]
    fn test_replace_clears_journal() {
        let mut v = seeded(8);
        assert!(!v.journal().is_empty());
        v.replace(MerkleTree::new());
        assert!(v.journal().is_empty());
        assert_eq!(v.root_digest(), Digest::ZERO);
    }

    #[test]
    fn test_revisions_since_prefers_latest_occurrence() {
        let mut v = seeded(16);
        let base = v.root_digest();
        v.insert(Some(&id("docs")), id("t"), EntryMetadata::file("t", 0, 0))
            .unwrap();
        v.remove(&id("t")).unwrap();
        assert_eq!(v.root_digest(), base);
        v.insert(Some(&id("docs")), id("u"), EntryMetadata::file("u", 0, 0))
            .unwrap();

        let since: Vec<_> = v.journal().revisions_since(&base).unwrap().collect();
        assert_eq!(since.len(), 1);
    }

    #[test]
    fn test_move_recorded() {
        let mut v = seeded(8);
        v.insert(Some(&id("root")), id("b"), EntryMetadata::directory("b", 0))
            .unwrap();
        v.move_entry(&id("docs"), &id("b"), None).unwrap();
        let last = v.journal().revisions_since(&Digest::ZERO).unwrap().last().cloned();
        match last.map(|r| r.change) {
            Some(Change::Moved {
                previous_parent,
                new_parent,
                ..
            }) => {
                assert_eq!(previous_parent, id("root"));
                assert_eq!(new_parent, id("b"));
            }
            other => panic!("unexpected change {:?}", other),
        }
    }
}
