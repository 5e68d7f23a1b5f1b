//! Full-tree snapshots served by FetchReplica.

use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::error::{Result, TreeError};
use crate::metadata::{EntryMetadata, EntryRecord};
use crate::tree::{MerkleNode, MerkleTree};
use crate::types::EntryId;

/// One node of a snapshot, with its claimed digests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub entry_id: EntryId,
    pub parent_id: Option<EntryId>,
    pub metadata: EntryMetadata,
    pub own_digest: Digest,
    pub aggregate_digest: Digest,
}

impl From<&MerkleNode> for SnapshotNode {
    fn from(node: &MerkleNode) -> Self {
        Self {
            entry_id: node.entry_id().clone(),
            parent_id: node.parent_id().cloned(),
            metadata: node.metadata().clone(),
            own_digest: node.own_digest(),
            aggregate_digest: node.aggregate_digest(),
        }
    }
}

/// A complete, order-independent enumeration of a tree.
///
/// Nodes are sorted by `entry_id`, so two snapshots of equal trees are equal
/// values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub root_id: Option<EntryId>,
    pub root_digest: Digest,
    pub nodes: Vec<SnapshotNode>,
}

impl TreeSnapshot {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The `{entry_id -> aggregate_digest}` map a replica reports as its
    /// known state after bootstrapping from this snapshot.
    pub fn aggregate_digests(&self) -> impl Iterator<Item = (&EntryId, Digest)> {
        self.nodes.iter().map(|n| (&n.entry_id, n.aggregate_digest))
    }

    fn records(&self) -> impl Iterator<Item = EntryRecord> + '_ {
        self.nodes.iter().map(|n| {
            EntryRecord::new(n.entry_id.clone(), n.parent_id.clone(), n.metadata.clone())
        })
    }
}

impl MerkleTree {
    /// Enumerate every node with its digests.
    pub fn snapshot(&self) -> TreeSnapshot {
        let mut nodes: Vec<SnapshotNode> = self.nodes().map(SnapshotNode::from).collect();
        nodes.sort_by(|a, b| a.entry_id.cmp(&b.entry_id));
        TreeSnapshot {
            root_id: self.root_id().cloned(),
            root_digest: self.root_digest(),
            nodes,
        }
    }

    /// Rebuild a tree from a snapshot, verifying every claimed digest.
    pub fn from_snapshot(snapshot: &TreeSnapshot) -> Result<Self> {
        let tree = Self::from_entries(snapshot.records())?;

        if tree.root_id() != snapshot.root_id.as_ref() {
            return Err(TreeError::Corrupt(format!(
                "snapshot names root {:?}, entries form root {:?}",
                snapshot.root_id,
                tree.root_id()
            )));
        }

        for claimed in &snapshot.nodes {
            let Some(node) = tree.get(&claimed.entry_id) else {
                return Err(TreeError::EntryNotFound(claimed.entry_id.clone()));
            };
            if node.own_digest() != claimed.own_digest {
                return Err(TreeError::DigestMismatch {
                    entry_id: claimed.entry_id.clone(),
                    expected: claimed.own_digest,
                    computed: node.own_digest(),
                });
            }
            if node.aggregate_digest() != claimed.aggregate_digest {
                return Err(TreeError::DigestMismatch {
                    entry_id: claimed.entry_id.clone(),
                    expected: claimed.aggregate_digest,
                    computed: node.aggregate_digest(),
                });
            }
        }

        if tree.root_digest() != snapshot.root_digest {
            let entry_id = tree
                .root_id()
                .cloned()
                .unwrap_or_else(|| EntryId::from("<empty>"));
            return Err(TreeError::DigestMismatch {
                entry_id,
                expected: snapshot.root_digest,
                computed: tree.root_digest(),
            });
        }

        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> EntryId {
        EntryId::from(s)
    }

    fn sample() -> MerkleTree {
        let mut tree = MerkleTree::new();
        tree.insert(None, id("root"), EntryMetadata::directory("/", 0)).unwrap();
        tree.insert(Some(&id("root")), id("b"), EntryMetadata::directory("b", 0))
            .unwrap();
        tree.insert(Some(&id("root")), id("a"), EntryMetadata::file("a", 4, 0))
            .unwrap();
        tree.insert(Some(&id("b")), id("c"), EntryMetadata::file("c", 8, 0))
            .unwrap();
        tree
    }

    #[test]
    fn test_snapshot_is_sorted_and_complete() {
        let snapshot = sample().snapshot();
        let ids: Vec<_> = snapshot.nodes.iter().map(|n| n.entry_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "root"]);
        assert_eq!(snapshot.root_id, Some(id("root")));
        assert_eq!(snapshot.root_digest, sample().root_digest());
    }

    #[test]
    fn test_snapshot_rebuild() {
        let tree = sample();
        let rebuilt = MerkleTree::from_snapshot(&tree.snapshot()).unwrap();
        assert_eq!(rebuilt.root_digest(), tree.root_digest());
        assert_eq!(rebuilt.snapshot(), tree.snapshot());
    }

    #[test]
    fn test_snapshot_tamper_detected() {
        let mut snapshot = sample().snapshot();
        snapshot.nodes[2].metadata.size = 9;
        assert!(matches!(
            MerkleTree::from_snapshot(&snapshot),
            Err(TreeError::DigestMismatch { .. })
        ));

        let mut snapshot = sample().snapshot();
        snapshot.root_digest = Digest::hash(b"forged");
        assert!(matches!(
            MerkleTree::from_snapshot(&snapshot),
            Err(TreeError::DigestMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = MerkleTree::new().snapshot();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.root_digest, Digest::ZERO);
        assert!(MerkleTree::from_snapshot(&snapshot).unwrap().is_empty());
    }
}
