//! The per-user filesystem Merkle tree.
//!
//! The tree is an arena keyed by [`EntryId`]: nodes reference their parent and
//! children by identifier, never by pointer. Each node caches the aggregate
//! digest of every child, so a mutation at depth `d` recomputes exactly `d + 1`
//! node digests on the way up to the root.

use std::collections::{BTreeMap, HashMap};

use crate::canonical::{digest_of_metadata, digest_of_node};
use crate::digest::Digest;
use crate::error::{Result, TreeError};
use crate::metadata::{EntryMetadata, EntryRecord};
use crate::types::EntryId;

/// One filesystem entry in a [`MerkleTree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleNode {
    entry_id: EntryId,
    parent_id: Option<EntryId>,
    metadata: EntryMetadata,
    own_digest: Digest,
    /// Child id -> child aggregate digest.
    children: BTreeMap<EntryId, Digest>,
    aggregate_digest: Digest,
}

impl MerkleNode {
    fn new(entry_id: EntryId, parent_id: Option<EntryId>, metadata: EntryMetadata) -> Self {
        let own_digest = digest_of_metadata(&metadata);
        let children = BTreeMap::new();
        let aggregate_digest = digest_of_node(&own_digest, &children);
        Self {
            entry_id,
            parent_id,
            metadata,
            own_digest,
            children,
            aggregate_digest,
        }
    }

    pub fn entry_id(&self) -> &EntryId {
        &self.entry_id
    }

    pub fn parent_id(&self) -> Option<&EntryId> {
        self.parent_id.as_ref()
    }

    pub fn metadata(&self) -> &EntryMetadata {
        &self.metadata
    }

    /// Digest of this entry's own metadata.
    pub fn own_digest(&self) -> Digest {
        self.own_digest
    }

    /// Digest covering this entry and its whole subtree.
    pub fn aggregate_digest(&self) -> Digest {
        self.aggregate_digest
    }

    /// Children in `entry_id` order, with their aggregate digests.
    pub fn children(&self) -> &BTreeMap<EntryId, Digest> {
        &self.children
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Flatten to an entry record.
    pub fn to_record(&self) -> EntryRecord {
        EntryRecord::new(
            self.entry_id.clone(),
            self.parent_id.clone(),
            self.metadata.clone(),
        )
    }

    fn recompute(&mut self) {
        self.aggregate_digest = digest_of_node(&self.own_digest, &self.children);
    }
}

/// One user's filesystem hierarchy.
#[derive(Debug, Clone, Default)]
pub struct MerkleTree {
    nodes: HashMap<EntryId, MerkleNode>,
    root_id: Option<EntryId>,
}

impl MerkleTree {
    /// Create an empty tree awaiting hydration.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root_id(&self) -> Option<&EntryId> {
        self.root_id.as_ref()
    }

    pub fn root(&self) -> Option<&MerkleNode> {
        self.root_id.as_ref().and_then(|id| self.nodes.get(id))
    }

    pub fn get(&self, entry_id: &EntryId) -> Option<&MerkleNode> {
        self.nodes.get(entry_id)
    }

    pub fn contains(&self, entry_id: &EntryId) -> bool {
        self.nodes.contains_key(entry_id)
    }

    /// Aggregate digest of the root, or [`Digest::ZERO`] for an empty tree.
    pub fn root_digest(&self) -> Digest {
        self.root().map_or(Digest::ZERO, MerkleNode::aggregate_digest)
    }

    /// Iterate all nodes in arbitrary order.
    pub fn nodes(&self) -> impl Iterator<Item = &MerkleNode> {
        self.nodes.values()
    }

    /// Insert a new entry under `parent_id` and propagate digests to the root.
    ///
    /// A `None` parent creates the root, which is only valid on an empty tree.
    pub fn insert(
        &mut self,
        parent_id: Option<&EntryId>,
        entry_id: EntryId,
        metadata: EntryMetadata,
    ) -> Result<()> {
        if self.nodes.contains_key(&entry_id) {
            return Err(TreeError::DuplicateEntry(entry_id));
        }

        match parent_id {
            None => {
                if let Some(root_id) = &self.root_id {
                    return Err(TreeError::RootAlreadyExists(root_id.clone()));
                }
                let node = MerkleNode::new(entry_id.clone(), None, metadata);
                self.nodes.insert(entry_id.clone(), node);
                self.root_id = Some(entry_id);
            }
            Some(parent_id) => {
                let Some(parent) = self.nodes.get_mut(parent_id) else {
                    return Err(TreeError::ParentNotFound(parent_id.clone()));
                };
                let node = MerkleNode::new(entry_id.clone(), Some(parent_id.clone()), metadata);
                parent.children.insert(entry_id.clone(), node.aggregate_digest);
                self.nodes.insert(entry_id, node);
                self.propagate_from(parent_id);
            }
        }

        Ok(())
    }

    /// Remove an entry and its entire subtree.
    ///
    /// Returns the removed entries in pre-order (the entry itself first,
    /// children in `entry_id` order), which is a valid re-insertion order.
    pub fn remove(&mut self, entry_id: &EntryId) -> Result<Vec<EntryRecord>> {
        let Some(node) = self.nodes.get(entry_id) else {
            return Err(TreeError::EntryNotFound(entry_id.clone()));
        };
        let Some(parent_id) = node.parent_id.clone() else {
            return Err(TreeError::CannotRemoveRoot(entry_id.clone()));
        };

        let order: Vec<EntryId> = self
            .preorder(entry_id)
            .map(|n| n.entry_id.clone())
            .collect();
        let mut removed = Vec::with_capacity(order.len());
        for id in order {
            if let Some(node) = self.nodes.remove(&id) {
                removed.push(EntryRecord::new(node.entry_id, node.parent_id, node.metadata));
            }
        }

        if let Some(parent) = self.nodes.get_mut(&parent_id) {
            parent.children.remove(entry_id);
        }
        self.propagate_from(&parent_id);

        Ok(removed)
    }

    /// Replace an entry's metadata. Returns the previous metadata.
    pub fn update_metadata(
        &mut self,
        entry_id: &EntryId,
        metadata: EntryMetadata,
    ) -> Result<EntryMetadata> {
        let Some(node) = self.nodes.get_mut(entry_id) else {
            return Err(TreeError::EntryNotFound(entry_id.clone()));
        };
        node.own_digest = digest_of_metadata(&metadata);
        let previous = std::mem::replace(&mut node.metadata, metadata);
        self.propagate_from(entry_id);
        Ok(previous)
    }

    /// Move an entry (with its subtree) under a new parent, optionally
    /// replacing its metadata.
    ///
    /// Performed as a remove followed by a re-insert of the same records.
    /// All preconditions are checked first, so a failed move leaves the tree
    /// untouched. Returns the previous parent and previous metadata.
    pub fn move_entry(
        &mut self,
        entry_id: &EntryId,
        new_parent_id: &EntryId,
        metadata: Option<EntryMetadata>,
    ) -> Result<(EntryId, EntryMetadata)> {
        let Some(node) = self.nodes.get(entry_id) else {
            return Err(TreeError::EntryNotFound(entry_id.clone()));
        };
        let Some(previous_parent) = node.parent_id.clone() else {
            return Err(TreeError::CannotRemoveRoot(entry_id.clone()));
        };
        if !self.nodes.contains_key(new_parent_id) {
            return Err(TreeError::ParentNotFound(new_parent_id.clone()));
        }
        if self.is_within_subtree(entry_id, new_parent_id) {
            return Err(TreeError::InvalidMove {
                entry_id: entry_id.clone(),
                new_parent_id: new_parent_id.clone(),
            });
        }
        let previous_metadata = node.metadata.clone();

        let mut records = self.remove(entry_id)?;
        if let Some(head) = records.first_mut() {
            head.parent_id = Some(new_parent_id.clone());
            if let Some(metadata) = metadata {
                head.metadata = metadata;
            }
        }
        for record in records {
            self.insert(record.parent_id.as_ref(), record.entry_id, record.metadata)?;
        }

        Ok((previous_parent, previous_metadata))
    }

    /// Whether `entry_id` is `ancestor_id` or lies beneath it.
    pub fn is_within_subtree(&self, ancestor_id: &EntryId, entry_id: &EntryId) -> bool {
        let mut current = Some(entry_id);
        // Bounded so a corrupted parent cycle cannot spin forever.
        for _ in 0..=self.nodes.len() {
            let Some(id) = current else {
                return false;
            };
            if id == ancestor_id {
                return true;
            }
            current = self.nodes.get(id).and_then(MerkleNode::parent_id);
        }
        false
    }

    /// Depth of an entry (root is 0).
    pub fn depth(&self, entry_id: &EntryId) -> Option<usize> {
        let mut node = self.nodes.get(entry_id)?;
        let mut depth = 0;
        while let Some(parent_id) = &node.parent_id {
            node = self.nodes.get(parent_id)?;
            depth += 1;
        }
        Some(depth)
    }

    /// Lazily walk the subtree rooted at `entry_id` in pre-order, children in
    /// `entry_id` order.
    pub fn preorder<'a>(&'a self, entry_id: &EntryId) -> Preorder<'a> {
        let stack = self.nodes.get(entry_id).into_iter().collect();
        Preorder { tree: self, stack }
    }

    /// Records of the subtree rooted at `entry_id`, in pre-order.
    pub fn subtree_records(&self, entry_id: &EntryId) -> Vec<EntryRecord> {
        self.preorder(entry_id).map(MerkleNode::to_record).collect()
    }

    /// Records of the whole tree, parents before children.
    pub fn to_records(&self) -> Vec<EntryRecord> {
        match &self.root_id {
            Some(root_id) => self.subtree_records(root_id),
            None => Vec::new(),
        }
    }

    /// Build a tree from a flat entry list in O(n).
    ///
    /// Input order is irrelevant. Rejects duplicate ids, zero or multiple
    /// roots, entries whose parent is absent, and entries unreachable from
    /// the root (cycles). An empty input yields an empty tree.
    pub fn from_entries(records: impl IntoIterator<Item = EntryRecord>) -> Result<Self> {
        // 1. Index nodes, find the root
        let mut nodes: HashMap<EntryId, MerkleNode> = HashMap::new();
        let mut root_id: Option<EntryId> = None;
        for record in records {
            if nodes.contains_key(&record.entry_id) {
                return Err(TreeError::DuplicateEntry(record.entry_id));
            }
            if record.parent_id.is_none() {
                if let Some(first) = &root_id {
                    let (first, second) = if *first < record.entry_id {
                        (first.clone(), record.entry_id.clone())
                    } else {
                        (record.entry_id.clone(), first.clone())
                    };
                    return Err(TreeError::MultipleRoots { first, second });
                }
                root_id = Some(record.entry_id.clone());
            }
            let node = MerkleNode::new(record.entry_id.clone(), record.parent_id, record.metadata);
            nodes.insert(record.entry_id, node);
        }

        if nodes.is_empty() {
            return Ok(Self::new());
        }
        let Some(root_id) = root_id else {
            return Err(TreeError::MissingRoot);
        };

        // 2. Link children (digests filled in below)
        let mut links: Vec<(EntryId, EntryId)> = Vec::with_capacity(nodes.len());
        for node in nodes.values() {
            if let Some(parent_id) = &node.parent_id {
                if !nodes.contains_key(parent_id) {
                    return Err(TreeError::ParentNotFound(parent_id.clone()));
                }
                links.push((parent_id.clone(), node.entry_id.clone()));
            }
        }
        for (parent_id, child_id) in links {
            if let Some(parent) = nodes.get_mut(&parent_id) {
                parent.children.insert(child_id, Digest::ZERO);
            }
        }

        let mut tree = Self {
            nodes,
            root_id: Some(root_id.clone()),
        };

        // 3. Reachability; anything not visited sits on a cycle
        let order: Vec<EntryId> = tree
            .preorder(&root_id)
            .map(|n| n.entry_id.clone())
            .collect();
        if order.len() != tree.nodes.len() {
            let mut unreachable: Vec<&EntryId> = tree
                .nodes
                .keys()
                .filter(|id| !tree.is_within_subtree(&root_id, id))
                .collect();
            unreachable.sort();
            let first = unreachable
                .first()
                .map(|id| (*id).clone())
                .unwrap_or_else(|| root_id.clone());
            return Err(TreeError::Orphaned(first));
        }

        // 4. Hash bottom-up: reverse pre-order visits children before parents
        for id in order.iter().rev() {
            let Some(node) = tree.nodes.get_mut(id) else {
                continue;
            };
            node.recompute();
            let aggregate = node.aggregate_digest;
            if let Some(parent_id) = node.parent_id.clone() {
                if let Some(parent) = tree.nodes.get_mut(&parent_id) {
                    parent.children.insert(id.clone(), aggregate);
                }
            }
        }

        Ok(tree)
    }

    /// Re-derive every digest and structural invariant.
    pub fn verify_integrity(&self) -> Result<()> {
        let Some(root_id) = &self.root_id else {
            if self.nodes.is_empty() {
                return Ok(());
            }
            return Err(TreeError::MissingRoot);
        };
        let Some(root) = self.nodes.get(root_id) else {
            return Err(TreeError::Corrupt(format!("root {root_id} is not in the arena")));
        };
        if !root.is_root() {
            return Err(TreeError::Corrupt(format!("root {root_id} has a parent")));
        }

        let mut visited = 0usize;
        for node in self.preorder(root_id) {
            visited += 1;
            if visited > self.nodes.len() {
                return Err(TreeError::Corrupt("child links form a cycle".into()));
            }

            if node.parent_id.is_none() && node.entry_id != *root_id {
                return Err(TreeError::MultipleRoots {
                    first: root_id.clone(),
                    second: node.entry_id.clone(),
                });
            }

            let own = digest_of_metadata(&node.metadata);
            if own != node.own_digest {
                return Err(TreeError::DigestMismatch {
                    entry_id: node.entry_id.clone(),
                    expected: node.own_digest,
                    computed: own,
                });
            }

            for (child_id, cached) in &node.children {
                let Some(child) = self.nodes.get(child_id) else {
                    return Err(TreeError::Corrupt(format!(
                        "{} lists missing child {child_id}",
                        node.entry_id
                    )));
                };
                if child.parent_id.as_ref() != Some(&node.entry_id) {
                    return Err(TreeError::Corrupt(format!(
                        "{child_id} is listed under {} but points elsewhere",
                        node.entry_id
                    )));
                }
                if child.aggregate_digest != *cached {
                    return Err(TreeError::DigestMismatch {
                        entry_id: child_id.clone(),
                        expected: *cached,
                        computed: child.aggregate_digest,
                    });
                }
            }

            let aggregate = digest_of_node(&node.own_digest, &node.children);
            if aggregate != node.aggregate_digest {
                return Err(TreeError::DigestMismatch {
                    entry_id: node.entry_id.clone(),
                    expected: node.aggregate_digest,
                    computed: aggregate,
                });
            }
        }

        if visited != self.nodes.len() {
            let mut stray: Vec<&EntryId> = self
                .nodes
                .keys()
                .filter(|id| !self.is_within_subtree(root_id, id))
                .collect();
            stray.sort();
            return match stray.first() {
                Some(id) => Err(TreeError::Orphaned((*id).clone())),
                None => Err(TreeError::Corrupt("unreachable entries".into())),
            };
        }

        Ok(())
    }

    /// Recompute aggregates from `start` up to the root.
    fn propagate_from(&mut self, start: &EntryId) {
        let mut current = Some(start.clone());
        while let Some(id) = current {
            let Some(node) = self.nodes.get_mut(&id) else {
                break;
            };
            node.recompute();
            let aggregate = node.aggregate_digest;
            current = node.parent_id.clone();
            if let Some(parent_id) = &current {
                if let Some(parent) = self.nodes.get_mut(parent_id) {
                    parent.children.insert(id, aggregate);
                }
            }
        }
    }
}

/// Pre-order iterator over a subtree.
pub struct Preorder<'a> {
    tree: &'a MerkleTree,
    stack: Vec<&'a MerkleNode>,
}

impl<'a> Iterator for Preorder<'a> {
    type Item = &'a MerkleNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        for child_id in node.children.keys().rev() {
            if let Some(child) = self.tree.nodes.get(child_id) {
                self.stack.push(child);
            }
        }
        Some(node)
    }
}
