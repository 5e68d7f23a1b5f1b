//! Read-only digest views over a tree.
//!
//! The diff descent only needs digests and child sets, so it runs against a
//! [`DigestView`]. A [`RemoteView`] is the state a requester held at some
//! journaled root digest: the current tree plus an overlay of only the nodes
//! that changed since, rebuilt by undoing journal revisions newest-first.

use std::collections::{BTreeMap, HashMap, HashSet};

use fstree_core::error::Result;
use fstree_core::{
    digest_of_metadata, digest_of_node, Change, Digest, EntryId, MerkleTree, Revision, TreeError,
};

/// Digest-level access to a tree.
pub trait DigestView {
    fn root_id(&self) -> Option<&EntryId>;

    fn own_digest(&self, entry_id: &EntryId) -> Option<Digest>;

    fn aggregate_digest(&self, entry_id: &EntryId) -> Option<Digest>;

    /// Children with their aggregate digests, in `entry_id` order.
    fn children(&self, entry_id: &EntryId) -> Option<&BTreeMap<EntryId, Digest>>;

    fn root_digest(&self) -> Digest {
        self.root_id()
            .and_then(|id| self.aggregate_digest(id))
            .unwrap_or(Digest::ZERO)
    }
}

impl DigestView for MerkleTree {
    fn root_id(&self) -> Option<&EntryId> {
        MerkleTree::root_id(self)
    }

    fn own_digest(&self, entry_id: &EntryId) -> Option<Digest> {
        self.get(entry_id).map(|n| n.own_digest())
    }

    fn aggregate_digest(&self, entry_id: &EntryId) -> Option<Digest> {
        self.get(entry_id).map(|n| n.aggregate_digest())
    }

    fn children(&self, entry_id: &EntryId) -> Option<&BTreeMap<EntryId, Digest>> {
        self.get(entry_id).map(|n| n.children())
    }
}

/// A node that differs between the base tree and the view.
#[derive(Debug, Clone)]
struct ViewNode {
    parent_id: Option<EntryId>,
    own_digest: Digest,
    aggregate_digest: Digest,
    children: BTreeMap<EntryId, Digest>,
}

/// The tree as it was before a run of revisions.
///
/// Overlay entries shadow the base: `Some` replaces a node, `None` hides it.
pub struct RemoteView<'a> {
    base: &'a MerkleTree,
    overlay: HashMap<EntryId, Option<ViewNode>>,
    root_id: Option<EntryId>,
}

impl<'a> RemoteView<'a> {
    /// A view identical to `base`.
    pub fn new(base: &'a MerkleTree) -> Self {
        Self {
            base,
            overlay: HashMap::new(),
            root_id: base.root_id().cloned(),
        }
    }

    /// Undo `revisions` (oldest first, ending at the current state) on top
    /// of `base`.
    pub fn reconstruct<'r, I>(base: &'a MerkleTree, revisions: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'r Revision>,
        I::IntoIter: DoubleEndedIterator,
    {
        let mut view = Self::new(base);
        let mut dirty = HashSet::new();

        for revision in revisions.into_iter().rev() {
            view.undo(&revision.change, &mut dirty)?;
        }
        view.recompute(dirty);
        Ok(view)
    }

    /// Number of nodes that differ from the base tree.
    pub fn overlay_len(&self) -> usize {
        self.overlay.len()
    }

    fn parent_id(&self, entry_id: &EntryId) -> Option<EntryId> {
        match self.overlay.get(entry_id) {
            Some(node) => node.as_ref().and_then(|n| n.parent_id.clone()),
            None => self.base.get(entry_id).and_then(|n| n.parent_id().cloned()),
        }
    }

    fn contains(&self, entry_id: &EntryId) -> bool {
        match self.overlay.get(entry_id) {
            Some(node) => node.is_some(),
            None => self.base.contains(entry_id),
        }
    }

    /// Copy a base node into the overlay so it can be edited.
    fn materialize(&mut self, entry_id: &EntryId) -> Result<&mut ViewNode> {
        if !self.overlay.contains_key(entry_id) {
            let copied = self.base.get(entry_id).map(|n| ViewNode {
                parent_id: n.parent_id().cloned(),
                own_digest: n.own_digest(),
                aggregate_digest: n.aggregate_digest(),
                children: n.children().clone(),
            });
            self.overlay.insert(entry_id.clone(), copied);
        }
        self.overlay
            .get_mut(entry_id)
            .and_then(Option::as_mut)
            .ok_or_else(|| TreeError::Corrupt(format!("journal refers to missing entry {entry_id}")))
    }

    fn undo(&mut self, change: &Change, dirty: &mut HashSet<EntryId>) -> Result<()> {
        match change {
            Change::Inserted {
                entry_id,
                parent_id,
            } => {
                self.overlay.insert(entry_id.clone(), None);
                match parent_id {
                    Some(parent_id) => {
                        self.materialize(parent_id)?.children.remove(entry_id);
                        dirty.insert(parent_id.clone());
                    }
                    None => self.root_id = None,
                }
            }

            Change::Removed { records } => {
                // Pre-order: every parent is restored before its children.
                for record in records {
                    self.overlay.insert(
                        record.entry_id.clone(),
                        Some(ViewNode {
                            parent_id: record.parent_id.clone(),
                            own_digest: digest_of_metadata(&record.metadata),
                            aggregate_digest: Digest::ZERO,
                            children: BTreeMap::new(),
                        }),
                    );
                    match &record.parent_id {
                        Some(parent_id) => {
                            self.materialize(parent_id)?
                                .children
                                .insert(record.entry_id.clone(), Digest::ZERO);
                            dirty.insert(parent_id.clone());
                        }
                        None => self.root_id = Some(record.entry_id.clone()),
                    }
                    dirty.insert(record.entry_id.clone());
                }
            }

            Change::Updated { entry_id, previous } => {
                self.materialize(entry_id)?.own_digest = digest_of_metadata(previous);
                dirty.insert(entry_id.clone());
            }

            Change::Moved {
                entry_id,
                previous_parent,
                new_parent,
                previous_metadata,
            } => {
                self.materialize(new_parent)?.children.remove(entry_id);
                self.materialize(previous_parent)?
                    .children
                    .insert(entry_id.clone(), Digest::ZERO);
                let node = self.materialize(entry_id)?;
                node.parent_id = Some(previous_parent.clone());
                node.own_digest = digest_of_metadata(previous_metadata);

                dirty.insert(new_parent.clone());
                dirty.insert(previous_parent.clone());
                dirty.insert(entry_id.clone());
            }
        }
        Ok(())
    }

    /// Recompute aggregates for every dirty node and its ancestors, deepest
    /// first.
    fn recompute(&mut self, dirty: HashSet<EntryId>) {
        let limit = self.base.len() + self.overlay.len() + 1;

        let mut pending: HashMap<EntryId, usize> = HashMap::new();
        for entry_id in dirty {
            if !self.contains(&entry_id) || pending.contains_key(&entry_id) {
                continue;
            }
            let mut chain = vec![entry_id];
            let mut cursor = self.parent_id(&chain[0]);
            while let Some(parent) = cursor {
                if chain.len() > limit {
                    break;
                }
                cursor = self.parent_id(&parent);
                chain.push(parent);
            }
            // chain runs node..root, so depth is distance from the end
            let len = chain.len();
            for (i, id) in chain.into_iter().enumerate() {
                pending.entry(id).or_insert(len - 1 - i);
            }
        }

        let mut order: Vec<(usize, EntryId)> =
            pending.into_iter().map(|(id, depth)| (depth, id)).collect();
        order.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        for (_, entry_id) in order {
            let Some(child_ids) = self.children(&entry_id).map(|c| {
                c.keys().cloned().collect::<Vec<_>>()
            }) else {
                continue;
            };
            let children: BTreeMap<EntryId, Digest> = child_ids
                .into_iter()
                .filter_map(|id| {
                    let digest = self.aggregate_digest(&id)?;
                    Some((id, digest))
                })
                .collect();

            if let Ok(node) = self.materialize(&entry_id) {
                node.aggregate_digest = digest_of_node(&node.own_digest, &children);
                node.children = children;
            }
        }
    }
}

impl DigestView for RemoteView<'_> {
    fn root_id(&self) -> Option<&EntryId> {
        self.root_id.as_ref()
    }

    fn own_digest(&self, entry_id: &EntryId) -> Option<Digest> {
        match self.overlay.get(entry_id) {
            Some(node) => node.as_ref().map(|n| n.own_digest),
            None => self.base.get(entry_id).map(|n| n.own_digest()),
        }
    }

    fn aggregate_digest(&self, entry_id: &EntryId) -> Option<Digest> {
        match self.overlay.get(entry_id) {
            Some(node) => node.as_ref().map(|n| n.aggregate_digest),
            None => self.base.get(entry_id).map(|n| n.aggregate_digest()),
        }
    }

    fn children(&self, entry_id: &EntryId) -> Option<&BTreeMap<EntryId, Digest>> {
        match self.overlay.get(entry_id) {
            Some(node) => node.as_ref().map(|n| &n.children),
            None => self.base.get(entry_id).map(|n| n.children()),
        }
    }
}
