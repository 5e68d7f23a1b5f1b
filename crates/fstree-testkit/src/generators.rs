//! Proptest generators for property-based testing.

use std::collections::BTreeMap;

use proptest::prelude::*;

use fstree_core::{EntryId, EntryKind, EntryMetadata, EntryRecord, MerkleTree, VersionedTree};

use crate::fixtures::TreeEvent;

/// Generate an entry name (never the root name).
pub fn entry_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9._-]{0,15}".prop_map(String::from)
}

/// Generate an EntryKind.
pub fn entry_kind() -> impl Strategy<Value = EntryKind> {
    prop_oneof![Just(EntryKind::File), Just(EntryKind::Directory)]
}

/// Generate a last-modified marker, including pre-epoch values.
pub fn modified() -> impl Strategy<Value = i64> {
    -1_000_000i64..=2_000_000_000i64
}

/// Generate a small replicated attribute map.
pub fn attributes() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map("[a-z]{1,8}", "[ -~]{0,24}", 0..4)
}

/// Generate entry metadata with a few attributes and hints.
pub fn metadata() -> impl Strategy<Value = EntryMetadata> {
    (
        entry_name(),
        entry_kind(),
        0u64..=1_000_000u64,
        modified(),
        attributes(),
        prop::collection::btree_map("[a-z]{1,6}", "[a-z0-9]{0,8}", 0..2),
    )
        .prop_map(|(name, kind, size, modified, attributes, hints)| EntryMetadata {
            name,
            kind,
            size,
            modified,
            attributes,
            hints,
        })
}

/// Parameters for generating a tree.
///
/// Each entry picks its parent among the directories generated before it,
/// so any list yields a valid tree rooted at `root`.
#[derive(Debug, Clone)]
pub struct TreeParams {
    pub entries: Vec<(usize, EntryMetadata)>,
}

impl Arbitrary for TreeParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        prop::collection::vec((any::<usize>(), metadata()), 0..32)
            .prop_map(|entries| TreeParams { entries })
            .boxed()
    }
}

impl TreeParams {
    /// Source rows, parents before children.
    pub fn records(&self) -> Vec<EntryRecord> {
        let root = EntryId::from("root");
        let mut dirs = vec![root.clone()];
        let mut records = vec![EntryRecord::new(
            root,
            None,
            EntryMetadata::directory("/", 0),
        )];

        for (i, (pick, metadata)) in self.entries.iter().enumerate() {
            let entry_id = EntryId::new(format!("e{i:03}"));
            let parent_id = dirs[pick % dirs.len()].clone();
            if metadata.is_dir() {
                dirs.push(entry_id.clone());
            }
            records.push(EntryRecord::new(entry_id, Some(parent_id), metadata.clone()));
        }
        records
    }

    /// Build by inserting rows one at a time.
    pub fn build(&self) -> MerkleTree {
        let mut tree = MerkleTree::new();
        for r in self.records() {
            if let Err(e) = tree.insert(r.parent_id.as_ref(), r.entry_id, r.metadata) {
                panic!("generated rows do not form a tree: {e}");
            }
        }
        tree
    }
}

/// A mutation described by positions rather than ids, resolved against
/// whatever tree it is applied to.
#[derive(Debug, Clone)]
pub enum MutationPick {
    Insert { parent: usize, metadata: EntryMetadata },
    Remove { target: usize },
    Update { target: usize, metadata: EntryMetadata },
    Move { target: usize, parent: usize },
}

/// Generate one mutation pick.
pub fn mutation_pick() -> impl Strategy<Value = MutationPick> {
    prop_oneof![
        3 => (any::<usize>(), metadata())
            .prop_map(|(parent, metadata)| MutationPick::Insert { parent, metadata }),
        2 => any::<usize>().prop_map(|target| MutationPick::Remove { target }),
        2 => (any::<usize>(), metadata())
            .prop_map(|(target, metadata)| MutationPick::Update { target, metadata }),
        1 => (any::<usize>(), any::<usize>())
            .prop_map(|(target, parent)| MutationPick::Move { target, parent }),
    ]
}

impl MutationPick {
    /// The concrete event this pick names in `tree`, if any. New entries
    /// are named `m{serial}`.
    pub fn resolve(&self, tree: &MerkleTree, serial: usize) -> Option<TreeEvent> {
        let mut all: Vec<&EntryId> = tree.nodes().map(|n| n.entry_id()).collect();
        all.sort();
        let non_root: Vec<&EntryId> = all
            .iter()
            .copied()
            .filter(|id| tree.get(id).is_some_and(|n| !n.is_root()))
            .collect();
        let dirs: Vec<&EntryId> = all
            .iter()
            .copied()
            .filter(|id| tree.get(id).is_some_and(|n| n.metadata().is_dir()))
            .collect();

        match self {
            MutationPick::Insert { parent, metadata } => Some(TreeEvent::Insert {
                parent_id: Some(nth(&dirs, *parent)?),
                entry_id: EntryId::new(format!("m{serial:03}")),
                metadata: metadata.clone(),
            }),
            MutationPick::Remove { target } => Some(TreeEvent::Remove {
                entry_id: nth(&non_root, *target)?,
            }),
            MutationPick::Update { target, metadata } => {
                let entry_id = nth(&all, *target)?;
                let mut metadata = metadata.clone();
                // Keep directories as directories so children stay valid
                if let Some(node) = tree.get(&entry_id) {
                    metadata.kind = node.metadata().kind;
                    if node.is_root() {
                        metadata.name = "/".into();
                    }
                }
                Some(TreeEvent::Update { entry_id, metadata })
            }
            MutationPick::Move { target, parent } => {
                let entry_id = nth(&non_root, *target)?;
                let new_parent_id = nth(&dirs, *parent)?;
                if tree.is_within_subtree(&entry_id, &new_parent_id) {
                    return None;
                }
                Some(TreeEvent::Move {
                    entry_id,
                    new_parent_id,
                    metadata: None,
                })
            }
        }
    }
}

fn nth(ids: &[&EntryId], n: usize) -> Option<EntryId> {
    if ids.is_empty() {
        None
    } else {
        Some(ids[n % ids.len()].clone())
    }
}

/// A sequence of mutations.
#[derive(Debug, Clone)]
pub struct MutationPlan {
    pub picks: Vec<MutationPick>,
}

impl Arbitrary for MutationPlan {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        prop::collection::vec(mutation_pick(), 0..24)
            .prop_map(|picks| MutationPlan { picks })
            .boxed()
    }
}

impl MutationPlan {
    /// Apply every resolvable pick. Returns the events applied.
    pub fn apply(&self, tree: &mut VersionedTree) -> Vec<TreeEvent> {
        let mut applied = Vec::new();
        for (serial, pick) in self.picks.iter().enumerate() {
            let Some(event) = pick.resolve(tree.tree(), serial) else {
                continue;
            };
            if event.apply(tree).is_ok() {
                applied.push(event);
            }
        }
        applied
    }
}
