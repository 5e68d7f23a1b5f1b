//! Golden test vectors for deterministic verification.
//!
//! Canonical vectors pin the exact metadata encoding, so any two builds
//! agree on every digest. Scenario vectors pin the repair operations a
//! primary emits for small, hand-checked histories.

use fstree_core::{
    canonical_metadata_bytes, EntryMetadata, EntryRecord, MerkleTree, UserId, VersionedTree,
};
use serde::Serialize;

use fstree_sync::{DiffEngine, KnownState, PullDiffResponse, RepairOp, Replica};

use crate::fixtures::{docs_records, id, photos_records, tree_of, TreeEvent};

/// A metadata value and its expected canonical bytes.
#[derive(Debug, Clone, Serialize)]
pub struct CanonicalVector {
    pub name: &'static str,
    pub metadata: EntryMetadata,
    /// Expected canonical encoding (hex).
    pub expected_hex: &'static str,
}

/// Get all canonical encoding vectors.
pub fn canonical_vectors() -> Vec<CanonicalVector> {
    vec![
        CanonicalVector {
            name: "minimal file",
            metadata: EntryMetadata::file("a", 1, 0),
            expected_hex: "a500616101000201030004a0",
        },
        CanonicalVector {
            name: "directory with pre-epoch timestamp",
            metadata: EntryMetadata::directory("docs", -1),
            expected_hex: "a50064646f637301010200032004a0",
        },
        CanonicalVector {
            name: "file with attribute",
            metadata: EntryMetadata::file("readme.md", 1024, 1_700_000_000)
                .with_attribute("path", "/r"),
            expected_hex: "a50069726561646d652e6d64010002190400031a6553f10004a16470617468622f72",
        },
        CanonicalVector {
            name: "hints are not encoded",
            metadata: EntryMetadata::file("a", 1, 0).with_hint("cache", "warm"),
            expected_hex: "a500616101000201030004a0",
        },
    ]
}

/// Canonical vectors as JSON, for checking other encoders against.
pub fn canonical_vectors_json() -> serde_json::Result<String> {
    serde_json::to_string_pretty(&canonical_vectors())
}

/// A small history and the repair operations it must produce.
#[derive(Debug, Clone)]
pub struct ScenarioVector {
    pub name: &'static str,
    pub description: &'static str,
    /// The tree the replica holds.
    pub initial: Vec<EntryRecord>,
    /// Changes applied on the primary afterwards.
    pub events: Vec<TreeEvent>,
    /// What PullDiff must return for the initial root digest.
    pub expected_ops: Vec<RepairOp>,
}

fn insert_op(entry_id: &str, parent_id: &str, metadata: EntryMetadata) -> RepairOp {
    RepairOp::Insert {
        entry_id: id(entry_id),
        parent_id: id(parent_id),
        metadata,
    }
}

/// Get all scenario vectors.
pub fn scenario_vectors() -> Vec<ScenarioVector> {
    let readme = EntryMetadata::file("readme.md", 1024, 1_700_000_000);
    let edited = EntryMetadata::file("readme.md", 2048, 1_700_000_500);

    vec![
        ScenarioVector {
            name: "remove leaf",
            description: "a single file disappears",
            initial: docs_records(),
            events: vec![TreeEvent::remove("readme")],
            expected_ops: vec![RepairOp::Remove {
                entry_id: id("readme"),
            }],
        },
        ScenarioVector {
            name: "insert subtree",
            description: "a directory and its file are created",
            initial: docs_records(),
            events: vec![
                TreeEvent::insert("root", "music", EntryMetadata::directory("music", 0)),
                TreeEvent::insert("music", "song", EntryMetadata::file("song.ogg", 3_000, 0)),
            ],
            expected_ops: vec![
                insert_op("music", "root", EntryMetadata::directory("music", 0)),
                insert_op("song", "music", EntryMetadata::file("song.ogg", 3_000, 0)),
            ],
        },
        ScenarioVector {
            name: "update metadata",
            description: "a file grows",
            initial: docs_records(),
            events: vec![TreeEvent::update("readme", edited.clone())],
            expected_ops: vec![RepairOp::Update {
                entry_id: id("readme"),
                metadata: edited,
            }],
        },
        ScenarioVector {
            name: "move between directories",
            description: "a file is moved from /docs to /photos",
            initial: photos_records(),
            events: vec![TreeEvent::relocate("readme", "photos")],
            expected_ops: vec![
                RepairOp::Remove {
                    entry_id: id("readme"),
                },
                insert_op("readme", "photos", readme.clone()),
            ],
        },
        ScenarioVector {
            name: "insert then remove",
            description: "a transient file leaves no trace",
            initial: docs_records(),
            events: vec![
                TreeEvent::insert("docs", "tmp", EntryMetadata::file("tmp", 1, 0)),
                TreeEvent::remove("tmp"),
            ],
            expected_ops: vec![],
        },
        ScenarioVector {
            name: "hint-only update",
            description: "a local hint changes and nothing replicates",
            initial: docs_records(),
            events: vec![TreeEvent::update(
                "readme",
                readme.with_hint("thumbnail", "cached"),
            )],
            expected_ops: vec![],
        },
        ScenarioVector {
            name: "rename directory",
            description: "a directory's name changes, its children do not",
            initial: docs_records(),
            events: vec![TreeEvent::update(
                "docs",
                EntryMetadata::directory("documents", 0),
            )],
            expected_ops: vec![RepairOp::Update {
                entry_id: id("docs"),
                metadata: EntryMetadata::directory("documents", 0),
            }],
        },
        ScenarioVector {
            name: "sibling ordering",
            description: "inserts come out in entry id order, not arrival order",
            initial: docs_records(),
            events: vec![
                TreeEvent::insert("root", "b", EntryMetadata::file("b", 2, 0)),
                TreeEvent::insert("root", "a", EntryMetadata::file("a", 1, 0)),
            ],
            expected_ops: vec![
                insert_op("a", "root", EntryMetadata::file("a", 1, 0)),
                insert_op("b", "root", EntryMetadata::file("b", 2, 0)),
            ],
        },
    ]
}

/// Replay a scenario on a primary, then apply the resulting diff to a
/// replica bootstrapped from the initial state.
///
/// Returns the operations the primary produced, or a description of the
/// first step that failed.
pub fn run_scenario(vector: &ScenarioVector) -> Result<Vec<RepairOp>, String> {
    let initial = MerkleTree::from_entries(vector.initial.clone())
        .map_err(|e| format!("initial rows invalid: {e}"))?;
    let initial_digest = initial.root_digest();
    let snapshot = initial.snapshot();

    let mut primary = VersionedTree::from_tree(initial, 64);
    for event in &vector.events {
        event
            .apply(&mut primary)
            .map_err(|e| format!("event {event:?} failed: {e}"))?;
    }

    let root_id = primary
        .tree()
        .root_id()
        .cloned()
        .ok_or_else(|| "primary has no root".to_string())?;
    let known: KnownState = [(root_id, initial_digest)].into_iter().collect();

    let (root_digest, ops) = match DiffEngine::default().pull_diff(&primary, &known) {
        PullDiffResponse::Diff { root_digest, ops } => (root_digest, ops),
        PullDiffResponse::PurgeRequired { reason } => {
            return Err(format!("unexpected purge: {reason:?}"));
        }
    };

    let mut replica = Replica::new(UserId(1));
    replica
        .bootstrap(&snapshot)
        .map_err(|e| format!("bootstrap failed: {e}"))?;
    replica
        .apply(root_digest, &ops)
        .map_err(|e| format!("repair failed: {e}"))?;
    if replica.root_digest() != primary.root_digest() {
        return Err("replica did not converge".into());
    }

    Ok(ops)
}

/// Check every vector. Returns `(name, passed, detail)` per vector.
pub fn verify_all_vectors() -> Vec<(String, bool, String)> {
    let canonical = canonical_vectors().into_iter().map(|v| {
        let actual = hex::encode(canonical_metadata_bytes(&v.metadata));
        let passed = actual == v.expected_hex;
        (v.name.to_string(), passed, actual)
    });

    let scenarios = scenario_vectors().into_iter().map(|v| match run_scenario(&v) {
        Ok(ops) => {
            let passed = ops == v.expected_ops;
            (v.name.to_string(), passed, format!("{} ops", ops.len()))
        }
        Err(detail) => (v.name.to_string(), false, detail),
    });

    canonical.chain(scenarios).collect()
}

/// The tree a scenario's replica starts from.
pub fn initial_tree(vector: &ScenarioVector) -> MerkleTree {
    tree_of(vector.initial.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fstree_core::digest_of_metadata;

    #[test]
    fn test_all_vectors_pass() {
        for (name, passed, detail) in verify_all_vectors() {
            assert!(passed, "vector '{name}' failed: {detail}");
        }
    }

    #[test]
    fn test_canonical_vectors_are_deterministic() {
        for vector in canonical_vectors() {
            let b1 = canonical_metadata_bytes(&vector.metadata);
            let b2 = canonical_metadata_bytes(&vector.metadata.clone());
            assert_eq!(b1, b2, "vector '{}' not deterministic", vector.name);
        }
    }

    #[test]
    fn test_distinct_vectors_distinct_digests() {
        let vectors = canonical_vectors();
        // The first and the hinted one share bytes; the rest must differ
        assert_eq!(
            digest_of_metadata(&vectors[0].metadata),
            digest_of_metadata(&vectors[3].metadata)
        );
        assert_ne!(
            digest_of_metadata(&vectors[0].metadata),
            digest_of_metadata(&vectors[1].metadata)
        );
        assert_ne!(
            digest_of_metadata(&vectors[1].metadata),
            digest_of_metadata(&vectors[2].metadata)
        );
    }

    #[test]
    fn test_json_export() {
        let json = canonical_vectors_json().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        let first = &parsed[0];
        assert_eq!(first["name"], "minimal file");
        assert_eq!(first["expected_hex"], "a500616101000201030004a0");
        assert_eq!(first["metadata"]["name"], "a");
    }

    #[test]
    fn test_scenarios_start_from_valid_trees() {
        for vector in scenario_vectors() {
            assert!(!initial_tree(&vector).is_empty(), "{}", vector.name);
        }
    }
}
