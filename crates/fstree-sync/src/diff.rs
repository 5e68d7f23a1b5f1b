//! Incremental repair computation.
//!
//! The descent compares aggregate digests top-down and stops at the first
//! match, so unaffected subtrees are never visited or transmitted.

use serde::{Deserialize, Serialize};

use fstree_core::{EntryId, MerkleTree, VersionedTree};

use crate::messages::{KnownState, PullDiffResponse, PurgeReason, RepairOp};
use crate::view::{DigestView, RemoteView};

/// Diff size threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    /// Operations beyond this turn a diff into a purge.
    pub max_ops: usize,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self { max_ops: 10_000 }
    }
}

/// Computes repair operations between a tree and a requester's state.
#[derive(Debug, Clone, Default)]
pub struct DiffEngine {
    config: DiffConfig,
}

enum Step<'a> {
    /// Both sides hold this entry; compare it.
    Visit(&'a EntryId),
    /// Only the local side holds this entry; send its whole subtree.
    Insert(&'a EntryId),
}

/// Aborts the descent once the op budget is spent.
struct TooLarge;

impl DiffEngine {
    pub fn new(config: DiffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DiffConfig {
        &self.config
    }

    /// Answer a PullDiff against a journaled tree.
    pub fn pull_diff(&self, local: &VersionedTree, known_state: &KnownState) -> PullDiffResponse {
        let tree = local.tree();
        let Some(root_id) = tree.root_id() else {
            return purge(PurgeReason::NotInitialized);
        };
        let Some(claimed) = known_state.get(root_id) else {
            return purge(PurgeReason::Absent);
        };

        if *claimed == tree.root_digest() {
            if !agrees_with(tree, known_state) {
                return purge(PurgeReason::InconsistentState);
            }
            return PullDiffResponse::Diff {
                root_digest: tree.root_digest(),
                ops: Vec::new(),
            };
        }

        let Some(revisions) = local.journal().revisions_since(claimed) else {
            tracing::debug!(claimed = %claimed, "requester root not in journal");
            return purge(PurgeReason::Unrecognized);
        };

        let view = match RemoteView::reconstruct(tree, revisions) {
            Ok(view) => view,
            Err(e) => {
                tracing::warn!(error = %e, "journal replay failed");
                return purge(PurgeReason::InconsistentState);
            }
        };
        if view.root_digest() != *claimed {
            tracing::warn!(
                claimed = %claimed,
                reconstructed = %view.root_digest(),
                "reconstructed view disagrees with journal"
            );
            return purge(PurgeReason::Unrecognized);
        }
        if !agrees_with(&view, known_state) {
            return purge(PurgeReason::InconsistentState);
        }

        self.diff(tree, &view)
    }

    /// Operations that turn `remote` into `local`.
    pub fn diff<R: DigestView>(&self, local: &MerkleTree, remote: &R) -> PullDiffResponse {
        let root_digest = local.root_digest();
        if remote.root_digest() == root_digest {
            return PullDiffResponse::Diff {
                root_digest,
                ops: Vec::new(),
            };
        }

        let (Some(local_root), Some(remote_root)) = (local.root_id(), remote.root_id()) else {
            return purge(PurgeReason::Absent);
        };
        if local_root != remote_root {
            return purge(PurgeReason::Unrecognized);
        }

        match self.descend(local, remote, local_root) {
            Ok(ops) => {
                tracing::debug!(ops = ops.len(), root = %root_digest, "diff computed");
                PullDiffResponse::Diff { root_digest, ops }
            }
            Err(TooLarge) => {
                tracing::debug!(max_ops = self.config.max_ops, "diff exceeds threshold");
                purge(PurgeReason::DiffTooLarge)
            }
        }
    }

    fn descend<R: DigestView>(
        &self,
        local: &MerkleTree,
        remote: &R,
        root_id: &EntryId,
    ) -> Result<Vec<RepairOp>, TooLarge> {
        let mut removes = Vec::new();
        let mut rest = Vec::new();
        let mut stack = vec![Step::Visit(root_id)];

        let budget = |removes: &Vec<RepairOp>, rest: &Vec<RepairOp>| {
            if removes.len() + rest.len() > self.config.max_ops {
                Err(TooLarge)
            } else {
                Ok(())
            }
        };

        while let Some(step) = stack.pop() {
            match step {
                Step::Insert(entry_id) => {
                    for node in local.preorder(entry_id) {
                        let Some(parent_id) = node.parent_id() else {
                            continue;
                        };
                        rest.push(RepairOp::Insert {
                            entry_id: node.entry_id().clone(),
                            parent_id: parent_id.clone(),
                            metadata: node.metadata().clone(),
                        });
                        budget(&removes, &rest)?;
                    }
                }

                Step::Visit(entry_id) => {
                    let Some(node) = local.get(entry_id) else {
                        continue;
                    };
                    if remote.aggregate_digest(entry_id) == Some(node.aggregate_digest()) {
                        continue;
                    }
                    if remote.own_digest(entry_id) != Some(node.own_digest()) {
                        rest.push(RepairOp::Update {
                            entry_id: entry_id.clone(),
                            metadata: node.metadata().clone(),
                        });
                    }

                    let local_children = node.children();
                    let empty = Default::default();
                    let remote_children = remote.children(entry_id).unwrap_or(&empty);

                    for child in remote_children.keys() {
                        if !local_children.contains_key(child) {
                            removes.push(RepairOp::Remove {
                                entry_id: child.clone(),
                            });
                        }
                    }

                    // Reversed so the stack yields children in sorted order.
                    for (child, digest) in local_children.iter().rev() {
                        match remote_children.get(child) {
                            None => stack.push(Step::Insert(child)),
                            Some(remote_digest) if remote_digest != digest => {
                                stack.push(Step::Visit(child))
                            }
                            Some(_) => {}
                        }
                    }
                    budget(&removes, &rest)?;
                }
            }
        }

        removes.extend(rest);
        Ok(removes)
    }
}

fn purge(reason: PurgeReason) -> PullDiffResponse {
    PullDiffResponse::PurgeRequired { reason }
}

/// Every digest the requester reports must match the view.
fn agrees_with<V: DigestView>(view: &V, known_state: &KnownState) -> bool {
    known_state
        .iter()
        .all(|(entry_id, digest)| view.aggregate_digest(entry_id) == Some(*digest))
}
