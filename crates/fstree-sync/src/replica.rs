//! Client side of the replication protocol.
//!
//! A [`Replica`] is a secondary copy of one user's tree. It is either
//! UNSYNCED (no usable state) or SYNCED (holds a verified tree at a known
//! root digest). Any purge, failed repair or refused diff drops it back to
//! UNSYNCED, from which the only way forward is a full FetchReplica.
//!
//! [`ReplicaSession`] drives a replica against a primary over a
//! [`Transport`].

use std::time::Duration;

use fstree_core::{Digest, EntryId, MerkleTree, TreeError, TreeSnapshot, UserId};

use crate::error::{Result, SyncError};
use crate::messages::{
    limits, KnownState, NodeId, PullDiffResponse, PurgeReason, RepairOp, SyncMessage,
};
use crate::transport::Transport;

/// Client-observed replication state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaState {
    Unsynced,
    Synced,
}

/// A secondary copy of one user's tree.
#[derive(Debug, Clone)]
pub struct Replica {
    user_id: UserId,
    tree: MerkleTree,
    state: ReplicaState,
}

impl Replica {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            tree: MerkleTree::new(),
            state: ReplicaState::Unsynced,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn state(&self) -> ReplicaState {
        self.state
    }

    pub fn is_synced(&self) -> bool {
        self.state == ReplicaState::Synced
    }

    pub fn tree(&self) -> &MerkleTree {
        &self.tree
    }

    pub fn root_digest(&self) -> Digest {
        self.tree.root_digest()
    }

    /// Replace local state with a verified snapshot.
    pub fn bootstrap(&mut self, snapshot: &TreeSnapshot) -> Result<()> {
        match MerkleTree::from_snapshot(snapshot) {
            Ok(tree) => {
                self.tree = tree;
                self.state = ReplicaState::Synced;
                Ok(())
            }
            Err(e) => {
                self.reset();
                Err(e.into())
            }
        }
    }

    /// Apply repair operations in order and check the result against
    /// `root_digest`.
    ///
    /// Any failure leaves the replica UNSYNCED.
    pub fn apply(&mut self, root_digest: Digest, ops: &[RepairOp]) -> Result<()> {
        if !self.is_synced() {
            return Err(SyncError::InvalidMessage(
                "cannot apply a diff to an unsynced replica".into(),
            ));
        }

        if let Err(e) = ops.iter().try_for_each(|op| apply_op(&mut self.tree, op)) {
            self.reset();
            return Err(e.into());
        }

        let computed = self.tree.root_digest();
        if computed != root_digest {
            let entry_id = self
                .tree
                .root_id()
                .cloned()
                .unwrap_or_else(|| EntryId::from("<empty>"));
            self.reset();
            return Err(TreeError::DigestMismatch {
                entry_id,
                expected: root_digest,
                computed,
            }
            .into());
        }
        Ok(())
    }

    /// The state reported in PullDiff: the root only.
    pub fn known_state(&self) -> KnownState {
        let mut state = KnownState::new();
        if let (true, Some(root_id)) = (self.is_synced(), self.tree.root_id()) {
            state.insert(root_id.clone(), self.tree.root_digest());
        }
        state
    }

    /// Every entry's aggregate digest, for a fully cross-checked PullDiff.
    pub fn detailed_known_state(&self) -> KnownState {
        if !self.is_synced() {
            return KnownState::new();
        }
        self.tree
            .nodes()
            .map(|n| (n.entry_id().clone(), n.aggregate_digest()))
            .collect()
    }

    /// Discard local state.
    pub fn reset(&mut self) {
        self.tree = MerkleTree::new();
        self.state = ReplicaState::Unsynced;
    }
}

fn apply_op(tree: &mut MerkleTree, op: &RepairOp) -> fstree_core::error::Result<()> {
    match op {
        RepairOp::Remove { entry_id } => tree.remove(entry_id).map(|_| ()),
        RepairOp::Insert {
            entry_id,
            parent_id,
            metadata,
        } => tree.insert(Some(parent_id), entry_id.clone(), metadata.clone()),
        RepairOp::Update { entry_id, metadata } => {
            tree.update_metadata(entry_id, metadata.clone()).map(|_| ())
        }
    }
}

/// What one [`ReplicaSession::sync_once`] round did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Fetched a full snapshot from UNSYNCED.
    Bootstrapped { entries: usize },
    /// Root digests already matched.
    UpToDate,
    /// Applied an incremental repair.
    Applied { ops: usize },
    /// Discarded local state and fetched a full snapshot.
    Refetched { reason: PurgeReason, entries: usize },
}

/// Drives a [`Replica`] against a primary.
pub struct ReplicaSession<T: Transport> {
    transport: T,
    server: NodeId,
    replica: Replica,
    timeout: Duration,
    pending_purge: Option<PurgeReason>,
    detailed: bool,
}

impl<T: Transport> ReplicaSession<T> {
    pub fn new(transport: T, server: NodeId, user_id: UserId, timeout: Duration) -> Self {
        Self {
            transport,
            server,
            replica: Replica::new(user_id),
            timeout,
            pending_purge: None,
            detailed: false,
        }
    }

    /// Report every entry's digest in PullDiff instead of only the root.
    pub fn with_detailed_state(mut self, detailed: bool) -> Self {
        self.detailed = detailed;
        self
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// A purge received but not yet acted on.
    pub fn pending_purge(&self) -> Option<PurgeReason> {
        self.pending_purge
    }

    /// Bring the replica up to date: FetchReplica when UNSYNCED, PullDiff
    /// when SYNCED, falling back to a refetch on any purge.
    pub async fn sync_once(&mut self) -> Result<SyncOutcome> {
        if let Some(reason) = self.pending_purge.take() {
            return self.refetch(reason).await;
        }

        if !self.replica.is_synced() {
            let entries = self.fetch().await?;
            return Ok(SyncOutcome::Bootstrapped { entries });
        }

        let response = self.pull(self.reported_state()).await?;

        if let Some(reason) = self.pending_purge.take() {
            return self.refetch(reason).await;
        }

        match response {
            PullDiffResponse::Diff { root_digest, ops } => {
                if ops.is_empty() && root_digest == self.replica.root_digest() {
                    return Ok(SyncOutcome::UpToDate);
                }
                match self.replica.apply(root_digest, &ops) {
                    Ok(()) => Ok(SyncOutcome::Applied { ops: ops.len() }),
                    Err(e) => {
                        tracing::warn!(user = %self.replica.user_id(), error = %e, "repair failed");
                        self.refetch(PurgeReason::InconsistentState).await
                    }
                }
            }
            PullDiffResponse::PurgeRequired { reason } => self.refetch(reason).await,
        }
    }

    /// Wait up to `timeout` for a purge notice for this replica's user.
    pub async fn listen(&mut self, timeout: Duration) -> Result<Option<PurgeReason>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.transport.recv_timeout(remaining).await? {
                None => return Ok(self.pending_purge),
                Some((from, message)) => {
                    if from == self.server && self.note_purge(&message) {
                        return Ok(self.pending_purge);
                    }
                }
            }
        }
    }

    /// The known_state sent in PullDiff. A detailed map over the request
    /// limit would be refused, so it falls back to the root only.
    fn reported_state(&self) -> KnownState {
        if !self.detailed {
            return self.replica.known_state();
        }
        let detailed = self.replica.detailed_known_state();
        if detailed.len() > limits::MAX_KNOWN_STATE {
            tracing::debug!(
                user = %self.replica.user_id(),
                entries = detailed.len(),
                limit = limits::MAX_KNOWN_STATE,
                "detailed state over limit, reporting root only"
            );
            return self.replica.known_state();
        }
        detailed
    }

    async fn refetch(&mut self, reason: PurgeReason) -> Result<SyncOutcome> {
        tracing::info!(user = %self.replica.user_id(), ?reason, "purging replica");
        self.replica.reset();
        let entries = self.fetch().await?;
        Ok(SyncOutcome::Refetched { reason, entries })
    }

    async fn fetch(&mut self) -> Result<usize> {
        let user_id = self.replica.user_id();
        match self.exchange(SyncMessage::FetchReplica { user_id }).await? {
            SyncMessage::Replica { snapshot, .. } => {
                self.replica.bootstrap(&snapshot)?;
                // Anything issued before this snapshot is already reflected.
                self.pending_purge = None;
                tracing::debug!(user = %user_id, entries = snapshot.len(), "replica bootstrapped");
                Ok(snapshot.len())
            }
            other => Err(unexpected("Replica", &other)),
        }
    }

    async fn pull(&mut self, known_state: KnownState) -> Result<PullDiffResponse> {
        let user_id = self.replica.user_id();
        match self
            .exchange(SyncMessage::PullDiff {
                user_id,
                known_state,
            })
            .await?
        {
            SyncMessage::Diff { response, .. } => Ok(response),
            other => Err(unexpected("Diff", &other)),
        }
    }

    /// Send a request and wait for its response, noting purges on the way.
    async fn exchange(&mut self, request: SyncMessage) -> Result<SyncMessage> {
        self.transport.send(&self.server, request).await?;

        loop {
            let Some((from, message)) = self.transport.recv_timeout(self.timeout).await? else {
                return Err(SyncError::Timeout("waiting for primary".into()));
            };
            if from != self.server || self.note_purge(&message) {
                continue;
            }
            match message {
                SyncMessage::Error { code, message } => {
                    return Err(SyncError::PeerError { code, message })
                }
                SyncMessage::Replica { user_id, .. } | SyncMessage::Diff { user_id, .. }
                    if user_id == self.replica.user_id() =>
                {
                    return Ok(message)
                }
                other => {
                    tracing::debug!(message = ?std::mem::discriminant(&other), "ignoring message");
                }
            }
        }
    }

    /// Record a purge for our user. Returns whether `message` was a purge.
    fn note_purge(&mut self, message: &SyncMessage) -> bool {
        match message {
            SyncMessage::PurgeReplica { user_id, reason } => {
                if *user_id == self.replica.user_id() {
                    self.pending_purge = Some(*reason);
                }
                true
            }
            _ => false,
        }
    }
}

fn unexpected(expected: &str, got: &SyncMessage) -> SyncError {
    SyncError::InvalidMessage(format!(
        "expected {expected}, got {:?}",
        std::mem::discriminant(got)
    ))
}
