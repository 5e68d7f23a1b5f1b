//! The replication service: mutation ingestion and the replica-facing RPCs.
//!
//! Every call names a user; the service holds no per-call state of its own
//! beyond the trees in the [`ReplicaStore`]. Mutations take the user's write
//! lock for exactly one tree operation, so a concurrent FetchReplica or
//! PullDiff sees either the state before or the state after, never a
//! partially propagated digest.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use fstree_core::{
    digest_of_metadata, validate_entry_id, validate_metadata, validate_new_entry, Digest, EntryId,
    EntryMetadata, TreeError, TreeSnapshot, UserId, VersionedTree,
};
use fstree_store::{ReplicaStore, Residency};

use crate::diff::{DiffConfig, DiffEngine};
use crate::error::{Result, SyncError};
use crate::messages::{KnownState, PullDiffResponse, PurgeReason, SyncErrorCode, SyncMessage};

/// Configuration for the sync service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Timeout for a single request/response exchange.
    pub message_timeout_ms: u64,
    /// Re-derive every digest after each mutation.
    pub verify_integrity: bool,
    /// Buffered purge notices per subscriber.
    pub purge_channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            message_timeout_ms: 30_000,
            verify_integrity: false,
            purge_channel_capacity: 64,
        }
    }
}

impl SyncConfig {
    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }
}

/// A replica of `user_id` must discard its state and refetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgeNotice {
    pub user_id: UserId,
    pub reason: PurgeReason,
}

/// RPC surface over a [`ReplicaStore`].
pub struct SyncService {
    store: Arc<ReplicaStore>,
    diff: DiffEngine,
    config: SyncConfig,
    purges: broadcast::Sender<PurgeNotice>,
}

impl SyncService {
    pub fn new(store: Arc<ReplicaStore>, diff: DiffConfig, config: SyncConfig) -> Self {
        let (purges, _) = broadcast::channel(config.purge_channel_capacity.max(1));
        Self {
            store,
            diff: DiffEngine::new(diff),
            config,
            purges,
        }
    }

    pub fn store(&self) -> &Arc<ReplicaStore> {
        &self.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Receive every purge notice issued from now on.
    pub fn subscribe_purges(&self) -> broadcast::Receiver<PurgeNotice> {
        self.purges.subscribe()
    }

    /// An entry was created. Returns the new root digest.
    ///
    /// Redelivery of an insert that is already reflected (same parent, same
    /// digested metadata) succeeds without change.
    pub async fn new_fs_entry(
        &self,
        user_id: UserId,
        parent_id: Option<EntryId>,
        entry_id: EntryId,
        metadata: EntryMetadata,
    ) -> Result<Digest> {
        validate_new_entry(parent_id.as_ref(), &entry_id, &metadata)?;

        self.commit(user_id, "insert", |tree, _| {
            if let Some(existing) = tree.tree().get(&entry_id) {
                if existing.parent_id() == parent_id.as_ref()
                    && existing.own_digest() == digest_of_metadata(&metadata)
                {
                    tracing::debug!(user = %user_id, entry = %entry_id, "insert already applied");
                    return Ok(());
                }
            }
            tree.insert(parent_id.as_ref(), entry_id.clone(), metadata)
        })
        .await
    }

    /// An entry's metadata changed. Returns the new root digest.
    pub async fn update_fs_entry(
        &self,
        user_id: UserId,
        entry_id: EntryId,
        metadata: EntryMetadata,
    ) -> Result<Digest> {
        validate_entry_id(&entry_id)?;
        validate_metadata(&metadata)?;

        self.commit(user_id, "update", |tree, _| {
            tree.update_metadata(&entry_id, metadata)
        })
        .await
    }

    /// An entry and its descendants were removed. Returns the new root
    /// digest.
    ///
    /// When this call had to hydrate the tree, the store of record already
    /// reflects the removal, so a missing entry is not an error.
    pub async fn remove_fs_entry(&self, user_id: UserId, entry_id: EntryId) -> Result<Digest> {
        validate_entry_id(&entry_id)?;

        self.commit(user_id, "remove", |tree, hydrated| {
            match tree.remove(&entry_id) {
                Ok(_) => Ok(()),
                Err(TreeError::EntryNotFound(_)) if hydrated => {
                    tracing::debug!(user = %user_id, entry = %entry_id, "remove already reflected");
                    Ok(())
                }
                Err(e) => Err(e),
            }
        })
        .await
    }

    /// An entry moved under a new parent, optionally with new metadata.
    /// Returns the new root digest.
    pub async fn move_fs_entry(
        &self,
        user_id: UserId,
        entry_id: EntryId,
        new_parent_id: EntryId,
        metadata: Option<EntryMetadata>,
    ) -> Result<Digest> {
        validate_entry_id(&entry_id)?;
        validate_entry_id(&new_parent_id)?;
        if let Some(metadata) = &metadata {
            validate_new_entry(Some(&new_parent_id), &entry_id, metadata)?;
        }

        self.commit(user_id, "move", |tree, _| {
            if let Some(existing) = tree.tree().get(&entry_id) {
                let same_meta = metadata
                    .as_ref()
                    .map_or(true, |m| digest_of_metadata(m) == existing.own_digest());
                if existing.parent_id() == Some(&new_parent_id) && same_meta {
                    tracing::debug!(user = %user_id, entry = %entry_id, "move already applied");
                    return Ok(());
                }
            }
            tree.move_entry(&entry_id, &new_parent_id, metadata)
        })
        .await
    }

    /// Full snapshot of the user's tree.
    pub async fn fetch_replica(&self, user_id: UserId) -> Result<TreeSnapshot> {
        let snapshot = self
            .store
            .read(user_id, |tree| tree.tree().snapshot())
            .await?;
        tracing::debug!(user = %user_id, entries = snapshot.len(), "replica fetched");
        Ok(snapshot)
    }

    /// Repair operations from the requester's known state to the current
    /// tree, or a purge instruction.
    pub async fn pull_diff(
        &self,
        user_id: UserId,
        known_state: &KnownState,
    ) -> Result<PullDiffResponse> {
        let response = self
            .store
            .read(user_id, |tree| self.diff.pull_diff(tree, known_state))
            .await?;

        match &response {
            PullDiffResponse::Diff { ops, root_digest } => {
                tracing::debug!(user = %user_id, ops = ops.len(), root = %root_digest, "diff served");
            }
            PullDiffResponse::PurgeRequired { reason } => {
                tracing::info!(user = %user_id, ?reason, "diff refused, purge required");
            }
        }
        Ok(response)
    }

    /// Discard the user's in-memory tree and tell replicas to refetch.
    ///
    /// Returns whether a tree was discarded. When the entry source cannot
    /// rehydrate, the resident tree is the only copy: it is kept and
    /// replicas are still told to refetch.
    pub async fn purge_replica(&self, user_id: UserId) -> bool {
        let discarded = if self.store.source().can_rehydrate() {
            self.store.discard(user_id).await
        } else {
            tracing::warn!(user = %user_id, "entry source cannot rehydrate, tree kept on purge");
            false
        };
        self.notify(user_id, PurgeReason::Requested);
        discarded
    }

    /// Rebuild the user's tree from the entry store and tell replicas to
    /// refetch.
    pub async fn rebuild_replica(&self, user_id: UserId) -> Result<Residency> {
        let residency = self.store.rehydrate(user_id).await?;
        self.notify(user_id, PurgeReason::Rebuilt);
        Ok(residency)
    }

    /// Dispatch a request message and produce its response.
    pub async fn handle(&self, message: SyncMessage) -> SyncMessage {
        let Some(user_id) = message.user_id() else {
            return error_message(SyncErrorCode::UnexpectedMessage, "not a request");
        };

        let result = match message {
            SyncMessage::FetchReplica { .. } => self
                .fetch_replica(user_id)
                .await
                .map(|snapshot| SyncMessage::Replica { user_id, snapshot }),

            SyncMessage::PullDiff { known_state, .. } => self
                .pull_diff(user_id, &known_state)
                .await
                .map(|response| SyncMessage::Diff { user_id, response }),

            SyncMessage::NewFSEntry {
                parent_id,
                entry_id,
                metadata,
                ..
            } => self
                .new_fs_entry(user_id, parent_id, entry_id, metadata)
                .await
                .map(|root_digest| SyncMessage::Ack { user_id, root_digest }),

            SyncMessage::UpdateFSEntry {
                entry_id, metadata, ..
            } => self
                .update_fs_entry(user_id, entry_id, metadata)
                .await
                .map(|root_digest| SyncMessage::Ack { user_id, root_digest }),

            SyncMessage::RemoveFSEntry { entry_id, .. } => self
                .remove_fs_entry(user_id, entry_id)
                .await
                .map(|root_digest| SyncMessage::Ack { user_id, root_digest }),

            SyncMessage::MoveFSEntry {
                entry_id,
                new_parent_id,
                metadata,
                ..
            } => self
                .move_fs_entry(user_id, entry_id, new_parent_id, metadata)
                .await
                .map(|root_digest| SyncMessage::Ack { user_id, root_digest }),

            _ => return error_message(SyncErrorCode::UnexpectedMessage, "not a request"),
        };

        result.unwrap_or_else(|e| error_message(e.code(), e.to_string()))
    }

    /// Run one tree mutation under the user's write lock.
    ///
    /// `apply` receives whether this call hydrated the tree.
    async fn commit<F>(&self, user_id: UserId, op: &'static str, apply: F) -> Result<Digest>
    where
        F: FnOnce(&mut VersionedTree, bool) -> fstree_core::error::Result<()>,
    {
        let handle = self.store.get_or_create(user_id).await?;

        let outcome = {
            let mut tree = handle.write().await;
            apply(&mut *tree, handle.was_hydrated()).map(|()| {
                let integrity = if self.config.verify_integrity {
                    tree.tree().verify_integrity()
                } else {
                    Ok(())
                };
                (tree.root_digest(), integrity)
            })
        };

        match outcome {
            Ok((root_digest, Ok(()))) => {
                tracing::debug!(user = %user_id, op, root = %root_digest, "mutation applied");
                Ok(root_digest)
            }
            Ok((_, Err(e))) => {
                tracing::error!(user = %user_id, op, error = %e, "integrity check failed, rebuilding");
                self.rebuild_replica(user_id).await?;
                Err(SyncError::Tree(e))
            }
            Err(e) => {
                tracing::warn!(user = %user_id, op, error = %e, "mutation rejected");
                Err(e.into())
            }
        }
    }

    fn notify(&self, user_id: UserId, reason: PurgeReason) {
        let receivers = self
            .purges
            .send(PurgeNotice { user_id, reason })
            .unwrap_or(0);
        tracing::info!(user = %user_id, ?reason, receivers, "purge issued");
    }
}

fn error_message(code: SyncErrorCode, message: impl Into<String>) -> SyncMessage {
    SyncMessage::Error {
        code,
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fstree_core::EntryRecord;
    use fstree_store::{MemoryEntrySource, NullEntrySource, StoreConfig};

    fn id(s: &str) -> EntryId {
        EntryId::from(s)
    }

    fn service() -> SyncService {
        let store = Arc::new(ReplicaStore::new(
            Arc::new(NullEntrySource),
            StoreConfig::default(),
        ));
        SyncService::new(store, DiffConfig::default(), SyncConfig::default())
    }

    async fn seed(service: &SyncService, user: UserId) {
        service
            .new_fs_entry(user, None, id("root"), EntryMetadata::directory("/", 0))
            .await
            .unwrap();
        service
            .new_fs_entry(user, Some(id("root")), id("docs"), EntryMetadata::directory("docs", 0))
            .await
            .unwrap();
        service
            .new_fs_entry(user, Some(id("docs")), id("readme"), EntryMetadata::file("readme", 3, 0))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_structural_errors_surface() {
        let service = service();
        let user = UserId(1);
        seed(&service, user).await;

        let err = service
            .new_fs_entry(user, Some(id("ghost")), id("x"), EntryMetadata::file("x", 0, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Tree(TreeError::ParentNotFound(_))));

        let err = service
            .new_fs_entry(user, Some(id("root")), id("readme"), EntryMetadata::file("other", 0, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Tree(TreeError::DuplicateEntry(_))));

        let err = service.remove_fs_entry(user, id("root")).await.unwrap_err();
        assert!(matches!(err, SyncError::Tree(TreeError::CannotRemoveRoot(_))));
    }

    #[tokio::test]
    async fn test_remove_twice() {
        let service = service();
        let user = UserId(1);
        seed(&service, user).await;

        let d = service.remove_fs_entry(user, id("readme")).await.unwrap();
        let err = service.remove_fs_entry(user, id("readme")).await.unwrap_err();
        assert!(matches!(err, SyncError::Tree(TreeError::EntryNotFound(_))));

        let snapshot = service.fetch_replica(user).await.unwrap();
        assert_eq!(snapshot.root_digest, d);
    }

    #[tokio::test]
    async fn test_redelivered_insert_is_noop() {
        let service = service();
        let user = UserId(1);
        seed(&service, user).await;
        let before = service.fetch_replica(user).await.unwrap().root_digest;

        let after = service
            .new_fs_entry(user, Some(id("docs")), id("readme"), EntryMetadata::file("readme", 3, 0))
            .await
            .unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_invalid_metadata_rejected() {
        let service = service();
        let err = service
            .new_fs_entry(UserId(1), None, id("root"), EntryMetadata::directory("", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert!(!service.store().is_resident(UserId(1)).await);
    }

    #[tokio::test]
    async fn test_unknown_user_reads() {
        let service = service();
        assert!(matches!(
            service.fetch_replica(UserId(9)).await,
            Err(SyncError::UnknownUser(UserId(9)))
        ));
        let mut known = KnownState::new();
        known.insert(id("root"), Digest::ZERO);
        assert!(matches!(
            service.pull_diff(UserId(9), &known).await,
            Err(SyncError::UnknownUser(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_after_hydration_is_idempotent() {
        let user = UserId(2);
        let source = Arc::new(MemoryEntrySource::new());
        source.put_all(
            user,
            vec![EntryRecord::new(id("root"), None, EntryMetadata::directory("/", 0))],
        );
        let store = Arc::new(ReplicaStore::new(source, StoreConfig::default()));
        let service = SyncService::new(store, DiffConfig::default(), SyncConfig::default());

        // 1. First call hydrates; the entry is already gone from the source
        service.remove_fs_entry(user, id("gone")).await.unwrap();

        // 2. Tree now resident; the same remove is an error
        assert!(service.remove_fs_entry(user, id("gone")).await.is_err());
    }

    #[tokio::test]
    async fn test_move_and_noop_move() {
        let service = service();
        let user = UserId(1);
        seed(&service, user).await;
        service
            .new_fs_entry(user, Some(id("root")), id("archive"), EntryMetadata::directory("archive", 0))
            .await
            .unwrap();

        let moved = service
            .move_fs_entry(user, id("readme"), id("archive"), None)
            .await
            .unwrap();
        let again = service
            .move_fs_entry(user, id("readme"), id("archive"), None)
            .await
            .unwrap();
        assert_eq!(moved, again);

        let err = service
            .move_fs_entry(user, id("docs"), id("docs"), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), SyncErrorCode::InvalidMove);
    }

    #[tokio::test]
    async fn test_purge_notifies() {
        let user = UserId(1);
        let source = Arc::new(MemoryEntrySource::new());
        source.put(user, EntryRecord::new(id("root"), None, EntryMetadata::directory("/", 0)));
        let store = Arc::new(ReplicaStore::new(source, StoreConfig::default()));
        let service = SyncService::new(store, DiffConfig::default(), SyncConfig::default());
        service.fetch_replica(user).await.unwrap();
        let mut purges = service.subscribe_purges();

        assert!(service.purge_replica(user).await);
        assert_eq!(
            purges.recv().await.unwrap(),
            PurgeNotice {
                user_id: user,
                reason: PurgeReason::Requested
            }
        );
        assert!(!service.store().is_resident(user).await);

        // Rehydrates on the next read
        assert_eq!(service.fetch_replica(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_purge_keeps_tree_without_source() {
        let service = service();
        let user = UserId(1);
        service
            .new_fs_entry(user, None, id("root"), EntryMetadata::directory("/", 0))
            .await
            .unwrap();
        service
            .new_fs_entry(user, Some(id("root")), id("docs"), EntryMetadata::directory("docs", 0))
            .await
            .unwrap();
        let before = service.fetch_replica(user).await.unwrap().root_digest;
        let mut purges = service.subscribe_purges();

        // 1. Nothing is discarded, replicas are still told to refetch
        assert!(!service.purge_replica(user).await);
        assert_eq!(
            purges.recv().await.unwrap(),
            PurgeNotice {
                user_id: user,
                reason: PurgeReason::Requested
            }
        );

        // 2. The tree survives and still accepts children
        let snapshot = service.fetch_replica(user).await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.root_digest, before);
        service
            .new_fs_entry(user, Some(id("docs")), id("readme"), EntryMetadata::file("readme", 3, 0))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rebuild_without_source_keeps_entries() {
        let service = service();
        let user = UserId(1);
        seed(&service, user).await;
        let before = service.fetch_replica(user).await.unwrap().root_digest;
        let mut purges = service.subscribe_purges();

        assert_eq!(service.rebuild_replica(user).await.unwrap(), Residency::Created);
        assert_eq!(purges.recv().await.unwrap().reason, PurgeReason::Rebuilt);

        let snapshot = service.fetch_replica(user).await.unwrap();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.root_digest, before);
    }

    #[tokio::test]
    async fn test_handle_dispatch() {
        let service = service();
        let user = UserId(5);

        let reply = service
            .handle(SyncMessage::NewFSEntry {
                user_id: user,
                parent_id: None,
                entry_id: id("root"),
                metadata: EntryMetadata::directory("/", 0),
            })
            .await;
        let SyncMessage::Ack { root_digest, .. } = reply else {
            panic!("expected Ack");
        };

        let reply = service.handle(SyncMessage::FetchReplica { user_id: user }).await;
        let SyncMessage::Replica { snapshot, .. } = reply else {
            panic!("expected Replica");
        };
        assert_eq!(snapshot.root_digest, root_digest);

        let reply = service
            .handle(SyncMessage::RemoveFSEntry {
                user_id: user,
                entry_id: id("missing"),
            })
            .await;
        assert!(matches!(
            reply,
            SyncMessage::Error {
                code: SyncErrorCode::EntryNotFound,
                ..
            }
        ));

        let reply = service
            .handle(SyncMessage::Ack {
                user_id: user,
                root_digest,
            })
            .await;
        assert!(matches!(
            reply,
            SyncMessage::Error {
                code: SyncErrorCode::UnexpectedMessage,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_verify_integrity_runs() {
        let store = Arc::new(ReplicaStore::new(
            Arc::new(NullEntrySource),
            StoreConfig::default(),
        ));
        let config = SyncConfig {
            verify_integrity: true,
            ..SyncConfig::default()
        };
        let service = SyncService::new(store, DiffConfig::default(), config);
        seed(&service, UserId(1)).await;
        service
            .update_fs_entry(UserId(1), id("readme"), EntryMetadata::file("readme", 4, 1))
            .await
            .unwrap();
    }
}
