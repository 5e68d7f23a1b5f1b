//! The process-wide table of per-user trees.
//!
//! Each user's tree sits behind its own async `RwLock`: every structural
//! change takes the write half, so one user's mutations are serialized and a
//! reader never sees a partially propagated digest. Distinct users share
//! nothing beyond the map lookup.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use fstree_core::{MerkleTree, UserId, VersionedTree};

use crate::error::{Result, StoreError};
use crate::traits::EntrySource;

/// Residency and eviction settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum trees held in memory at once.
    pub max_resident_trees: usize,
    /// Revisions journaled per tree.
    pub history_depth: usize,
    /// Trees idle longer than this are evicted.
    pub idle_timeout_secs: u64,
    /// How often the eviction task runs.
    pub eviction_interval_secs: u64,
    pub eviction_enabled: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_resident_trees: 10_000,
            history_depth: 256,
            idle_timeout_secs: 300,
            eviction_interval_secs: 60,
            eviction_enabled: true,
        }
    }
}

impl StoreConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs.max(1))
    }
}

/// How a tree handle came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// Already in memory.
    Resident,
    /// Just rebuilt from the entry source.
    Hydrated,
    /// Just created empty; the source had nothing.
    Created,
}

/// One user's tree and its activity marker.
pub struct UserReplica {
    user_id: UserId,
    tree: RwLock<VersionedTree>,
    /// Milliseconds since the owning store's epoch.
    last_activity: AtomicU64,
}

impl UserReplica {
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Shared access. Excludes writers for as long as the guard lives.
    pub async fn read(&self) -> RwLockReadGuard<'_, VersionedTree> {
        self.tree.read().await
    }

    /// Exclusive access for mutation.
    pub async fn write(&self) -> RwLockWriteGuard<'_, VersionedTree> {
        self.tree.write().await
    }
}

/// A user's tree plus how it was obtained.
#[derive(Clone)]
pub struct ReplicaHandle {
    replica: Arc<UserReplica>,
    residency: Residency,
}

impl ReplicaHandle {
    pub fn residency(&self) -> Residency {
        self.residency
    }

    /// Whether this call loaded the tree from the entry source.
    pub fn was_hydrated(&self) -> bool {
        self.residency == Residency::Hydrated
    }

    pub fn user_id(&self) -> UserId {
        self.replica.user_id
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, VersionedTree> {
        self.replica.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, VersionedTree> {
        self.replica.write().await
    }
}

/// Owns one tree per user.
pub struct ReplicaStore {
    trees: RwLock<HashMap<UserId, Arc<UserReplica>>>,
    source: Arc<dyn EntrySource>,
    config: StoreConfig,
    epoch: Instant,
}

impl ReplicaStore {
    /// Create an empty store backed by `source`.
    pub fn new(source: Arc<dyn EntrySource>, config: StoreConfig) -> Self {
        Self {
            trees: RwLock::new(HashMap::new()),
            source,
            config,
            epoch: Instant::now(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn source(&self) -> &Arc<dyn EntrySource> {
        &self.source
    }

    /// The user's tree, hydrating from the source or creating an empty one
    /// if it is not resident.
    pub async fn get_or_create(&self, user_id: UserId) -> Result<ReplicaHandle> {
        self.acquire(user_id, true).await
    }

    /// The user's tree for reading. Hydrates if needed; fails with
    /// `UnknownUser` when the source has nothing.
    pub async fn get(&self, user_id: UserId) -> Result<ReplicaHandle> {
        self.acquire(user_id, false).await
    }

    /// Run `f` against a consistent view of the user's tree.
    pub async fn read<F, R>(&self, user_id: UserId, f: F) -> Result<R>
    where
        F: FnOnce(&VersionedTree) -> R,
    {
        let handle = self.get(user_id).await?;
        let guard = handle.read().await;
        Ok(f(&*guard))
    }

    /// Apply `f` under the user's exclusive lock, creating the tree if
    /// needed.
    pub async fn mutate<F, R>(&self, user_id: UserId, f: F) -> Result<R>
    where
        F: FnOnce(&mut VersionedTree) -> R,
    {
        let handle = self.get_or_create(user_id).await?;
        let mut guard = handle.write().await;
        Ok(f(&mut *guard))
    }

    /// Replace the user's tree with a fresh load from the source.
    ///
    /// Returns the residency of the rebuilt tree: `Hydrated` if the source
    /// had entries, `Created` if it was empty. A source that cannot
    /// rehydrate has nothing to load; the resident tree is rebuilt from its
    /// own entries instead and keeps its residency.
    pub async fn rehydrate(&self, user_id: UserId) -> Result<Residency> {
        if !self.source.can_rehydrate() {
            return self.rebuild_in_place(user_id).await;
        }

        let (tree, residency) = match self.load(user_id).await? {
            Some(tree) => (tree, Residency::Hydrated),
            None => (MerkleTree::new(), Residency::Created),
        };
        let handle = self.get_or_create(user_id).await?;
        handle.write().await.replace(tree);
        tracing::info!(user = %user_id, ?residency, "tree rebuilt from entry source");
        Ok(residency)
    }

    async fn rebuild_in_place(&self, user_id: UserId) -> Result<Residency> {
        let handle = self.get_or_create(user_id).await?;
        let mut guard = handle.write().await;
        let tree = MerkleTree::from_entries(guard.tree().to_records())?;
        guard.replace(tree);
        tracing::warn!(user = %user_id, "entry source cannot rehydrate, tree rebuilt from its own entries");
        Ok(handle.residency())
    }

    /// Drop the user's in-memory tree. Returns whether one was resident.
    pub async fn discard(&self, user_id: UserId) -> bool {
        let removed = self.trees.write().await.remove(&user_id).is_some();
        if removed {
            tracing::debug!(user = %user_id, "tree discarded");
        }
        removed
    }

    /// Discard every tree idle for longer than `idle`.
    ///
    /// Trees currently borrowed through a handle are kept. Nothing is
    /// evicted when the source cannot rehydrate.
    pub async fn evict_idle(&self, idle: Duration) -> Vec<UserId> {
        if !self.source.can_rehydrate() {
            return Vec::new();
        }

        let now = self.now_millis();
        let idle_ms = idle.as_millis() as u64;
        let mut trees = self.trees.write().await;
        let mut evicted = Vec::new();
        trees.retain(|user_id, replica| {
            let last = replica.last_activity.load(Ordering::Relaxed);
            let expired = now.saturating_sub(last) > idle_ms;
            let in_use = Arc::strong_count(replica) > 1;
            if expired && !in_use {
                evicted.push(*user_id);
                false
            } else {
                true
            }
        });
        evicted
    }

    /// Drop every tree.
    pub async fn clear(&self) {
        self.trees.write().await.clear();
    }

    pub async fn is_resident(&self, user_id: UserId) -> bool {
        self.trees.read().await.contains_key(&user_id)
    }

    pub async fn resident_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.trees.read().await.keys().copied().collect();
        users.sort();
        users
    }

    pub async fn len(&self) -> usize {
        self.trees.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.trees.read().await.is_empty()
    }

    async fn acquire(&self, user_id: UserId, create: bool) -> Result<ReplicaHandle> {
        // 1. Fast path: already resident
        if let Some(replica) = self.trees.read().await.get(&user_id) {
            self.touch(replica);
            return Ok(ReplicaHandle {
                replica: replica.clone(),
                residency: Residency::Resident,
            });
        }

        // 2. Load outside the map lock so other users are not blocked
        let (tree, residency) = match self.load(user_id).await? {
            Some(tree) => (tree, Residency::Hydrated),
            None if create => (MerkleTree::new(), Residency::Created),
            None => return Err(StoreError::UnknownUser(user_id)),
        };

        // 3. Insert unless someone beat us to it
        let mut trees = self.trees.write().await;
        if let Some(replica) = trees.get(&user_id) {
            self.touch(replica);
            return Ok(ReplicaHandle {
                replica: replica.clone(),
                residency: Residency::Resident,
            });
        }
        if trees.len() >= self.config.max_resident_trees {
            tracing::warn!(
                user = %user_id,
                resident = trees.len(),
                "refusing to create tree: resident limit reached"
            );
            return Err(StoreError::CapacityExceeded {
                resident: trees.len(),
                limit: self.config.max_resident_trees,
            });
        }

        let replica = Arc::new(UserReplica {
            user_id,
            tree: RwLock::new(VersionedTree::from_tree(tree, self.config.history_depth)),
            last_activity: AtomicU64::new(self.now_millis()),
        });
        trees.insert(user_id, replica.clone());
        tracing::info!(user = %user_id, ?residency, resident = trees.len(), "tree resident");

        Ok(ReplicaHandle { replica, residency })
    }

    async fn load(&self, user_id: UserId) -> Result<Option<MerkleTree>> {
        match self.source.load_entries(user_id).await? {
            Some(records) => {
                let tree = MerkleTree::from_entries(records).map_err(|e| {
                    tracing::error!(user = %user_id, error = %e, "entry source holds an invalid tree");
                    e
                })?;
                Ok(Some(tree))
            }
            None => Ok(None),
        }
    }

    fn touch(&self, replica: &UserReplica) {
        replica
            .last_activity
            .store(self.now_millis(), Ordering::Relaxed);
    }

    fn now_millis(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryEntrySource, NullEntrySource};
    use fstree_core::{EntryId, EntryMetadata, EntryRecord, TreeError};

    fn id(s: &str) -> EntryId {
        EntryId::from(s)
    }

    fn seeded_source(user: UserId) -> Arc<MemoryEntrySource> {
        let source = Arc::new(MemoryEntrySource::new());
        source.put_all(
            user,
            vec![
                EntryRecord::new(id("root"), None, EntryMetadata::directory("/", 0)),
                EntryRecord::new(id("docs"), Some(id("root")), EntryMetadata::directory("docs", 0)),
            ],
        );
        source
    }

    #[tokio::test]
    async fn test_get_or_create_empty() {
        let store = ReplicaStore::new(Arc::new(NullEntrySource), StoreConfig::default());
        let handle = store.get_or_create(UserId(1)).await.unwrap();
        assert_eq!(handle.residency(), Residency::Created);
        assert!(handle.read().await.tree().is_empty());

        let again = store.get_or_create(UserId(1)).await.unwrap();
        assert_eq!(again.residency(), Residency::Resident);
    }

    #[tokio::test]
    async fn test_get_unknown_user() {
        let store = ReplicaStore::new(Arc::new(NullEntrySource), StoreConfig::default());
        assert!(matches!(
            store.get(UserId(5)).await,
            Err(StoreError::UnknownUser(UserId(5)))
        ));
        assert!(!store.is_resident(UserId(5)).await);
    }

    #[tokio::test]
    async fn test_hydrates_from_source() {
        let user = UserId(3);
        let store = ReplicaStore::new(seeded_source(user), StoreConfig::default());

        let handle = store.get(user).await.unwrap();
        assert!(handle.was_hydrated());
        assert_eq!(handle.read().await.tree().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_source_rows_rejected() {
        let user = UserId(3);
        let source = Arc::new(MemoryEntrySource::new());
        source.put(
            user,
            EntryRecord::new(id("a"), Some(id("ghost")), EntryMetadata::directory("a", 0)),
        );
        let store = ReplicaStore::new(source, StoreConfig::default());
        assert!(matches!(
            store.get(user).await,
            Err(StoreError::Tree(TreeError::MissingRoot))
        ));
    }

    #[tokio::test]
    async fn test_mutate_serializes_per_user() {
        let store = Arc::new(ReplicaStore::new(
            Arc::new(NullEntrySource),
            StoreConfig::default(),
        ));
        store
            .mutate(UserId(1), |t| {
                t.insert(None, id("root"), EntryMetadata::directory("/", 0))
            })
            .await
            .unwrap()
            .unwrap();

        let mut tasks = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .mutate(UserId(1), |t| {
                        t.insert(
                            Some(&id("root")),
                            id(&format!("f{i:02}")),
                            EntryMetadata::file(format!("f{i:02}"), i, 0),
                        )
                    })
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap().unwrap();
        }

        let (len, ok) = store
            .read(UserId(1), |t| (t.tree().len(), t.tree().verify_integrity().is_ok()))
            .await
            .unwrap();
        assert_eq!(len, 17);
        assert!(ok);
    }

    #[tokio::test]
    async fn test_users_are_independent() {
        let store = ReplicaStore::new(Arc::new(NullEntrySource), StoreConfig::default());
        store
            .mutate(UserId(1), |t| {
                t.insert(None, id("root"), EntryMetadata::directory("/", 0))
            })
            .await
            .unwrap()
            .unwrap();
        let d2 = store
            .mutate(UserId(2), |t| t.root_digest())
            .await
            .unwrap();
        assert!(d2.is_zero());
        assert_eq!(store.resident_users().await, vec![UserId(1), UserId(2)]);
    }

    #[tokio::test]
    async fn test_capacity_exceeded() {
        let config = StoreConfig {
            max_resident_trees: 1,
            ..StoreConfig::default()
        };
        let store = ReplicaStore::new(Arc::new(NullEntrySource), config);
        store.get_or_create(UserId(1)).await.unwrap();
        assert!(matches!(
            store.get_or_create(UserId(2)).await,
            Err(StoreError::CapacityExceeded { resident: 1, limit: 1 })
        ));
    }

    #[tokio::test]
    async fn test_discard_and_rehydrate() {
        let user = UserId(3);
        let store = ReplicaStore::new(seeded_source(user), StoreConfig::default());
        store
            .mutate(user, |t| {
                t.insert(Some(&id("docs")), id("scratch"), EntryMetadata::file("s", 1, 0))
            })
            .await
            .unwrap()
            .unwrap();

        assert!(store.discard(user).await);
        assert!(!store.discard(user).await);

        // Source of record never saw "scratch"
        let len = store.read(user, |t| t.tree().len()).await.unwrap();
        assert_eq!(len, 2);
    }

    #[tokio::test]
    async fn test_rehydrate_replaces_and_clears_journal() {
        let user = UserId(3);
        let store = ReplicaStore::new(seeded_source(user), StoreConfig::default());
        store
            .mutate(user, |t| {
                t.insert(Some(&id("docs")), id("scratch"), EntryMetadata::file("s", 1, 0))
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(store.rehydrate(user).await.unwrap(), Residency::Hydrated);
        let (len, journal) = store
            .read(user, |t| (t.tree().len(), t.journal().len()))
            .await
            .unwrap();
        assert_eq!(len, 2);
        assert_eq!(journal, 0);
    }

    #[tokio::test]
    async fn test_rehydrate_without_source_keeps_tree() {
        let user = UserId(3);
        let store = ReplicaStore::new(Arc::new(NullEntrySource), StoreConfig::default());
        store
            .mutate(user, |t| {
                t.insert(None, id("root"), EntryMetadata::directory("/", 0))?;
                t.insert(Some(&id("root")), id("docs"), EntryMetadata::directory("docs", 0))
            })
            .await
            .unwrap()
            .unwrap();
        let before = store.read(user, |t| t.root_digest()).await.unwrap();

        assert_eq!(store.rehydrate(user).await.unwrap(), Residency::Created);
        let (len, journal, after) = store
            .read(user, |t| (t.tree().len(), t.journal().len(), t.root_digest()))
            .await
            .unwrap();
        assert_eq!(len, 2);
        assert_eq!(journal, 0);
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn test_evict_idle() {
        let user = UserId(3);
        let store = ReplicaStore::new(seeded_source(user), StoreConfig::default());
        store.get(user).await.unwrap();

        assert!(store.evict_idle(Duration::from_secs(3600)).await.is_empty());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.evict_idle(Duration::from_millis(5)).await, vec![user]);
        assert!(!store.is_resident(user).await);
    }

    #[tokio::test]
    async fn test_evict_skips_borrowed_and_unrehydratable() {
        let user = UserId(3);
        let store = ReplicaStore::new(seeded_source(user), StoreConfig::default());
        let handle = store.get(user).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.evict_idle(Duration::from_millis(5)).await.is_empty());
        drop(handle);

        let null_store = ReplicaStore::new(Arc::new(NullEntrySource), StoreConfig::default());
        null_store.get_or_create(user).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(null_store.evict_idle(Duration::ZERO).await.is_empty());
    }

    #[test]
    fn test_config_defaults_from_empty_toml_like_input() {
        let config: StoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, StoreConfig::default());
    }
}
