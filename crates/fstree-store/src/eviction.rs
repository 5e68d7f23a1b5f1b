//! Background eviction of idle trees.
//!
//! Trees are a cache over the entry store of record, so dropping an idle one
//! only costs a rehydration on next use.

use std::sync::Arc;

use tokio::time::interval;

use crate::replica_store::{ReplicaStore, StoreConfig};

/// Spawn the periodic eviction task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_eviction_task(
    store: Arc<ReplicaStore>,
    config: StoreConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.eviction_enabled {
            tracing::info!("Eviction task disabled");
            return;
        }
        if !store.source().can_rehydrate() {
            tracing::info!("Eviction task disabled: entry source cannot rehydrate");
            return;
        }

        let idle = config.idle_timeout();
        tracing::info!(
            "Eviction task started (interval: {}s, idle timeout: {}s)",
            config.eviction_interval().as_secs(),
            idle.as_secs()
        );

        let mut timer = interval(config.eviction_interval());

        loop {
            timer.tick().await;

            let evicted = store.evict_idle(idle).await;
            if evicted.is_empty() {
                tracing::debug!("Eviction: no idle trees");
            } else {
                tracing::info!(
                    count = evicted.len(),
                    users = ?evicted,
                    "Eviction: discarded idle trees"
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryEntrySource, NullEntrySource};
    use fstree_core::{EntryId, EntryMetadata, EntryRecord, UserId};
    use std::time::Duration;

    #[tokio::test]
    async fn eviction_task_disabled() {
        let store = Arc::new(ReplicaStore::new(
            Arc::new(MemoryEntrySource::new()),
            StoreConfig::default(),
        ));
        let config = StoreConfig {
            eviction_enabled: false,
            ..StoreConfig::default()
        };

        let handle = spawn_eviction_task(store, config);

        tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("task should complete when disabled")
            .expect("task should not panic");
    }

    #[tokio::test]
    async fn eviction_task_exits_for_null_source() {
        let store = Arc::new(ReplicaStore::new(
            Arc::new(NullEntrySource),
            StoreConfig::default(),
        ));

        let handle = spawn_eviction_task(store, StoreConfig::default());

        tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("task should complete for a null source")
            .expect("task should not panic");
    }

    #[tokio::test]
    async fn eviction_task_discards_idle_trees() {
        let user = UserId(1);
        let source = Arc::new(MemoryEntrySource::new());
        source.put(
            user,
            EntryRecord::new(EntryId::from("root"), None, EntryMetadata::directory("/", 0)),
        );
        let config = StoreConfig {
            idle_timeout_secs: 0,
            eviction_interval_secs: 1,
            ..StoreConfig::default()
        };
        let store = Arc::new(ReplicaStore::new(source, config.clone()));
        store.get(user).await.unwrap();
        assert!(store.is_resident(user).await);

        let handle = spawn_eviction_task(store.clone(), config);
        // First tick fires immediately; give it a moment past the idle window
        tokio::time::sleep(Duration::from_millis(1200)).await;
        handle.abort();

        assert!(!store.is_resident(user).await);
    }
}
