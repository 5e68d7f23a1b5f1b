//! The Engine: one primary's worth of trees, service and background work.
//!
//! The Engine wires an entry source, the [`ReplicaStore`] and the
//! [`SyncService`] together according to an [`EngineConfig`], and owns the
//! tasks that keep residency in check.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use fstree_store::{
    spawn_eviction_task, EntrySource, NullEntrySource, ReplicaStore, SqliteEntrySource,
};
use fstree_sync::{SyncServer, SyncService, Transport};

use crate::config::EngineConfig;
use crate::error::Result;

/// A running primary.
pub struct Engine {
    config: EngineConfig,
    store: Arc<ReplicaStore>,
    service: Arc<SyncService>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Assemble an engine over an existing entry source.
    pub fn new(source: Arc<dyn EntrySource>, config: EngineConfig) -> Self {
        let store = Arc::new(ReplicaStore::new(source, config.store.clone()));
        let service = Arc::new(SyncService::new(
            Arc::clone(&store),
            config.diff.clone(),
            config.sync.clone(),
        ));
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            store,
            service,
            shutdown,
            tasks: Vec::new(),
        }
    }

    /// Assemble an engine, opening the entry source the configuration names.
    pub fn open(config: EngineConfig) -> Result<Self> {
        let source: Arc<dyn EntrySource> = match &config.source.sqlite_path {
            Some(path) => {
                tracing::info!(path = %path.display(), "opening sqlite entry source");
                Arc::new(SqliteEntrySource::open(path)?)
            }
            None => {
                tracing::info!("no entry source configured, trees are memory-only");
                Arc::new(NullEntrySource)
            }
        };
        Ok(Self::new(source, config))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ReplicaStore> {
        &self.store
    }

    pub fn service(&self) -> &Arc<SyncService> {
        &self.service
    }

    /// Start the eviction task. Must be called inside a tokio runtime.
    pub fn spawn_background(&mut self) {
        let handle = spawn_eviction_task(Arc::clone(&self.store), self.config.store.clone());
        self.tasks.push(handle);
    }

    /// Serve requests arriving on `transport` until [`Engine::shutdown`].
    pub fn serve<T: Transport + 'static>(&mut self, transport: T) {
        let server = SyncServer::new(Arc::clone(&self.service), transport);
        let stop = self.shutdown.subscribe();

        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = server.run(stop).await {
                tracing::error!(error = %e, "sync server exited");
            }
        }));
    }

    /// Stop serving, stop background work, and drop every resident tree.
    pub async fn shutdown(mut self) {
        // Eviction never finishes on its own
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
        self.store.clear().await;
        tracing::info!("engine stopped");
    }
}
