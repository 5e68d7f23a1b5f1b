//! Error types for the engine.

use fstree_store::StoreError;
use fstree_sync::SyncError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur assembling or running an engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The entry store could not be opened.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// The global subscriber could not be installed.
    #[error("logging setup failed: {0}")]
    Logging(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
