//! Error types for the store module.

use fstree_core::{TreeError, UserId};
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Attribute blob serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// No tree is resident and the entry source has nothing for this user.
    #[error("unknown user: {0}")]
    UnknownUser(UserId),

    /// The entry source returned entries that do not form a valid tree.
    #[error("hydration failed: {0}")]
    Tree(#[from] TreeError),

    /// Refusing to create another resident tree.
    #[error("resident tree limit reached ({resident}/{limit})")]
    CapacityExceeded { resident: usize, limit: usize },

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking task panicked or was cancelled.
    #[error("blocking task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
