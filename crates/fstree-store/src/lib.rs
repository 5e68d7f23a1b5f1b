//! # fstree Store
//!
//! Per-user tree ownership for the fstree engine, plus the interface to the
//! external entry store of record that trees are hydrated from.
//!
//! ## Key Types
//!
//! - [`ReplicaStore`] - Process-wide map of user -> tree, with per-user locking
//! - [`EntrySource`] - Async trait over the entry store of record
//! - [`SqliteEntrySource`] - `fsentries` table in SQLite
//! - [`MemoryEntrySource`] / [`NullEntrySource`] - In-memory sources
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fstree_store::{ReplicaStore, SqliteEntrySource, StoreConfig};
//!
//! async fn example() {
//!     let source = SqliteEntrySource::open("entries.db").unwrap();
//!     let store = ReplicaStore::new(Arc::new(source), StoreConfig::default());
//!
//!     // let handle = store.get(user_id).await?;
//!     // let digest = handle.read().await.root_digest();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Trees are a cache**: any tree can be discarded and rebuilt from the source
//! - **Lazy hydration**: a non-resident tree is loaded on first access
//! - **Per-user isolation**: no lock is shared between two users' trees

pub mod error;
pub mod eviction;
pub mod memory;
pub mod migration;
pub mod replica_store;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use eviction::spawn_eviction_task;
pub use memory::{MemoryEntrySource, NullEntrySource};
pub use replica_store::{ReplicaHandle, ReplicaStore, Residency, StoreConfig, UserReplica};
pub use sqlite::SqliteEntrySource;
pub use traits::EntrySource;
