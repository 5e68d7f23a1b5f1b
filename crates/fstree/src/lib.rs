//! # fstree
//!
//! Per-user filesystem Merkle trees, kept in memory on a primary and
//! replicated incrementally to read replicas.
//!
//! ## Overview
//!
//! - **Trees**: every node carries a digest of its own metadata and an
//!   aggregate digest over its children, so the root digest names the
//!   whole tree
//! - **Repair**: a replica reports the root digest it holds and receives the
//!   ordered remove/insert/update operations that bring it current
//! - **Fallback**: when repair is impossible or too large, the replica is
//!   told to purge and refetch a full snapshot
//! - **Residency**: trees are a cache over an external entry store, hydrated
//!   on demand and evicted when idle
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fstree::{Engine, EngineConfig};
//! use fstree::core::{EntryId, EntryMetadata, UserId};
//!
//! async fn example() -> fstree::Result<()> {
//!     let config = EngineConfig::from_file("fstree.toml")?;
//!     fstree::logging::init(&config.logging)?;
//!
//!     let mut engine = Engine::open(config)?;
//!     engine.spawn_background();
//!
//!     let service = engine.service();
//!     let user = UserId(1);
//!     service
//!         .new_fs_entry(user, None, EntryId::from("root"), EntryMetadata::directory("/", 0))
//!         .await?;
//!     let snapshot = service.fetch_replica(user).await?;
//!     println!("root digest {}", snapshot.root_digest);
//!
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `fstree::core` - Digests, metadata, trees, snapshots, journal
//! - `fstree::store` - Entry sources and the resident tree store
//! - `fstree::sync` - Diffing, messages, service, transport, replicas

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;

// Re-export component crates
pub use fstree_core as core;
pub use fstree_store as store;
pub use fstree_sync as sync;

pub use config::{ConfigError, EngineConfig, LogFormat, LoggingConfig, SourceConfig};
pub use engine::Engine;
pub use error::{EngineError, Result};

// Re-export commonly used types
pub use fstree_core::{Digest, EntryId, EntryKind, EntryMetadata, MerkleTree, TreeSnapshot, UserId};
pub use fstree_sync::{
    DiffEngine, PullDiffResponse, PurgeReason, RepairOp, Replica, ReplicaSession, SyncMessage,
    SyncService,
};
