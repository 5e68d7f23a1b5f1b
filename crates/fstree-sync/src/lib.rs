//! # fstree Sync
//!
//! Incremental replication of per-user filesystem trees.
//!
//! ## Overview
//!
//! A primary holds the authoritative tree for each user. Replicas bootstrap
//! from a full snapshot and then stay current by reporting the root digest
//! they hold; the primary answers with the ordered repair operations that
//! bring them forward, or tells them to purge and refetch when incremental
//! repair is not possible.
//!
//! ## Key Properties
//!
//! - **Digest-pruned**: subtrees whose aggregate digests match are never visited
//! - **Deterministic**: the same inputs always produce the same operation list
//! - **Always recoverable**: purge-and-refetch is correct from any state
//! - **Per-user isolation**: one user's traffic never blocks another's
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fstree_store::{NullEntrySource, ReplicaStore, StoreConfig};
//! use fstree_sync::{DiffConfig, SyncConfig, SyncService};
//!
//! async fn example() {
//!     let store = Arc::new(ReplicaStore::new(Arc::new(NullEntrySource), StoreConfig::default()));
//!     let service = SyncService::new(store, DiffConfig::default(), SyncConfig::default());
//!
//!     // service.new_fs_entry(user_id, None, root_id, root_metadata).await?;
//!     // let snapshot = service.fetch_replica(user_id).await?;
//! }
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Filesystem layer            Primary                      Replica
//!   |-- NewFSEntry ------------>|                              |
//!   |<------------------- Ack --|                              |
//!   |                           |<------------ FetchReplica ---|
//!   |                           |--- Replica ----------------->|
//!   |-- RemoveFSEntry --------->|                              |
//!   |<------------------- Ack --|                              |
//!   |                           |<------------ PullDiff -------|
//!   |                           |--- Diff (ops | purge) ------>|
//!   |                           |--- PurgeReplica ------------>|
//! ```

pub mod diff;
pub mod error;
pub mod messages;
pub mod replica;
pub mod server;
pub mod service;
pub mod transport;
pub mod view;

pub use diff::{DiffConfig, DiffEngine};
pub use error::{Result, SyncError};
pub use messages::{
    decode_message, encode_message, limits, KnownState, NodeId, PullDiffResponse, PurgeReason,
    RepairOp, SyncErrorCode, SyncMessage, PROTOCOL_VERSION,
};
pub use replica::{Replica, ReplicaSession, ReplicaState, SyncOutcome};
pub use server::SyncServer;
pub use service::{PurgeNotice, SyncConfig, SyncService};
pub use transport::{memory::MemoryNetwork, memory::MemoryTransport, Transport};
pub use view::{DigestView, RemoteView};
