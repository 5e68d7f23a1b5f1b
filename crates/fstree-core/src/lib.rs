//! # fstree Core
//!
//! Pure primitives for the fstree replication engine: digests, canonical
//! metadata encoding, and the per-user filesystem Merkle tree.
//!
//! This crate contains no I/O, no storage, no networking. It is pure computation
//! over content-addressed tree structures.
//!
//! ## Key Types
//!
//! - [`MerkleTree`] - One user's filesystem hierarchy, one node per entry
//! - [`MerkleNode`] - An entry with its own digest and aggregate digest
//! - [`Digest`] - A 32-byte Blake3 digest
//! - [`EntryId`] / [`UserId`] - Opaque identifiers supplied by the entry store
//! - [`EntryMetadata`] - The replicated attributes of an entry
//! - [`VersionedTree`] - A tree plus a bounded journal of recent revisions
//!
//! ## Hashing
//!
//! Metadata is digested over a deterministic CBOR encoding, and node digests
//! combine children in `entry_id` order. See the [`canonical`] module.

pub mod canonical;
pub mod digest;
pub mod error;
pub mod journal;
pub mod metadata;
pub mod snapshot;
pub mod tree;
pub mod types;
pub mod validation;

pub use canonical::{canonical_metadata_bytes, digest_of_metadata, digest_of_node};
pub use digest::Digest;
pub use error::{TreeError, ValidationError};
pub use journal::{Change, Journal, Revision, VersionedTree};
pub use metadata::{EntryKind, EntryMetadata, EntryRecord};
pub use snapshot::{SnapshotNode, TreeSnapshot};
pub use tree::{MerkleNode, MerkleTree};
pub use types::{EntryId, UserId};
pub use validation::{validate_entry_id, validate_metadata, validate_new_entry};
