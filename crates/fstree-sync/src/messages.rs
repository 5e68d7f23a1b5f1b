//! Replication protocol message types and their CBOR wire form.
//!
//! Requests flow from the filesystem layer (mutations) and from replicas
//! (FetchReplica / PullDiff) to the primary; the primary answers each request
//! and pushes `PurgeReplica` notifications unprompted.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use fstree_core::{Digest, EntryId, EntryMetadata, TreeSnapshot, UserId};

use crate::error::{Result, SyncError};

/// Unique identifier for a node on the sync network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a random node ID.
    pub fn random() -> Self {
        use rand::Rng;
        Self(rand::thread_rng().gen())
    }
}

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 0;

/// Message size limits, enforced on receipt.
pub mod limits {
    /// Max entries in PullDiff.known_state.
    pub const MAX_KNOWN_STATE: usize = 10_000;
    /// Max repair operations in one Diff.
    pub const MAX_REPAIR_OPS: usize = 100_000;
    /// Max nodes in one Replica snapshot.
    pub const MAX_SNAPSHOT_NODES: usize = 1_000_000;
    /// Max encoded message size in bytes.
    pub const MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;
}

/// A replica's last-observed `{entry_id -> aggregate_digest}` mapping.
///
/// Must contain at least the root.
pub type KnownState = BTreeMap<EntryId, Digest>;

/// One step of an incremental repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepairOp {
    /// Drop an entry and its subtree.
    Remove { entry_id: EntryId },
    /// Add an entry under an existing parent.
    Insert {
        entry_id: EntryId,
        parent_id: EntryId,
        metadata: EntryMetadata,
    },
    /// Replace an existing entry's metadata.
    Update {
        entry_id: EntryId,
        metadata: EntryMetadata,
    },
}

impl RepairOp {
    pub fn entry_id(&self) -> &EntryId {
        match self {
            RepairOp::Remove { entry_id }
            | RepairOp::Insert { entry_id, .. }
            | RepairOp::Update { entry_id, .. } => entry_id,
        }
    }

    pub fn is_remove(&self) -> bool {
        matches!(self, RepairOp::Remove { .. })
    }
}

/// Why a replica must discard its state and refetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PurgeReason {
    /// The requester reported no state for the current root.
    Absent,
    /// The requester's root digest is neither current nor journaled.
    Unrecognized,
    /// The repair would exceed the configured operation limit.
    DiffTooLarge,
    /// The requester's extra digests contradict its claimed root.
    InconsistentState,
    /// The primary has no root yet.
    NotInitialized,
    /// The primary discarded the tree on request.
    Requested,
    /// The primary rebuilt the tree from the entry store.
    Rebuilt,
}

/// Outcome of a PullDiff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PullDiffResponse {
    /// Ordered operations that bring the requester to `root_digest`.
    Diff {
        root_digest: Digest,
        ops: Vec<RepairOp>,
    },
    /// Incremental repair is not possible; refetch.
    PurgeRequired { reason: PurgeReason },
}

impl PullDiffResponse {
    pub fn is_purge(&self) -> bool {
        matches!(self, PullDiffResponse::PurgeRequired { .. })
    }
}

/// Protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMessage {
    // Requests
    /// Full snapshot request.
    FetchReplica { user_id: UserId },

    /// Incremental resync request.
    PullDiff {
        user_id: UserId,
        known_state: KnownState,
    },

    /// An entry was created in the entry store.
    NewFSEntry {
        user_id: UserId,
        /// None only when creating the root.
        parent_id: Option<EntryId>,
        entry_id: EntryId,
        metadata: EntryMetadata,
    },

    /// An entry's metadata changed in the entry store.
    UpdateFSEntry {
        user_id: UserId,
        entry_id: EntryId,
        metadata: EntryMetadata,
    },

    /// An entry (and its descendants) was removed from the entry store.
    RemoveFSEntry { user_id: UserId, entry_id: EntryId },

    /// An entry was moved under a new parent.
    MoveFSEntry {
        user_id: UserId,
        entry_id: EntryId,
        new_parent_id: EntryId,
        metadata: Option<EntryMetadata>,
    },

    // Responses and notifications
    /// FetchReplica response.
    Replica {
        user_id: UserId,
        snapshot: TreeSnapshot,
    },

    /// PullDiff response.
    Diff {
        user_id: UserId,
        response: PullDiffResponse,
    },

    /// Mutation applied; carries the new root digest.
    Ack { user_id: UserId, root_digest: Digest },

    /// Server-to-replica invalidation.
    PurgeReplica { user_id: UserId, reason: PurgeReason },

    /// Error condition.
    Error {
        /// Error code for programmatic handling.
        code: SyncErrorCode,
        /// Human-readable description.
        message: String,
    },
}

impl SyncMessage {
    /// The user a message concerns, if any.
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            SyncMessage::FetchReplica { user_id }
            | SyncMessage::PullDiff { user_id, .. }
            | SyncMessage::NewFSEntry { user_id, .. }
            | SyncMessage::UpdateFSEntry { user_id, .. }
            | SyncMessage::RemoveFSEntry { user_id, .. }
            | SyncMessage::MoveFSEntry { user_id, .. }
            | SyncMessage::Replica { user_id, .. }
            | SyncMessage::Diff { user_id, .. }
            | SyncMessage::Ack { user_id, .. }
            | SyncMessage::PurgeReplica { user_id, .. } => Some(*user_id),
            SyncMessage::Error { .. } => None,
        }
    }

    /// Whether this message is a request the service answers.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            SyncMessage::FetchReplica { .. }
                | SyncMessage::PullDiff { .. }
                | SyncMessage::NewFSEntry { .. }
                | SyncMessage::UpdateFSEntry { .. }
                | SyncMessage::RemoveFSEntry { .. }
                | SyncMessage::MoveFSEntry { .. }
        )
    }

    /// Check if this message respects size limits.
    pub fn validate_limits(&self) -> std::result::Result<(), &'static str> {
        match self {
            SyncMessage::PullDiff { known_state, .. } => {
                if known_state.is_empty() {
                    return Err("known_state must contain the root");
                }
                if known_state.len() > limits::MAX_KNOWN_STATE {
                    return Err("too many known_state entries");
                }
            }
            SyncMessage::Diff {
                response: PullDiffResponse::Diff { ops, .. },
                ..
            } => {
                if ops.len() > limits::MAX_REPAIR_OPS {
                    return Err("too many repair operations");
                }
            }
            SyncMessage::Replica { snapshot, .. } => {
                if snapshot.len() > limits::MAX_SNAPSHOT_NODES {
                    return Err("snapshot too large");
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Error codes for the replication protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum SyncErrorCode {
    /// Unknown/unspecified error.
    Unknown = 0,
    /// Protocol version mismatch.
    VersionMismatch = 1,
    /// Message too large.
    MessageTooLarge = 2,
    /// Invalid message format or contents.
    InvalidMessage = 3,
    /// No tree exists and none can be hydrated.
    UnknownUser = 4,
    /// Mutation named a parent that does not exist.
    ParentNotFound = 5,
    /// Mutation named an entry that already exists.
    DuplicateEntry = 6,
    /// Mutation named an entry that does not exist.
    EntryNotFound = 7,
    /// The root cannot be removed or moved.
    CannotRemoveRoot = 8,
    /// Move target lies inside the moved subtree.
    InvalidMove = 9,
    /// Resident tree limit reached.
    CapacityExceeded = 10,
    /// Message was not a request.
    UnexpectedMessage = 11,
    /// Internal error on peer.
    InternalError = 12,
}

/// Encode a message to its wire form: the protocol version byte followed
/// by the CBOR body.
pub fn encode_message(message: &SyncMessage) -> Result<Bytes> {
    let mut buf = vec![PROTOCOL_VERSION];
    ciborium::into_writer(message, &mut buf).map_err(|e| SyncError::Codec(e.to_string()))?;
    if buf.len() > limits::MAX_MESSAGE_BYTES {
        return Err(SyncError::MessageTooLarge {
            size: buf.len(),
            limit: limits::MAX_MESSAGE_BYTES,
        });
    }
    Ok(Bytes::from(buf))
}

/// Decode a message from its wire form.
///
/// Checks size, then version, then the CBOR body.
pub fn decode_message(bytes: &[u8]) -> Result<SyncMessage> {
    if bytes.len() > limits::MAX_MESSAGE_BYTES {
        return Err(SyncError::MessageTooLarge {
            size: bytes.len(),
            limit: limits::MAX_MESSAGE_BYTES,
        });
    }
    let (&version, body) = bytes
        .split_first()
        .ok_or_else(|| SyncError::Codec("empty message".into()))?;
    if version != PROTOCOL_VERSION {
        return Err(SyncError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            got: version,
        });
    }
    ciborium::from_reader(body).map_err(|e| SyncError::Codec(e.to_string()))
}
