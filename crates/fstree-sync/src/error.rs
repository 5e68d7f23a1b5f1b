//! Error types for the sync module.

use thiserror::Error;

use fstree_core::{TreeError, UserId, ValidationError};
use fstree_store::StoreError;

use crate::messages::SyncErrorCode;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Structural error from a tree mutation.
    #[error("tree error: {0}")]
    Tree(#[from] TreeError),

    /// Entry metadata or identifier failed validation.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// No tree exists for the user and none could be hydrated.
    #[error("unknown user: {0}")]
    UnknownUser(UserId),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(StoreError),

    /// Message validation failed.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Peer sent an error message.
    #[error("peer error ({code:?}): {message}")]
    PeerError { code: SyncErrorCode, message: String },

    /// Timeout waiting for peer.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Wire encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// Peer speaks a different protocol version.
    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u8, got: u8 },

    /// Encoded message exceeds the size limit.
    #[error("message is {size} bytes, limit is {limit}")]
    MessageTooLarge { size: usize, limit: usize },
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownUser(user_id) => SyncError::UnknownUser(user_id),
            StoreError::Tree(e) => SyncError::Tree(e),
            other => SyncError::Store(other),
        }
    }
}

impl SyncError {
    /// The wire code reported to a peer for this error.
    pub fn code(&self) -> SyncErrorCode {
        match self {
            SyncError::Tree(e) => match e {
                TreeError::ParentNotFound(_) => SyncErrorCode::ParentNotFound,
                TreeError::DuplicateEntry(_) | TreeError::RootAlreadyExists(_) => {
                    SyncErrorCode::DuplicateEntry
                }
                TreeError::EntryNotFound(_) => SyncErrorCode::EntryNotFound,
                TreeError::CannotRemoveRoot(_) => SyncErrorCode::CannotRemoveRoot,
                TreeError::InvalidMove { .. } => SyncErrorCode::InvalidMove,
                _ => SyncErrorCode::InternalError,
            },
            SyncError::Validation(_) | SyncError::InvalidMessage(_) | SyncError::Codec(_) => {
                SyncErrorCode::InvalidMessage
            }
            SyncError::VersionMismatch { .. } => SyncErrorCode::VersionMismatch,
            SyncError::MessageTooLarge { .. } => SyncErrorCode::MessageTooLarge,
            SyncError::UnknownUser(_) => SyncErrorCode::UnknownUser,
            SyncError::Store(StoreError::CapacityExceeded { .. }) => {
                SyncErrorCode::CapacityExceeded
            }
            SyncError::PeerError { code, .. } => *code,
            _ => SyncErrorCode::InternalError,
        }
    }

    /// Whether this error concerns a single undecodable frame rather than
    /// the link carrying it.
    pub fn is_frame_error(&self) -> bool {
        matches!(
            self,
            SyncError::Codec(_) | SyncError::VersionMismatch { .. } | SyncError::MessageTooLarge { .. }
        )
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;
    use fstree_core::EntryId;

    #[test]
    fn test_store_errors_flatten() {
        let err: SyncError = StoreError::UnknownUser(UserId(4)).into();
        assert!(matches!(err, SyncError::UnknownUser(UserId(4))));

        let err: SyncError = StoreError::Tree(TreeError::MissingRoot).into();
        assert!(matches!(err, SyncError::Tree(TreeError::MissingRoot)));

        let err: SyncError = StoreError::CapacityExceeded {
            resident: 1,
            limit: 1,
        }
        .into();
        assert_eq!(err.code(), SyncErrorCode::CapacityExceeded);
    }

    #[test]
    fn test_codes() {
        let err = SyncError::Tree(TreeError::ParentNotFound(EntryId::from("p")));
        assert_eq!(err.code(), SyncErrorCode::ParentNotFound);
        assert_eq!(
            SyncError::Validation(ValidationError::EmptyName).code(),
            SyncErrorCode::InvalidMessage
        );
        assert_eq!(
            SyncError::Timeout("pull".into()).code(),
            SyncErrorCode::InternalError
        );
    }

    #[test]
    fn test_frame_errors_are_transient() {
        let mismatch = SyncError::VersionMismatch { expected: 0, got: 1 };
        let oversize = SyncError::MessageTooLarge { size: 2, limit: 1 };
        assert!(mismatch.is_frame_error());
        assert!(oversize.is_frame_error());
        assert!(SyncError::Codec("bad".into()).is_frame_error());
        assert!(!SyncError::TransportError("closed".into()).is_frame_error());
    }
}
