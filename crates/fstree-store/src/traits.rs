//! EntrySource trait: the interface to the external entry store of record.
//!
//! The engine never owns filesystem entries. Whenever a tree is not resident
//! it is rebuilt from whatever the entry store currently holds for the user.

use async_trait::async_trait;
use fstree_core::{EntryRecord, UserId};

use crate::error::Result;

/// Read access to the entry store of record.
///
/// Implementations must return every entry the user owns, root included,
/// as flat `{entry_id, parent_id, metadata}` rows. Row order is irrelevant.
#[async_trait]
pub trait EntrySource: Send + Sync {
    /// Load all entries for a user.
    ///
    /// Returns `None` if the store knows nothing about the user.
    async fn load_entries(&self, user_id: UserId) -> Result<Option<Vec<EntryRecord>>>;

    /// Whether a discarded tree can be rebuilt from this source.
    ///
    /// Sources that cannot rehydrate must never have their trees evicted.
    fn can_rehydrate(&self) -> bool {
        true
    }
}
