//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;

use fstree_core::error::Result;
use fstree_core::{EntryId, EntryMetadata, EntryRecord, MerkleTree, UserId, VersionedTree};
use fstree_store::{MemoryEntrySource, ReplicaStore, StoreConfig};
use fstree_sync::{DiffConfig, SyncConfig, SyncMessage, SyncService};

/// Shorthand for an entry id.
pub fn id(s: &str) -> EntryId {
    EntryId::from(s)
}

/// Shorthand for a source row.
pub fn record(entry_id: &str, parent_id: Option<&str>, metadata: EntryMetadata) -> EntryRecord {
    EntryRecord::new(id(entry_id), parent_id.map(id), metadata)
}

/// `/` -> `docs` -> `readme.md`.
pub fn docs_records() -> Vec<EntryRecord> {
    vec![
        record("root", None, EntryMetadata::directory("/", 0)),
        record("docs", Some("root"), EntryMetadata::directory("docs", 0)),
        record(
            "readme",
            Some("docs"),
            EntryMetadata::file("readme.md", 1024, 1_700_000_000),
        ),
    ]
}

/// `docs_records` plus `/photos` holding two images.
pub fn photos_records() -> Vec<EntryRecord> {
    let mut records = docs_records();
    records.extend([
        record("photos", Some("root"), EntryMetadata::directory("photos", 0)),
        record(
            "cat",
            Some("photos"),
            EntryMetadata::file("cat.jpg", 52_000, 1_700_000_100),
        ),
        record(
            "dog",
            Some("photos"),
            EntryMetadata::file("dog.jpg", 61_000, 1_700_000_200),
        ),
    ]);
    records
}

/// Build a tree from rows, panicking on invalid input.
pub fn tree_of(records: Vec<EntryRecord>) -> MerkleTree {
    match MerkleTree::from_entries(records) {
        Ok(tree) => tree,
        Err(e) => panic!("fixture rows do not form a tree: {e}"),
    }
}

/// One change reported by the entry store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEvent {
    Insert {
        parent_id: Option<EntryId>,
        entry_id: EntryId,
        metadata: EntryMetadata,
    },
    Update {
        entry_id: EntryId,
        metadata: EntryMetadata,
    },
    Remove {
        entry_id: EntryId,
    },
    Move {
        entry_id: EntryId,
        new_parent_id: EntryId,
        metadata: Option<EntryMetadata>,
    },
}

impl TreeEvent {
    pub fn insert(parent_id: &str, entry_id: &str, metadata: EntryMetadata) -> Self {
        TreeEvent::Insert {
            parent_id: Some(id(parent_id)),
            entry_id: id(entry_id),
            metadata,
        }
    }

    pub fn update(entry_id: &str, metadata: EntryMetadata) -> Self {
        TreeEvent::Update {
            entry_id: id(entry_id),
            metadata,
        }
    }

    pub fn remove(entry_id: &str) -> Self {
        TreeEvent::Remove {
            entry_id: id(entry_id),
        }
    }

    pub fn relocate(entry_id: &str, new_parent_id: &str) -> Self {
        TreeEvent::Move {
            entry_id: id(entry_id),
            new_parent_id: id(new_parent_id),
            metadata: None,
        }
    }

    /// Apply directly to a journaled tree.
    pub fn apply(&self, tree: &mut VersionedTree) -> Result<()> {
        match self {
            TreeEvent::Insert {
                parent_id,
                entry_id,
                metadata,
            } => tree.insert(parent_id.as_ref(), entry_id.clone(), metadata.clone()),
            TreeEvent::Update { entry_id, metadata } => {
                tree.update_metadata(entry_id, metadata.clone())
            }
            TreeEvent::Remove { entry_id } => tree.remove(entry_id).map(|_| ()),
            TreeEvent::Move {
                entry_id,
                new_parent_id,
                metadata,
            } => tree.move_entry(entry_id, new_parent_id, metadata.clone()),
        }
    }

    /// The request the filesystem layer would send for this event.
    pub fn to_message(&self, user_id: UserId) -> SyncMessage {
        match self.clone() {
            TreeEvent::Insert {
                parent_id,
                entry_id,
                metadata,
            } => SyncMessage::NewFSEntry {
                user_id,
                parent_id,
                entry_id,
                metadata,
            },
            TreeEvent::Update { entry_id, metadata } => SyncMessage::UpdateFSEntry {
                user_id,
                entry_id,
                metadata,
            },
            TreeEvent::Remove { entry_id } => SyncMessage::RemoveFSEntry { user_id, entry_id },
            TreeEvent::Move {
                entry_id,
                new_parent_id,
                metadata,
            } => SyncMessage::MoveFSEntry {
                user_id,
                entry_id,
                new_parent_id,
                metadata,
            },
        }
    }
}

/// A service over an in-memory entry store.
pub struct TreeFixture {
    pub user_id: UserId,
    pub source: Arc<MemoryEntrySource>,
    pub store: Arc<ReplicaStore>,
    pub service: Arc<SyncService>,
}

impl TreeFixture {
    /// Default configuration, empty source.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default(), DiffConfig::default(), SyncConfig::default())
    }

    pub fn with_config(store: StoreConfig, diff: DiffConfig, sync: SyncConfig) -> Self {
        let source = Arc::new(MemoryEntrySource::new());
        let store = Arc::new(ReplicaStore::new(source.clone(), store));
        let service = Arc::new(SyncService::new(store.clone(), diff, sync));
        Self {
            user_id: UserId(1),
            source,
            store,
            service,
        }
    }

    /// Pre-populate the entry source for this fixture's user.
    pub fn with_source_rows(self, records: Vec<EntryRecord>) -> Self {
        self.source.put_all(self.user_id, records);
        self
    }

    /// Insert every record through the service, in order.
    pub async fn ingest(&self, records: &[EntryRecord]) -> fstree_sync::Result<()> {
        for r in records {
            self.service
                .new_fs_entry(
                    self.user_id,
                    r.parent_id.clone(),
                    r.entry_id.clone(),
                    r.metadata.clone(),
                )
                .await?;
        }
        Ok(())
    }

    /// Deliver an event through the service, mirroring it in the source
    /// first as the store of record would.
    pub async fn deliver(&self, event: &TreeEvent) -> fstree_sync::Result<fstree_core::Digest> {
        let user = self.user_id;
        match event.clone() {
            TreeEvent::Insert {
                parent_id,
                entry_id,
                metadata,
            } => {
                self.source.put(
                    user,
                    EntryRecord::new(entry_id.clone(), parent_id.clone(), metadata.clone()),
                );
                self.service
                    .new_fs_entry(user, parent_id, entry_id, metadata)
                    .await
            }
            TreeEvent::Update { entry_id, metadata } => {
                self.service.update_fs_entry(user, entry_id, metadata).await
            }
            TreeEvent::Remove { entry_id } => {
                self.source.remove(user, &entry_id);
                self.service.remove_fs_entry(user, entry_id).await
            }
            TreeEvent::Move {
                entry_id,
                new_parent_id,
                metadata,
            } => {
                self.service
                    .move_fs_entry(user, entry_id, new_parent_id, metadata)
                    .await
            }
        }
    }
}

impl Default for TreeFixture {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_rows_form_trees() {
        assert_eq!(tree_of(docs_records()).len(), 3);
        assert_eq!(tree_of(photos_records()).len(), 6);
    }

    #[test]
    fn test_events_apply() {
        let mut tree = VersionedTree::from_tree(tree_of(photos_records()), 16);
        TreeEvent::relocate("readme", "photos").apply(&mut tree).unwrap();
        TreeEvent::remove("docs").apply(&mut tree).unwrap();
        TreeEvent::update("cat", EntryMetadata::file("cat.png", 1, 0))
            .apply(&mut tree)
            .unwrap();
        assert_eq!(tree.tree().len(), 5);
        assert_eq!(tree.journal().len(), 3);
    }

    #[tokio::test]
    async fn test_fixture_ingest_and_hydrate() {
        let fixture = TreeFixture::new();
        fixture.ingest(&docs_records()).await.unwrap();
        let snapshot = fixture.service.fetch_replica(fixture.user_id).await.unwrap();
        assert_eq!(snapshot.root_digest, tree_of(docs_records()).root_digest());

        let hydrating = TreeFixture::new().with_source_rows(docs_records());
        let snapshot = hydrating
            .service
            .fetch_replica(hydrating.user_id)
            .await
            .unwrap();
        assert_eq!(snapshot.len(), 3);
    }
}
