//! In-memory entry sources.
//!
//! [`MemoryEntrySource`] is primarily for testing and embedding; it has the
//! same semantics as the SQLite source with no persistence.
//! [`NullEntrySource`] backs purely in-memory operation.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use fstree_core::{EntryId, EntryRecord, UserId};

use crate::error::Result;
use crate::traits::EntrySource;

/// In-memory entry store.
///
/// Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryEntrySource {
    users: RwLock<HashMap<UserId, BTreeMap<EntryId, EntryRecord>>>,
}

impl MemoryEntrySource {
    /// Create a new empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry row.
    pub fn put(&self, user_id: UserId, record: EntryRecord) {
        let mut users = self.users.write().unwrap_or_else(|e| e.into_inner());
        users
            .entry(user_id)
            .or_default()
            .insert(record.entry_id.clone(), record);
    }

    /// Insert many rows at once.
    pub fn put_all(&self, user_id: UserId, records: impl IntoIterator<Item = EntryRecord>) {
        let mut users = self.users.write().unwrap_or_else(|e| e.into_inner());
        let rows = users.entry(user_id).or_default();
        for record in records {
            rows.insert(record.entry_id.clone(), record);
        }
    }

    /// Delete a row and every row beneath it. Returns the number removed.
    pub fn remove(&self, user_id: UserId, entry_id: &EntryId) -> usize {
        let mut users = self.users.write().unwrap_or_else(|e| e.into_inner());
        let Some(rows) = users.get_mut(&user_id) else {
            return 0;
        };

        let mut doomed = vec![entry_id.clone()];
        let mut i = 0;
        while i < doomed.len() {
            let parent = doomed[i].clone();
            doomed.extend(
                rows.values()
                    .filter(|r| r.parent_id.as_ref() == Some(&parent))
                    .map(|r| r.entry_id.clone()),
            );
            i += 1;
        }

        doomed.iter().filter(|id| rows.remove(*id).is_some()).count()
    }

    /// Forget a user entirely.
    pub fn remove_user(&self, user_id: UserId) {
        let mut users = self.users.write().unwrap_or_else(|e| e.into_inner());
        users.remove(&user_id);
    }
}

#[async_trait]
impl EntrySource for MemoryEntrySource {
    async fn load_entries(&self, user_id: UserId) -> Result<Option<Vec<EntryRecord>>> {
        let users = self.users.read().unwrap_or_else(|e| e.into_inner());
        Ok(users
            .get(&user_id)
            .map(|rows| rows.values().cloned().collect()))
    }
}

/// A source with nothing in it.
///
/// Trees only come into existence through mutation and are never evicted.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEntrySource;

#[async_trait]
impl EntrySource for NullEntrySource {
    async fn load_entries(&self, _user_id: UserId) -> Result<Option<Vec<EntryRecord>>> {
        Ok(None)
    }

    fn can_rehydrate(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fstree_core::EntryMetadata;

    fn record(id: &str, parent: Option<&str>) -> EntryRecord {
        EntryRecord::new(
            EntryId::from(id),
            parent.map(EntryId::from),
            EntryMetadata::directory(if parent.is_none() { "/" } else { id }, 0),
        )
    }

    #[tokio::test]
    async fn test_put_and_load() {
        let source = MemoryEntrySource::new();
        let user = UserId(1);

        assert!(source.load_entries(user).await.unwrap().is_none());

        source.put(user, record("root", None));
        source.put(user, record("docs", Some("root")));

        let rows = source.load_entries(user).await.unwrap().unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_cascades() {
        let source = MemoryEntrySource::new();
        let user = UserId(1);
        source.put_all(
            user,
            vec![
                record("root", None),
                record("docs", Some("root")),
                record("readme", Some("docs")),
                record("photos", Some("root")),
            ],
        );

        assert_eq!(source.remove(user, &EntryId::from("docs")), 2);
        let rows = source.load_entries(user).await.unwrap().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(source.remove(user, &EntryId::from("docs")), 0);
    }

    #[tokio::test]
    async fn test_null_source() {
        let source = NullEntrySource;
        assert!(source.load_entries(UserId(7)).await.unwrap().is_none());
        assert!(!source.can_rehydrate());
    }
}
