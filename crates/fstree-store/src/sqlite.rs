//! SQLite implementation of the EntrySource trait.
//!
//! Mirrors the relational `fsentries` table the filesystem layer owns. Uses
//! rusqlite with bundled SQLite, wrapped in async via `spawn_blocking`.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection};

use fstree_core::{EntryId, EntryKind, EntryMetadata, EntryRecord, UserId};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::EntrySource;

/// SQLite-backed entry source.
///
/// Thread-safe via internal Mutex. All operations run on the blocking pool.
#[derive(Clone)]
pub struct SqliteEntrySource {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEntrySource {
    /// Open a SQLite database at the given path, creating and migrating it
    /// as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert or replace a single entry row.
    pub async fn upsert_entry(&self, user_id: UserId, record: &EntryRecord) -> Result<()> {
        let record = record.clone();
        self.blocking(move |conn| upsert_row(conn, user_id, &record))
            .await
    }

    /// Insert or replace many rows in one transaction.
    pub async fn upsert_entries(&self, user_id: UserId, records: Vec<EntryRecord>) -> Result<()> {
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            for record in &records {
                upsert_row(&tx, user_id, record)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Delete a row and all rows beneath it. Returns the number removed.
    pub async fn remove_entry(&self, user_id: UserId, entry_id: &EntryId) -> Result<usize> {
        let entry_id = entry_id.clone();
        self.blocking(move |conn| {
            let removed = conn.execute(
                "WITH RECURSIVE doomed(entry_id) AS (
                     SELECT entry_id FROM fsentries WHERE user_id = ?1 AND entry_id = ?2
                     UNION
                     SELECT f.entry_id FROM fsentries f
                     JOIN doomed d ON f.parent_id = d.entry_id
                     WHERE f.user_id = ?1
                 )
                 DELETE FROM fsentries
                 WHERE user_id = ?1 AND entry_id IN (SELECT entry_id FROM doomed)",
                params![user_id.get(), entry_id.as_str()],
            )?;
            Ok(removed)
        })
        .await
    }

    /// Run a closure against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&conn)?;
            f(&mut conn)
        })
        .await?
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|e| {
        StoreError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
            Some(format!("mutex poisoned: {}", e)),
        ))
    })
}

fn upsert_row(conn: &Connection, user_id: UserId, record: &EntryRecord) -> Result<()> {
    let meta = &record.metadata;
    let size = i64::try_from(meta.size)
        .map_err(|_| StoreError::InvalidData(format!("size {} out of range", meta.size)))?;

    conn.execute(
        "INSERT OR REPLACE INTO fsentries (
            user_id, entry_id, parent_id, name, is_dir, size, modified, attributes, hints
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            user_id.get(),
            record.entry_id.as_str(),
            record.parent_id.as_ref().map(EntryId::as_str),
            meta.name,
            meta.kind.to_u8(),
            size,
            meta.modified,
            encode_map(&meta.attributes)?,
            encode_map(&meta.hints)?,
        ],
    )?;
    Ok(())
}

/// Raw column values, decoded outside the rusqlite row callback.
struct Row {
    entry_id: String,
    parent_id: Option<String>,
    name: String,
    is_dir: u8,
    size: i64,
    modified: i64,
    attributes: Vec<u8>,
    hints: Option<Vec<u8>>,
}

impl Row {
    fn into_record(self) -> Result<EntryRecord> {
        let kind = EntryKind::from_u8(self.is_dir).ok_or_else(|| {
            StoreError::InvalidData(format!("entry {}: bad kind {}", self.entry_id, self.is_dir))
        })?;
        let size = u64::try_from(self.size).map_err(|_| {
            StoreError::InvalidData(format!("entry {}: negative size", self.entry_id))
        })?;

        let metadata = EntryMetadata {
            name: self.name,
            kind,
            size,
            modified: self.modified,
            attributes: decode_map(&self.attributes)?,
            hints: match &self.hints {
                Some(bytes) => decode_map(bytes)?,
                None => BTreeMap::new(),
            },
        };

        Ok(EntryRecord::new(
            EntryId::from(self.entry_id),
            self.parent_id.map(EntryId::from),
            metadata,
        ))
    }
}

fn encode_map(map: &BTreeMap<String, String>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(map, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode_map(bytes: &[u8]) -> Result<BTreeMap<String, String>> {
    if bytes.is_empty() {
        return Ok(BTreeMap::new());
    }
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

#[async_trait]
impl EntrySource for SqliteEntrySource {
    async fn load_entries(&self, user_id: UserId) -> Result<Option<Vec<EntryRecord>>> {
        let rows = self
            .blocking(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT entry_id, parent_id, name, is_dir, size, modified, attributes, hints
                     FROM fsentries WHERE user_id = ?1",
                )?;
                let rows = stmt
                    .query_map(params![user_id.get()], |row| {
                        Ok(Row {
                            entry_id: row.get(0)?,
                            parent_id: row.get(1)?,
                            name: row.get(2)?,
                            is_dir: row.get(3)?,
                            size: row.get(4)?,
                            modified: row.get(5)?,
                            attributes: row.get(6)?,
                            hints: row.get(7)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let records = rows
            .into_iter()
            .map(Row::into_record)
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!(user = %user_id, entries = records.len(), "loaded entries from sqlite");
        Ok(Some(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(id: &str, parent: Option<&str>, meta: EntryMetadata) -> EntryRecord {
        EntryRecord::new(EntryId::from(id), parent.map(EntryId::from), meta)
    }

    fn sample() -> Vec<EntryRecord> {
        vec![
            record("root", None, EntryMetadata::directory("/", 0)),
            record("docs", Some("root"), EntryMetadata::directory("docs", 10)),
            record(
                "readme",
                Some("docs"),
                EntryMetadata::file("readme.md", 1024, 20)
                    .with_attribute("path", "/docs/readme.md")
                    .with_hint("thumbnail", "none"),
            ),
            record("photos", Some("root"), EntryMetadata::directory("photos", -5)),
        ]
    }

    #[tokio::test]
    async fn test_roundtrip_rows() {
        let source = SqliteEntrySource::open_memory().unwrap();
        let user = UserId(1);

        assert!(source.load_entries(user).await.unwrap().is_none());

        source.upsert_entries(user, sample()).await.unwrap();
        let mut loaded = source.load_entries(user).await.unwrap().unwrap();
        loaded.sort_by(|a, b| a.entry_id.cmp(&b.entry_id));

        let mut expected = sample();
        expected.sort_by(|a, b| a.entry_id.cmp(&b.entry_id));
        assert_eq!(loaded, expected);
    }

    #[tokio::test]
    async fn test_users_are_isolated() {
        let source = SqliteEntrySource::open_memory().unwrap();
        source.upsert_entries(UserId(1), sample()).await.unwrap();
        assert!(source.load_entries(UserId(2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_cascades() {
        let source = SqliteEntrySource::open_memory().unwrap();
        let user = UserId(1);
        source.upsert_entries(user, sample()).await.unwrap();

        let removed = source.remove_entry(user, &EntryId::from("docs")).await.unwrap();
        assert_eq!(removed, 2);

        let loaded = source.load_entries(user).await.unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let source = SqliteEntrySource::open_memory().unwrap();
        let user = UserId(1);
        source.upsert_entries(user, sample()).await.unwrap();
        source
            .upsert_entry(
                user,
                &record("photos", Some("root"), EntryMetadata::directory("pictures", 0)),
            )
            .await
            .unwrap();

        let loaded = source.load_entries(user).await.unwrap().unwrap();
        let photos = loaded
            .iter()
            .find(|r| r.entry_id.as_str() == "photos")
            .unwrap();
        assert_eq!(photos.metadata.name, "pictures");
        assert_eq!(loaded.len(), 4);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("entries.db");

        {
            let source = SqliteEntrySource::open(&path).unwrap();
            source.upsert_entries(UserId(9), sample()).await.unwrap();
        }

        let source = SqliteEntrySource::open(&path).unwrap();
        let loaded = source.load_entries(UserId(9)).await.unwrap().unwrap();
        assert_eq!(loaded.len(), 4);
    }
}
