//! SQLite persister.
//!
//! All stores share one `cache_entries` table keyed by
//! `(store_id, cache_key)`. Statements run synchronously on a single
//! connection guarded by a mutex; the guard is never held across an await.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use fresco_core::{FrescoError, FrescoResult, StorageError};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tokio::sync::broadcast;

use super::{CachePersister, ChangeFeed, ChangeKind, ChangeNotice, PersistedRow};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS cache_entries (
    store_id TEXT NOT NULL,
    cache_key TEXT NOT NULL,
    payload TEXT NOT NULL,
    fetched_at INTEGER NOT NULL,
    stale INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (store_id, cache_key)
)";

/// Errors raised by the SQLite backend.
#[derive(Debug, Error)]
pub enum SqliteCacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection lock poisoned")]
    LockPoisoned,
}

impl From<SqliteCacheError> for FrescoError {
    fn from(err: SqliteCacheError) -> Self {
        match err {
            SqliteCacheError::LockPoisoned => StorageError::LockPoisoned.into(),
            other => StorageError::Backend {
                backend: "sqlite",
                reason: other.to_string(),
            }
            .into(),
        }
    }
}

/// [`CachePersister`] backed by a SQLite database.
#[derive(Debug)]
pub struct SqlitePersister {
    conn: Mutex<Connection>,
    feed: ChangeFeed,
}

impl SqlitePersister {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SqliteCacheError> {
        Self::from_connection(Connection::open(path)?, ChangeFeed::default())
    }

    /// Open with a custom change-feed buffer size.
    pub fn open_with_change_buffer(
        path: impl AsRef<Path>,
        capacity: usize,
    ) -> Result<Self, SqliteCacheError> {
        Self::from_connection(Connection::open(path)?, ChangeFeed::new(capacity))
    }

    /// A private in-memory database. Contents vanish on drop.
    pub fn open_in_memory() -> Result<Self, SqliteCacheError> {
        Self::from_connection(Connection::open_in_memory()?, ChangeFeed::default())
    }

    fn from_connection(conn: Connection, feed: ChangeFeed) -> Result<Self, SqliteCacheError> {
        conn.execute(CREATE_TABLE, [])?;
        Ok(Self {
            conn: Mutex::new(conn),
            feed,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SqliteCacheError> {
        self.conn.lock().map_err(|_| SqliteCacheError::LockPoisoned)
    }

    fn store_keys(conn: &Connection, store_id: &str) -> Result<Vec<String>, SqliteCacheError> {
        let mut stmt = conn.prepare("SELECT cache_key FROM cache_entries WHERE store_id = ?1")?;
        let keys = stmt
            .query_map(params![store_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn read_sync(&self, store_id: &str, key: &str) -> Result<Option<PersistedRow>, SqliteCacheError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT payload, fetched_at, stale FROM cache_entries
                 WHERE store_id = ?1 AND cache_key = ?2",
                params![store_id, key],
                |row| {
                    Ok(PersistedRow {
                        store_id: store_id.to_string(),
                        key: key.to_string(),
                        payload: row.get(0)?,
                        fetched_at_millis: row.get(1)?,
                        stale: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn write_sync(&self, row: &PersistedRow) -> Result<(), SqliteCacheError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO cache_entries (store_id, cache_key, payload, fetched_at, stale)
             VALUES (?1, ?2, ?3, ?4, 0)
             ON CONFLICT(store_id, cache_key) DO UPDATE SET
                 payload = excluded.payload,
                 fetched_at = excluded.fetched_at,
                 stale = 0",
            params![row.store_id, row.key, row.payload, row.fetched_at_millis],
        )?;
        Ok(())
    }

    fn mark_stale_sync(&self, store_id: &str, key: &str) -> Result<bool, SqliteCacheError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE cache_entries SET stale = 1 WHERE store_id = ?1 AND cache_key = ?2",
            params![store_id, key],
        )?;
        Ok(changed > 0)
    }

    fn mark_store_stale_sync(&self, store_id: &str) -> Result<Vec<String>, SqliteCacheError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let keys = Self::store_keys(&tx, store_id)?;
        tx.execute(
            "UPDATE cache_entries SET stale = 1 WHERE store_id = ?1",
            params![store_id],
        )?;
        tx.commit()?;
        Ok(keys)
    }

    fn remove_sync(&self, store_id: &str, key: &str) -> Result<bool, SqliteCacheError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "DELETE FROM cache_entries WHERE store_id = ?1 AND cache_key = ?2",
            params![store_id, key],
        )?;
        Ok(changed > 0)
    }

    fn clear_store_sync(&self, store_id: &str) -> Result<Vec<String>, SqliteCacheError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let keys = Self::store_keys(&tx, store_id)?;
        tx.execute(
            "DELETE FROM cache_entries WHERE store_id = ?1",
            params![store_id],
        )?;
        tx.commit()?;
        Ok(keys)
    }

    /// Total number of rows across all stores.
    pub fn row_count(&self) -> FrescoResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))
            .map_err(SqliteCacheError::from)?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl CachePersister for SqlitePersister {
    async fn read(&self, store_id: &str, key: &str) -> FrescoResult<Option<PersistedRow>> {
        Ok(self.read_sync(store_id, key)?)
    }

    async fn write(&self, row: PersistedRow) -> FrescoResult<()> {
        self.write_sync(&row)?;
        self.feed
            .publish(ChangeNotice::new(row.store_id, row.key, ChangeKind::Written));
        Ok(())
    }

    async fn mark_stale(&self, store_id: &str, key: &str) -> FrescoResult<bool> {
        let found = self.mark_stale_sync(store_id, key)?;
        if found {
            self.feed
                .publish(ChangeNotice::new(store_id, key, ChangeKind::MarkedStale));
        }
        Ok(found)
    }

    async fn mark_store_stale(&self, store_id: &str) -> FrescoResult<u64> {
        let keys = self.mark_store_stale_sync(store_id)?;
        for key in &keys {
            self.feed
                .publish(ChangeNotice::new(store_id, key.as_str(), ChangeKind::MarkedStale));
        }
        Ok(keys.len() as u64)
    }

    async fn remove(&self, store_id: &str, key: &str) -> FrescoResult<bool> {
        let removed = self.remove_sync(store_id, key)?;
        if removed {
            self.feed
                .publish(ChangeNotice::new(store_id, key, ChangeKind::Removed));
        }
        Ok(removed)
    }

    async fn clear_store(&self, store_id: &str) -> FrescoResult<u64> {
        let keys = self.clear_store_sync(store_id)?;
        for key in &keys {
            self.feed
                .publish(ChangeNotice::new(store_id, key.as_str(), ChangeKind::Removed));
        }
        Ok(keys.len() as u64)
    }

    fn changes(&self) -> broadcast::Receiver<ChangeNotice> {
        self.feed.subscribe()
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
