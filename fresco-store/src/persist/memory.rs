//! Process-local persister.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use fresco_core::{FrescoResult, StorageError};
use tokio::sync::broadcast;

use super::{CachePersister, ChangeFeed, ChangeKind, ChangeNotice, PersistedRow, RowKey};

#[derive(Debug, Clone)]
struct StoredRow {
    payload: String,
    fetched_at_millis: i64,
    stale: bool,
}

/// In-memory [`CachePersister`].
///
/// Rows live for the lifetime of the value. The lock is never held across
/// an await point.
#[derive(Debug, Default)]
pub struct InMemoryPersister {
    rows: RwLock<HashMap<RowKey, StoredRow>>,
    feed: ChangeFeed,
}

impl InMemoryPersister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with a custom change-feed buffer size.
    pub fn with_change_buffer(capacity: usize) -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            feed: ChangeFeed::new(capacity),
        }
    }

    /// Number of rows across all stores.
    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn store_keys(rows: &HashMap<RowKey, StoredRow>, store_id: &str) -> Vec<RowKey> {
        rows.keys()
            .filter(|k| k.store_id() == store_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CachePersister for InMemoryPersister {
    async fn read(&self, store_id: &str, key: &str) -> FrescoResult<Option<PersistedRow>> {
        let rows = self.rows.read().map_err(|_| StorageError::LockPoisoned)?;
        let row = rows
            .get(&RowKey::new(store_id, key))
            .map(|stored| PersistedRow {
                store_id: store_id.to_string(),
                key: key.to_string(),
                payload: stored.payload.clone(),
                fetched_at_millis: stored.fetched_at_millis,
                stale: stored.stale,
            });
        Ok(row)
    }

    async fn write(&self, row: PersistedRow) -> FrescoResult<()> {
        let notice = ChangeNotice::new(row.store_id.clone(), row.key.clone(), ChangeKind::Written);
        {
            let mut rows = self.rows.write().map_err(|_| StorageError::LockPoisoned)?;
            rows.insert(
                row.row_key(),
                StoredRow {
                    payload: row.payload,
                    fetched_at_millis: row.fetched_at_millis,
                    stale: false,
                },
            );
        }
        self.feed.publish(notice);
        Ok(())
    }

    async fn mark_stale(&self, store_id: &str, key: &str) -> FrescoResult<bool> {
        let found = {
            let mut rows = self.rows.write().map_err(|_| StorageError::LockPoisoned)?;
            match rows.get_mut(&RowKey::new(store_id, key)) {
                Some(stored) => {
                    stored.stale = true;
                    true
                }
                None => false,
            }
        };
        if found {
            self.feed
                .publish(ChangeNotice::new(store_id, key, ChangeKind::MarkedStale));
        }
        Ok(found)
    }

    async fn mark_store_stale(&self, store_id: &str) -> FrescoResult<u64> {
        let flagged = {
            let mut rows = self.rows.write().map_err(|_| StorageError::LockPoisoned)?;
            let keys = Self::store_keys(&rows, store_id);
            for key in &keys {
                if let Some(stored) = rows.get_mut(key) {
                    stored.stale = true;
                }
            }
            keys
        };
        for key in &flagged {
            self.feed
                .publish(ChangeNotice::new(store_id, key.key(), ChangeKind::MarkedStale));
        }
        Ok(flagged.len() as u64)
    }

    async fn remove(&self, store_id: &str, key: &str) -> FrescoResult<bool> {
        let removed = {
            let mut rows = self.rows.write().map_err(|_| StorageError::LockPoisoned)?;
            rows.remove(&RowKey::new(store_id, key)).is_some()
        };
        if removed {
            self.feed
                .publish(ChangeNotice::new(store_id, key, ChangeKind::Removed));
        }
        Ok(removed)
    }

    async fn clear_store(&self, store_id: &str) -> FrescoResult<u64> {
        let removed = {
            let mut rows = self.rows.write().map_err(|_| StorageError::LockPoisoned)?;
            let keys = Self::store_keys(&rows, store_id);
            for key in &keys {
                rows.remove(key);
            }
            keys
        };
        for key in &removed {
            self.feed
                .publish(ChangeNotice::new(store_id, key.key(), ChangeKind::Removed));
        }
        Ok(removed.len() as u64)
    }

    fn changes(&self) -> broadcast::Receiver<ChangeNotice> {
        self.feed.subscribe()
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
