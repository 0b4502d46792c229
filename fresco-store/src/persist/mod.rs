//! Persistence layer for store cache lines.
//!
//! A [`CachePersister`] holds one row per `(store_id, key)` pair. Payloads
//! are opaque JSON text; typed encoding happens in the store. Three backends
//! ship with the crate:
//!
//! - [`InMemoryPersister`]: process-local map, for tests and ephemeral caches.
//! - [`SqlitePersister`]: single-file relational cache (`cache_entries` table).
//! - [`LmdbPersister`]: memory-mapped key/value cache.
//!
//! Every mutation is announced on the persister's [`ChangeFeed`] so that
//! stores with live updates can re-read rows written by other stores or
//! other code paths.

mod changes;
mod lmdb_backend;
mod memory;
mod row_key;
mod sqlite_backend;

pub use changes::{ChangeFeed, ChangeKind, ChangeNotice};
pub use lmdb_backend::{LmdbCacheError, LmdbPersister};
pub use memory::InMemoryPersister;
pub use row_key::RowKey;
pub use sqlite_backend::{SqliteCacheError, SqlitePersister};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use fresco_core::FrescoResult;
use tokio::sync::broadcast;

/// One persisted cache line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedRow {
    pub store_id: String,
    pub key: String,
    /// JSON-encoded value.
    pub payload: String,
    /// Epoch milliseconds of the successful fetch that produced the payload.
    pub fetched_at_millis: i64,
    pub stale: bool,
}

impl PersistedRow {
    /// A freshly fetched, non-stale row.
    pub fn new(
        store_id: impl Into<String>,
        key: impl Into<String>,
        payload: impl Into<String>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            store_id: store_id.into(),
            key: key.into(),
            payload: payload.into(),
            fetched_at_millis: fetched_at.timestamp_millis(),
            stale: false,
        }
    }

    /// Fetch time as a UTC timestamp.
    ///
    /// Out-of-range millisecond values collapse to the Unix epoch, which
    /// makes the row maximally old.
    pub fn fetched_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.fetched_at_millis)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    pub fn row_key(&self) -> RowKey {
        RowKey::new(self.store_id.clone(), self.key.clone())
    }
}

/// Storage backend for store cache lines.
///
/// Implementations must be safe to share between stores and tasks. A write
/// replaces the row wholesale and clears its stale flag. Every successful
/// mutation publishes a [`ChangeNotice`] after it is durable.
#[async_trait]
pub trait CachePersister: Send + Sync {
    /// Read the row for `(store_id, key)`, if present.
    async fn read(&self, store_id: &str, key: &str) -> FrescoResult<Option<PersistedRow>>;

    /// Insert or replace a row.
    async fn write(&self, row: PersistedRow) -> FrescoResult<()>;

    /// Flag one row stale. Returns false when the row does not exist.
    async fn mark_stale(&self, store_id: &str, key: &str) -> FrescoResult<bool>;

    /// Flag every row of a store stale. Returns the number of rows flagged.
    async fn mark_store_stale(&self, store_id: &str) -> FrescoResult<u64>;

    /// Delete one row. Returns false when the row did not exist.
    async fn remove(&self, store_id: &str, key: &str) -> FrescoResult<bool>;

    /// Delete every row of a store. Returns the number of rows deleted.
    async fn clear_store(&self, store_id: &str) -> FrescoResult<u64>;

    /// Subscribe to mutation notices.
    fn changes(&self) -> broadcast::Receiver<ChangeNotice>;

    /// Short backend name used in logs.
    fn backend_name(&self) -> &'static str;
}
