//! fresco Store - Freshness-Aware Keyed Stores
//!
//! Stores observe remote data as streams of
//! [`DataResource`](fresco_core::DataResource). Callers state their staleness
//! tolerance on every read; the store serves the cached value, decides
//! whether to refetch, coalesces concurrent fetches for the same key, and
//! persists successful results through a pluggable [`CachePersister`].
//!
//! The unit of caching is one `(store_id, key)` row. Rows survive restarts
//! with the SQLite and LMDB backends.

pub mod config;
pub mod fetcher;
pub mod flush;
mod inflight;
pub mod mediator;
pub mod persist;
pub mod store;
pub mod telemetry;

pub use config::{FrescoConfig, PersistenceConfig, StoreConfig};
pub use fetcher::Fetcher;
pub use flush::{flush_all, FlushReport, FlushableDataSource, KeyedFlushableDataSource};
pub use mediator::{needs_fetch, AlwaysFetchMediator, FreshnessMediator, IsCachedMediator, Mediator};
pub use persist::{
    CachePersister, ChangeFeed, ChangeKind, ChangeNotice, InMemoryPersister, LmdbCacheError,
    LmdbPersister, PersistedRow, RowKey, SqliteCacheError, SqlitePersister,
};
pub use store::{KeyedStore, Store, StoreKey, StoreStats, StoreValue};
pub use telemetry::{init_tracing, TelemetryConfig};
