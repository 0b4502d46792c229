//! Freshness-aware stores.
//!
//! A [`KeyedStore`] owns one logical cache (its `store_id`) inside a shared
//! [`CachePersister`]. Reads are streams of [`DataResource`]: the cached
//! value first (for `Cached` strategies), then `Loading` and the fetch
//! result when the strategy demands a fetch. Concurrent fetches for one key
//! are coalesced into a single task.
//!
//! # Example
//!
//! ```ignore
//! let store = KeyedStore::new(
//!     "balances",
//!     Arc::new(fetcher::keyed_from_fn(|account: String| async move { api.balance(&account).await })),
//!     Arc::new(FreshnessMediator::new(Duration::from_secs(60))),
//!     persister,
//!     StoreConfig::default(),
//! );
//!
//! let mut updates = store.stream(KeyedFreshnessStrategy::cached(
//!     "main".to_string(),
//!     RefreshStrategy::RefreshIfStale,
//! ));
//! while let Some(resource) = updates.next().await { render(resource) }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_stream::stream;
use chrono::Utc;
use futures_util::future::FutureExt;
use futures_util::stream::{BoxStream, StreamExt};
use fresco_core::{
    ApiError, CachedEntry, DataResource, FreshnessStrategy, FrescoResult, KeyedFreshnessStrategy,
    Outcome, StorageError,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use crate::config::StoreConfig;
use crate::fetcher::Fetcher;
use crate::inflight::{InFlightMap, Joined};
use crate::mediator::{needs_fetch, Mediator};
use crate::persist::{CachePersister, ChangeKind, PersistedRow};

// ============================================================================
// KEY / VALUE BOUNDS
// ============================================================================

/// Requirements on a store key. Keys are persisted as their JSON encoding.
pub trait StoreKey: Serialize + Clone + Send + Sync + 'static {}

impl<T> StoreKey for T where T: Serialize + Clone + Send + Sync + 'static {}

/// Requirements on a stored value. Values are persisted as JSON.
pub trait StoreValue: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static {}

impl<T> StoreValue for T where
    T: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static
{
}

// ============================================================================
// STATISTICS
// ============================================================================

/// Snapshot of a store's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Stream reads that found a cached entry.
    pub hits: u64,
    /// Stream reads that found nothing (or an unreadable row).
    pub misses: u64,
    /// Fetch tasks started.
    pub fetches_started: u64,
    /// Stream reads that joined an already running fetch.
    pub fetches_coalesced: u64,
    /// Fetch tasks that resolved to an error.
    pub fetch_failures: u64,
}

impl StoreStats {
    /// Fraction of reads served with a cached entry (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches_started: AtomicU64,
    fetches_coalesced: AtomicU64,
    fetch_failures: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StoreStats {
        StoreStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fetches_started: self.fetches_started.load(Ordering::Relaxed),
            fetches_coalesced: self.fetches_coalesced.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// KEYED STORE
// ============================================================================

struct StoreInner<K, V> {
    store_id: String,
    fetcher: Arc<dyn Fetcher<K, V>>,
    mediator: Arc<dyn Mediator<K, V>>,
    persister: Arc<dyn CachePersister>,
    config: StoreConfig,
    inflight: InFlightMap<V>,
    stats: StatsCounters,
}

/// A cache of `V` values addressed by `K`.
///
/// Cloning is cheap and clones share the cache, the in-flight map and the
/// statistics.
pub struct KeyedStore<K, V> {
    inner: Arc<StoreInner<K, V>>,
}

impl<K, V> Clone for KeyedStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> std::fmt::Debug for KeyedStore<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedStore")
            .field("store_id", &self.inner.store_id)
            .field("backend", &self.inner.persister.backend_name())
            .field("config", &self.inner.config)
            .finish()
    }
}

fn encode_key<K: Serialize>(key: &K) -> FrescoResult<String> {
    Ok(serde_json::to_string(key).map_err(StorageError::serialization)?)
}

impl<K, V> KeyedStore<K, V>
where
    K: StoreKey,
    V: StoreValue,
{
    /// Create a store.
    ///
    /// `store_id` namespaces this store's rows inside `persister`; stores
    /// sharing a persister must use distinct identifiers.
    pub fn new(
        store_id: impl Into<String>,
        fetcher: Arc<dyn Fetcher<K, V>>,
        mediator: Arc<dyn Mediator<K, V>>,
        persister: Arc<dyn CachePersister>,
        config: StoreConfig,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                store_id: store_id.into(),
                fetcher,
                mediator,
                persister,
                config,
                inflight: InFlightMap::new(),
                stats: StatsCounters::default(),
            }),
        }
    }

    pub fn store_id(&self) -> &str {
        &self.inner.store_id
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Observe the value for a key under a freshness strategy.
    ///
    /// Without live updates the stream completes after the fetch result (or
    /// after the cached value when no fetch is needed). Dropping the stream
    /// detaches it from any in-flight fetch.
    pub fn stream(&self, request: KeyedFreshnessStrategy<K>) -> BoxStream<'static, DataResource<V>> {
        let inner = Arc::clone(&self.inner);
        let KeyedFreshnessStrategy { key, strategy } = request;

        let resources = stream! {
            let row_key = match encode_key(&key) {
                Ok(row_key) => row_key,
                Err(e) => {
                    yield DataResource::Error(ApiError::unknown(format!("unencodable key: {}", e)));
                    return;
                }
            };

            // Subscribe before the initial read so no write is missed.
            let mut changes = inner.config.live_updates.then(|| inner.persister.changes());

            let cached = inner.load_entry(&key, &row_key).await;
            if cached.is_some() {
                StatsCounters::bump(&inner.stats.hits);
            } else {
                StatsCounters::bump(&inner.stats.misses);
            }

            let mut last: Option<DataResource<V>> = None;

            if let (FreshnessStrategy::Cached(_), Some(entry)) = (strategy, cached.as_ref()) {
                let item = DataResource::Data(entry.value.clone());
                last = Some(item.clone());
                yield item;
            }

            if needs_fetch(strategy, cached.as_ref(), &*inner.mediator, Utc::now()) {
                tracing::debug!(
                    store_id = %inner.store_id,
                    key = %row_key,
                    strategy = ?strategy,
                    "Fetch required"
                );
                yield DataResource::Loading;
                let item = DataResource::from(StoreInner::fetch(&inner, &key, &row_key).await);
                last = Some(item.clone());
                yield item;
            }

            if let Some(changes) = changes.as_mut() {
                loop {
                    match changes.recv().await {
                        Ok(notice) => {
                            if notice.kind != ChangeKind::Written
                                || !notice.concerns(&inner.store_id, &row_key)
                            {
                                continue;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(
                                store_id = %inner.store_id,
                                key = %row_key,
                                skipped,
                                "Change subscriber lagged, re-reading row"
                            );
                        }
                        Err(RecvError::Closed) => break,
                    }

                    if let Some(entry) = inner.load_entry(&key, &row_key).await {
                        let item = DataResource::Data(entry.value);
                        if last.as_ref() != Some(&item) {
                            last = Some(item.clone());
                            yield item;
                        }
                    }
                }
            }
        };
        resources.boxed()
    }

    /// Current cached entry for a key, without fetching.
    pub async fn cached(&self, key: &K) -> FrescoResult<Option<CachedEntry<K, V>>> {
        let row_key = encode_key(key)?;
        self.inner.read_entry(key, &row_key).await
    }

    /// Flag the row for `key` stale. The next `RefreshIfStale` or
    /// `RefreshIfOlderThan` read refetches. Nothing is emitted.
    ///
    /// Returns false when nothing was cached for the key.
    pub async fn invalidate(&self, key: &K) -> FrescoResult<bool> {
        let row_key = encode_key(key)?;
        let found = self
            .inner
            .persister
            .mark_stale(&self.inner.store_id, &row_key)
            .await?;
        tracing::debug!(store_id = %self.inner.store_id, key = %row_key, found, "Invalidated");
        Ok(found)
    }

    /// Flag every row of this store stale.
    pub async fn invalidate_all(&self) -> FrescoResult<u64> {
        let count = self
            .inner
            .persister
            .mark_store_stale(&self.inner.store_id)
            .await?;
        tracing::debug!(store_id = %self.inner.store_id, count, "Invalidated store");
        Ok(count)
    }

    /// Forget the cache line for `key`.
    pub async fn clear(&self, key: &K) -> FrescoResult<bool> {
        let row_key = encode_key(key)?;
        self.inner
            .persister
            .remove(&self.inner.store_id, &row_key)
            .await
    }

    /// Forget every cache line of this store.
    pub async fn clear_all(&self) -> FrescoResult<u64> {
        let count = self.inner.persister.clear_store(&self.inner.store_id).await?;
        tracing::debug!(store_id = %self.inner.store_id, count, "Cleared store");
        Ok(count)
    }

    pub fn stats(&self) -> StoreStats {
        self.inner.stats.snapshot()
    }

    /// Keys with a fetch currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.inflight.len()
    }
}

impl<K, V> StoreInner<K, V>
where
    K: StoreKey,
    V: StoreValue,
{
    async fn read_entry(&self, key: &K, row_key: &str) -> FrescoResult<Option<CachedEntry<K, V>>> {
        let Some(row) = self.persister.read(&self.store_id, row_key).await? else {
            return Ok(None);
        };
        let value: V = serde_json::from_str(&row.payload).map_err(StorageError::deserialization)?;
        Ok(Some(CachedEntry {
            key: key.clone(),
            value,
            last_fetched_at: row.fetched_at(),
            stale: row.stale,
        }))
    }

    /// Read for a stream. Failures degrade to a miss.
    async fn load_entry(&self, key: &K, row_key: &str) -> Option<CachedEntry<K, V>> {
        match self.read_entry(key, row_key).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(
                    store_id = %self.store_id,
                    key = %row_key,
                    error = %e,
                    "Cache read failed, treating as miss"
                );
                None
            }
        }
    }

    /// Join or start the fetch for `row_key` and await its outcome.
    async fn fetch(this: &Arc<Self>, key: &K, row_key: &str) -> Outcome<V> {
        let Joined {
            task,
            ticket,
            coalesced,
        } = this.inflight.join_or_start(row_key, || {
            let inner = Arc::clone(this);
            let key = key.clone();
            let row_key = row_key.to_string();
            async move { inner.fetch_and_persist(key, row_key).await }.boxed()
        });

        if coalesced {
            StatsCounters::bump(&this.stats.fetches_coalesced);
        } else {
            StatsCounters::bump(&this.stats.fetches_started);
        }
        tracing::debug!(
            store_id = %this.store_id,
            key = %row_key,
            coalesced,
            "Awaiting fetch"
        );

        let outcome = task.await;
        drop(ticket);
        outcome
    }

    /// Body of a fetch task. The write happens inside the task, so a
    /// cancelled fetch never persists.
    async fn fetch_and_persist(&self, key: K, row_key: String) -> Outcome<V> {
        let outcome = self.fetcher.fetch(&key).await;
        match &outcome {
            Ok(value) => {
                if let Err(e) = self.persist(&row_key, value).await {
                    tracing::warn!(
                        store_id = %self.store_id,
                        key = %row_key,
                        error = %e,
                        "Failed to persist fetched value"
                    );
                }
            }
            Err(e) => {
                StatsCounters::bump(&self.stats.fetch_failures);
                tracing::debug!(
                    store_id = %self.store_id,
                    key = %row_key,
                    error = %e,
                    "Fetch failed"
                );
            }
        }
        outcome
    }

    async fn persist(&self, row_key: &str, value: &V) -> FrescoResult<()> {
        let payload = serde_json::to_string(value).map_err(StorageError::serialization)?;
        self.persister
            .write(PersistedRow::new(
                self.store_id.as_str(),
                row_key,
                payload,
                Utc::now(),
            ))
            .await
    }
}

// ============================================================================
// UNKEYED STORE
// ============================================================================

/// A store holding a single value.
pub struct Store<V> {
    keyed: KeyedStore<(), V>,
}

impl<V> Clone for Store<V> {
    fn clone(&self) -> Self {
        Self {
            keyed: self.keyed.clone(),
        }
    }
}

impl<V> std::fmt::Debug for Store<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("store_id", &self.keyed.inner.store_id)
            .finish_non_exhaustive()
    }
}

impl<V: StoreValue> Store<V> {
    pub fn new(
        store_id: impl Into<String>,
        fetcher: Arc<dyn Fetcher<(), V>>,
        mediator: Arc<dyn Mediator<(), V>>,
        persister: Arc<dyn CachePersister>,
        config: StoreConfig,
    ) -> Self {
        Self {
            keyed: KeyedStore::new(store_id, fetcher, mediator, persister, config),
        }
    }

    pub fn store_id(&self) -> &str {
        self.keyed.store_id()
    }

    /// See [`KeyedStore::stream`].
    pub fn stream(&self, strategy: FreshnessStrategy) -> BoxStream<'static, DataResource<V>> {
        self.keyed.stream(strategy.with_key(()))
    }

    pub async fn cached(&self) -> FrescoResult<Option<CachedEntry<(), V>>> {
        self.keyed.cached(&()).await
    }

    pub async fn invalidate(&self) -> FrescoResult<bool> {
        self.keyed.invalidate(&()).await
    }

    pub async fn clear(&self) -> FrescoResult<bool> {
        self.keyed.clear(&()).await
    }

    pub fn stats(&self) -> StoreStats {
        self.keyed.stats()
    }

    /// The underlying single-key store.
    pub fn as_keyed(&self) -> &KeyedStore<(), V> {
        &self.keyed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher;
    use crate::mediator::{AlwaysFetchMediator, IsCachedMediator};
    use crate::persist::InMemoryPersister;
    use fresco_core::{FrescoError, RefreshStrategy};

    fn counting_store(
        persister: Arc<InMemoryPersister>,
    ) -> (KeyedStore<u32, String>, Arc<AtomicU64>) {
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let store = KeyedStore::new(
            "names",
            Arc::new(fetcher::keyed_from_fn(move |id: u32| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ApiError>(format!("name-{}", id))
                }
            })),
            Arc::new(IsCachedMediator),
            persister,
            StoreConfig::default(),
        );
        (store, calls)
    }

    #[test]
    fn test_encode_key_is_json() {
        assert_eq!(encode_key(&42u32).unwrap(), "42");
        assert_eq!(encode_key(&"a").unwrap(), "\"a\"");
        assert_eq!(encode_key(&()).unwrap(), "null");
    }

    #[test]
    fn test_unencodable_key_is_a_serialization_error() {
        let key: std::collections::BTreeMap<(u32, u32), u32> = [((1, 2), 3)].into_iter().collect();
        let err = encode_key(&key).unwrap_err();
        assert!(matches!(
            err,
            FrescoError::Storage(StorageError::Serialization { .. })
        ));
    }

    #[test]
    fn test_hit_rate() {
        let stats = StoreStats {
            hits: 3,
            misses: 1,
            ..StoreStats::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(StoreStats::default().hit_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_fetch_persists_json_payload() {
        let persister = Arc::new(InMemoryPersister::new());
        let (store, calls) = counting_store(persister.clone());

        let items: Vec<_> = store
            .stream(KeyedFreshnessStrategy::fresh(7))
            .collect()
            .await;

        assert_eq!(
            items,
            vec![DataResource::Loading, DataResource::Data("name-7".to_string())]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let row = persister.read("names", "7").await.unwrap().unwrap();
        assert_eq!(row.payload, "\"name-7\"");
    }

    #[tokio::test]
    async fn test_cached_hit_without_fetch() {
        let persister = Arc::new(InMemoryPersister::new());
        let (store, calls) = counting_store(persister);

        let _: Vec<_> = store.stream(KeyedFreshnessStrategy::fresh(1)).collect().await;
        let items: Vec<_> = store
            .stream(KeyedFreshnessStrategy::cached(1, RefreshStrategy::RefreshIfStale))
            .collect()
            .await;

        assert_eq!(items, vec![DataResource::Data("name-1".to_string())]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.fetches_started, 1);
    }

    #[tokio::test]
    async fn test_undecodable_row_is_a_miss() {
        let persister = Arc::new(InMemoryPersister::new());
        persister
            .write(PersistedRow::new("names", "3", "not json", Utc::now()))
            .await
            .unwrap();
        let (store, calls) = counting_store(persister);

        assert!(matches!(
            store.cached(&3).await,
            Err(FrescoError::Storage(StorageError::Deserialization { .. }))
        ));

        let items: Vec<_> = store
            .stream(KeyedFreshnessStrategy::cached(3, RefreshStrategy::RefreshIfStale))
            .collect()
            .await;
        assert_eq!(
            items,
            vec![DataResource::Loading, DataResource::Data("name-3".to_string())]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_unkeyed_store_uses_null_key() {
        let persister = Arc::new(InMemoryPersister::new());
        let store: Store<u64> = Store::new(
            "settings",
            Arc::new(fetcher::from_fn(|| async { Ok::<_, ApiError>(5u64) })),
            Arc::new(AlwaysFetchMediator),
            persister.clone(),
            StoreConfig::default(),
        );

        let items: Vec<_> = store.stream(FreshnessStrategy::Fresh).collect().await;
        assert_eq!(items.last(), Some(&DataResource::Data(5)));
        assert!(persister.read("settings", "null").await.unwrap().is_some());
        assert_eq!(store.cached().await.unwrap().map(|e| e.value), Some(5));
    }

    #[tokio::test]
    async fn test_clear_forgets_entry() {
        let persister = Arc::new(InMemoryPersister::new());
        let (store, _calls) = counting_store(persister);

        let _: Vec<_> = store.stream(KeyedFreshnessStrategy::fresh(1)).collect().await;
        assert!(store.clear(&1).await.unwrap());
        assert!(store.cached(&1).await.unwrap().is_none());
        assert!(!store.clear(&1).await.unwrap());
    }
}
