//! Flushing stores after mutations.
//!
//! Repositories that change server state (a transfer, a settings update)
//! mark the affected stores stale so the next read refetches. Flushing never
//! emits on open streams.

use std::sync::Arc;

use async_trait::async_trait;
use fresco_core::FrescoResult;

use crate::store::{KeyedStore, Store, StoreKey, StoreValue};

/// A data source that can be flushed as a whole.
#[async_trait]
pub trait FlushableDataSource: Send + Sync {
    /// Mark every cached value stale.
    async fn invalidate(&self) -> FrescoResult<()>;
}

/// A keyed data source that can be flushed per key.
#[async_trait]
pub trait KeyedFlushableDataSource<K>: Send + Sync {
    /// Mark the cached value for one key stale.
    async fn invalidate_key(&self, key: &K) -> FrescoResult<()>;
}

#[async_trait]
impl<K, V> FlushableDataSource for KeyedStore<K, V>
where
    K: StoreKey,
    V: StoreValue,
{
    async fn invalidate(&self) -> FrescoResult<()> {
        self.invalidate_all().await.map(|_| ())
    }
}

#[async_trait]
impl<K, V> KeyedFlushableDataSource<K> for KeyedStore<K, V>
where
    K: StoreKey,
    V: StoreValue,
{
    async fn invalidate_key(&self, key: &K) -> FrescoResult<()> {
        KeyedStore::invalidate(self, key).await.map(|_| ())
    }
}

#[async_trait]
impl<V: StoreValue> FlushableDataSource for Store<V> {
    async fn invalidate(&self) -> FrescoResult<()> {
        Store::invalidate(self).await.map(|_| ())
    }
}

/// Result of [`flush_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub flushed: usize,
    pub failed: usize,
}

impl FlushReport {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Invalidate every source. Failures are logged and counted; the remaining
/// sources are still flushed.
pub async fn flush_all(sources: &[Arc<dyn FlushableDataSource>]) -> FlushReport {
    let mut report = FlushReport::default();
    for (index, source) in sources.iter().enumerate() {
        match source.invalidate().await {
            Ok(()) => report.flushed += 1,
            Err(e) => {
                report.failed += 1;
                tracing::warn!(source = index, error = %e, "Failed to flush data source");
            }
        }
    }
    tracing::debug!(
        flushed = report.flushed,
        failed = report.failed,
        "Flushed data sources"
    );
    report
}
