//! fresco Test Utilities
//!
//! Shared test infrastructure for the fresco workspace:
//! - Fixtures: a small key/value domain and pre-wired stores
//! - Mock fetchers: scripted outcomes and gated (blockable) fetches
//! - Stream helpers with timeouts
//! - Proptest generators for core types
//! - Assertions over emitted resources

pub use fresco_core::{
    ApiError, CachedEntry, DataResource, FreshnessStrategy, KeyedFreshnessStrategy, Outcome,
    RefreshStrategy,
};
pub use fresco_store::{
    CachePersister, Fetcher, InMemoryPersister, KeyedStore, Mediator, StoreConfig,
};

use async_trait::async_trait;
use futures_util::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Upper bound on any single stream collection in tests.
pub const COLLECT_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! A minimal key/value domain for store tests.

    use super::*;

    /// Key of the test domain.
    #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct TestKey {
        pub id: u32,
    }

    /// Value of the test domain.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TestItem {
        pub id: u32,
        pub label: String,
    }

    pub fn test_key(id: u32) -> TestKey {
        TestKey { id }
    }

    pub fn test_item(id: u32) -> TestItem {
        TestItem {
            id,
            label: format!("item-{}", id),
        }
    }

    /// Fresh in-memory persister.
    pub fn memory_persister() -> Arc<InMemoryPersister> {
        Arc::new(InMemoryPersister::new())
    }

    /// A `TestKey -> TestItem` store named `items`.
    pub fn item_store(
        fetcher: Arc<dyn Fetcher<TestKey, TestItem>>,
        mediator: Arc<dyn Mediator<TestKey, TestItem>>,
        persister: Arc<dyn CachePersister>,
        config: StoreConfig,
    ) -> KeyedStore<TestKey, TestItem> {
        KeyedStore::new("items", fetcher, mediator, persister, config)
    }
}

// ============================================================================
// MOCK FETCHERS
// ============================================================================

pub mod mocks {
    //! Fetchers with observable behaviour.

    use super::*;

    /// Returns queued outcomes in order and counts calls.
    ///
    /// Once the script is exhausted every call fails with
    /// [`ApiError::Unknown`].
    #[derive(Debug)]
    pub struct ScriptedFetcher<V> {
        script: Mutex<VecDeque<Outcome<V>>>,
        calls: AtomicUsize,
    }

    impl<V> ScriptedFetcher<V> {
        pub fn new(outcomes: impl IntoIterator<Item = Outcome<V>>) -> Self {
            Self {
                script: Mutex::new(outcomes.into_iter().collect()),
                calls: AtomicUsize::new(0),
            }
        }

        /// Always succeed with `value`, however often called.
        pub fn always(value: V) -> Self
        where
            V: Clone,
        {
            Self::new(std::iter::repeat(Ok(value)).take(1024))
        }

        pub fn push(&self, outcome: Outcome<V>) {
            self.script
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push_back(outcome);
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl<K, V> Fetcher<K, V> for ScriptedFetcher<V>
    where
        K: Send + Sync,
        V: Send,
    {
        async fn fetch(&self, _key: &K) -> Outcome<V> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .script
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .pop_front();
            next.unwrap_or_else(|| Err(ApiError::unknown("script exhausted")))
        }
    }

    struct CancelGuard {
        cancelled: Arc<AtomicUsize>,
        armed: bool,
    }

    impl Drop for CancelGuard {
        fn drop(&mut self) {
            if self.armed {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Blocks every fetch until [`GatedFetcher::release`] is called.
    ///
    /// Records how many fetches started, completed, and were dropped before
    /// completing.
    pub struct GatedFetcher<V> {
        outcome: Outcome<V>,
        gate: watch::Sender<bool>,
        started: watch::Sender<usize>,
        completed: AtomicUsize,
        cancelled: Arc<AtomicUsize>,
    }

    impl<V: Clone> GatedFetcher<V> {
        pub fn new(outcome: Outcome<V>) -> Self {
            let (gate, _) = watch::channel(false);
            let (started, _) = watch::channel(0);
            Self {
                outcome,
                gate,
                started,
                completed: AtomicUsize::new(0),
                cancelled: Arc::new(AtomicUsize::new(0)),
            }
        }

        /// Let every pending and future fetch complete.
        pub fn release(&self) {
            self.gate.send_replace(true);
        }

        /// Wait until at least `n` fetches have started.
        pub async fn wait_started(&self, n: usize) {
            let mut rx = self.started.subscribe();
            tokio::time::timeout(COLLECT_TIMEOUT, rx.wait_for(|count| *count >= n))
                .await
                .expect("timed out waiting for fetch to start")
                .expect("started counter closed");
        }

        pub fn started(&self) -> usize {
            *self.started.borrow()
        }

        pub fn completed(&self) -> usize {
            self.completed.load(Ordering::SeqCst)
        }

        /// Fetches dropped while blocked.
        pub fn cancelled(&self) -> usize {
            self.cancelled.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl<K, V> Fetcher<K, V> for GatedFetcher<V>
    where
        K: Send + Sync,
        V: Clone + Send + Sync,
    {
        async fn fetch(&self, _key: &K) -> Outcome<V> {
            let mut guard = CancelGuard {
                cancelled: Arc::clone(&self.cancelled),
                armed: true,
            };
            self.started.send_modify(|count| *count += 1);

            let mut gate = self.gate.subscribe();
            let opened = gate.wait_for(|open| *open).await.is_ok();

            guard.armed = false;
            self.completed.fetch_add(1, Ordering::SeqCst);
            if opened {
                self.outcome.clone()
            } else {
                Err(ApiError::unknown("gate closed"))
            }
        }
    }
}

// ============================================================================
// STREAM HELPERS
// ============================================================================

/// Collect the first `n` items, failing the test after [`COLLECT_TIMEOUT`].
pub async fn collect_n<S, T>(stream: S, n: usize) -> Vec<T>
where
    S: Stream<Item = T>,
{
    tokio::time::timeout(COLLECT_TIMEOUT, stream.take(n).collect::<Vec<_>>())
        .await
        .expect("timed out collecting stream items")
}

/// Collect a finite stream, failing the test after [`COLLECT_TIMEOUT`].
pub async fn collect_all<S, T>(stream: S) -> Vec<T>
where
    S: Stream<Item = T>,
{
    tokio::time::timeout(COLLECT_TIMEOUT, stream.collect::<Vec<_>>())
        .await
        .expect("timed out waiting for stream to complete")
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for fresco core types.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_api_error() -> impl Strategy<Value = ApiError> {
        prop_oneof![
            "[a-z ]{1,24}".prop_map(|reason| ApiError::network(reason)),
            (100u16..600, "[a-z ]{0,24}").prop_map(|(code, body)| ApiError::http(code, body)),
            "[a-z ]{1,24}".prop_map(|reason| ApiError::unknown(reason)),
        ]
    }

    pub fn arb_data_resource<T, S>(value: S) -> impl Strategy<Value = DataResource<T>>
    where
        T: std::fmt::Debug + Clone + 'static,
        S: Strategy<Value = T> + 'static,
    {
        prop_oneof![
            Just(DataResource::Loading),
            value.prop_map(DataResource::Data),
            arb_api_error().prop_map(DataResource::Error),
        ]
    }

    pub fn arb_refresh_strategy() -> impl Strategy<Value = RefreshStrategy> {
        prop_oneof![
            Just(RefreshStrategy::ForceRefresh),
            Just(RefreshStrategy::RefreshIfStale),
            (0u64..7 * 24 * 3600)
                .prop_map(|secs| RefreshStrategy::RefreshIfOlderThan(Duration::from_secs(secs))),
        ]
    }

    pub fn arb_freshness_strategy() -> impl Strategy<Value = FreshnessStrategy> {
        prop_oneof![
            Just(FreshnessStrategy::Fresh),
            arb_refresh_strategy().prop_map(FreshnessStrategy::Cached),
        ]
    }

    pub fn arb_test_item() -> impl Strategy<Value = fixtures::TestItem> {
        (any::<u32>(), "[a-z0-9-]{0,16}")
            .prop_map(|(id, label)| fixtures::TestItem { id, label })
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over emitted resources.

    use super::*;

    /// Assert `items` is exactly `[Loading, Data(expected)]`.
    #[track_caller]
    pub fn assert_loading_then_data<T>(items: &[DataResource<T>], expected: &T)
    where
        T: std::fmt::Debug + PartialEq,
    {
        match items {
            [DataResource::Loading, DataResource::Data(value)] if value == expected => {}
            other => panic!("Expected [Loading, Data({:?})], got: {:?}", expected, other),
        }
    }

    /// Assert the resource is a network-class error.
    #[track_caller]
    pub fn assert_network_error<T: std::fmt::Debug>(resource: &DataResource<T>) {
        match resource {
            DataResource::Error(ApiError::Network { .. }) => {}
            other => panic!("Expected Network error, got: {:?}", other),
        }
    }

    /// Assert the last emitted item is `Data(expected)`.
    #[track_caller]
    pub fn assert_last_data<T>(items: &[DataResource<T>], expected: &T)
    where
        T: std::fmt::Debug + PartialEq,
    {
        match items.last() {
            Some(DataResource::Data(value)) if value == expected => {}
            other => panic!("Expected last item Data({:?}), got: {:?}", expected, other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
