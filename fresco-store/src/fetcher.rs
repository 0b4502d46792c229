//! Remote data sources.
//!
//! A [`Fetcher`] performs exactly one attempt per call. It never retries,
//! caches, or rate-limits, and it reports failure as an
//! [`ApiError`](fresco_core::ApiError) value rather than panicking.

use std::future::Future;

use async_trait::async_trait;
use futures_util::stream::{Stream, StreamExt};
use fresco_core::{ApiError, Outcome};

/// One-shot source of `V` for a key `K`.
#[async_trait]
pub trait Fetcher<K, V>: Send + Sync {
    async fn fetch(&self, key: &K) -> Outcome<V>;
}

/// Fetcher over a zero-argument async closure. See [`from_fn`].
pub struct FnFetcher<F> {
    f: F,
}

#[async_trait]
impl<V, F, Fut> Fetcher<(), V> for FnFetcher<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Outcome<V>> + Send,
    V: Send,
{
    async fn fetch(&self, _key: &()) -> Outcome<V> {
        (self.f)().await
    }
}

/// Fetcher over a keyed async closure. See [`keyed_from_fn`].
pub struct KeyedFnFetcher<F> {
    f: F,
}

#[async_trait]
impl<K, V, F, Fut> Fetcher<K, V> for KeyedFnFetcher<F>
where
    K: Clone + Send + Sync,
    F: Fn(K) -> Fut + Send + Sync,
    Fut: Future<Output = Outcome<V>> + Send,
    V: Send,
{
    async fn fetch(&self, key: &K) -> Outcome<V> {
        (self.f)(key.clone()).await
    }
}

/// Fetcher over a stream-producing closure. See [`from_stream`].
pub struct StreamFetcher<F> {
    f: F,
}

#[async_trait]
impl<K, V, F, S> Fetcher<K, V> for StreamFetcher<F>
where
    K: Clone + Send + Sync,
    F: Fn(K) -> S + Send + Sync,
    S: Stream<Item = Outcome<V>> + Send,
    V: Send,
{
    async fn fetch(&self, key: &K) -> Outcome<V> {
        let stream = (self.f)(key.clone());
        let mut stream = std::pin::pin!(stream);
        match stream.next().await {
            Some(outcome) => outcome,
            None => Err(ApiError::unknown("fetch stream completed without a value")),
        }
    }
}

/// Fetcher for a singleton store.
///
/// ```ignore
/// let fetcher = fresco_store::fetcher::from_fn(|| async { client.get_json("/settings").await });
/// ```
pub fn from_fn<F>(f: F) -> FnFetcher<F> {
    FnFetcher { f }
}

/// Fetcher for a keyed store. The closure receives an owned clone of the key.
pub fn keyed_from_fn<F>(f: F) -> KeyedFnFetcher<F> {
    KeyedFnFetcher { f }
}

/// Normalize an already-streaming source into a fetcher.
///
/// The first item of the stream is the fetch result; the rest is ignored.
/// An empty stream is reported as [`ApiError::Unknown`].
pub fn from_stream<F>(f: F) -> StreamFetcher<F> {
    StreamFetcher { f }
}
