//! Freshness contracts for store reads.
//!
//! Callers state their staleness tolerance on every read. A strategy is
//! built per call and never persisted.

use std::time::Duration;

/// How a `Cached` read decides whether to refetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefreshStrategy {
    /// Serve the cached value, then refetch unconditionally.
    ForceRefresh,

    /// Serve the cached value and let the store's mediator decide.
    RefreshIfStale,

    /// Serve the cached value and refetch when it is at least this old.
    RefreshIfOlderThan(Duration),
}

impl RefreshStrategy {
    /// Convenience for `RefreshIfOlderThan` expressed in minutes.
    ///
    /// Saturates at `u64::MAX` seconds.
    pub fn older_than_minutes(minutes: u64) -> Self {
        Self::RefreshIfOlderThan(Duration::from_secs(minutes.saturating_mul(60)))
    }
}

/// Staleness tolerance for a single read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FreshnessStrategy {
    /// Always fetch; never lead with the cached value.
    Fresh,

    /// Lead with the cached value (if any), refetching per the refresh strategy.
    Cached(RefreshStrategy),
}

impl Default for FreshnessStrategy {
    fn default() -> Self {
        Self::Cached(RefreshStrategy::RefreshIfStale)
    }
}

impl FreshnessStrategy {
    pub fn fresh() -> Self {
        Self::Fresh
    }

    pub fn cached(refresh: RefreshStrategy) -> Self {
        Self::Cached(refresh)
    }

    /// Returns true for `Cached(..)` strategies.
    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached(_))
    }

    /// Returns true for `Fresh`.
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh)
    }

    /// Scope this strategy to one key of a keyed store.
    pub fn with_key<K>(self, key: K) -> KeyedFreshnessStrategy<K> {
        KeyedFreshnessStrategy {
            key,
            strategy: self,
        }
    }
}

/// A freshness strategy scoped to one cache line of a keyed store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyedFreshnessStrategy<K> {
    pub key: K,
    pub strategy: FreshnessStrategy,
}

impl<K> KeyedFreshnessStrategy<K> {
    pub fn fresh(key: K) -> Self {
        FreshnessStrategy::Fresh.with_key(key)
    }

    pub fn cached(key: K, refresh: RefreshStrategy) -> Self {
        FreshnessStrategy::Cached(refresh).with_key(key)
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn strategy(&self) -> FreshnessStrategy {
        self.strategy
    }
}
