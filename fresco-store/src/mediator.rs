//! Refresh policy for `Cached(RefreshIfStale)` reads.
//!
//! A store consults its [`Mediator`] only when the caller left the refresh
//! decision to the store. Other strategies decide on their own; see
//! [`needs_fetch`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use fresco_core::{CachedEntry, FreshnessStrategy, RefreshStrategy};

/// Decides whether a cached entry must be refetched.
///
/// Implementations must be pure with respect to the entry: same entry and
/// same clock, same answer.
pub trait Mediator<K, V>: Send + Sync {
    fn should_fetch(&self, cached: Option<&CachedEntry<K, V>>) -> bool;
}

/// Refetch on every read.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysFetchMediator;

impl<K, V> Mediator<K, V> for AlwaysFetchMediator {
    fn should_fetch(&self, _cached: Option<&CachedEntry<K, V>>) -> bool {
        true
    }
}

/// Refetch when the entry is missing, stale, or at least `max_age` old.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessMediator {
    max_age: Duration,
}

impl FreshnessMediator {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Decision against an explicit clock.
    pub fn should_fetch_at<K, V>(&self, cached: Option<&CachedEntry<K, V>>, now: DateTime<Utc>) -> bool {
        match cached {
            None => true,
            Some(entry) => entry.is_stale() || entry.is_older_than_at(self.max_age, now),
        }
    }
}

impl<K, V> Mediator<K, V> for FreshnessMediator {
    fn should_fetch(&self, cached: Option<&CachedEntry<K, V>>) -> bool {
        self.should_fetch_at(cached, Utc::now())
    }
}

/// Fetch only when nothing is cached yet.
///
/// Pair with invalidation: a stale entry is refetched regardless, so this
/// mediator refreshes exactly when something has been flushed.
#[derive(Debug, Clone, Copy, Default)]
pub struct IsCachedMediator;

impl<K, V> Mediator<K, V> for IsCachedMediator {
    fn should_fetch(&self, cached: Option<&CachedEntry<K, V>>) -> bool {
        cached.is_none()
    }
}

/// Whether a read under `strategy` must fetch, given the current entry.
///
/// - `Fresh` and `Cached(ForceRefresh)` always fetch.
/// - `Cached(RefreshIfStale)` fetches for a stale entry, else asks `mediator`.
/// - `Cached(RefreshIfOlderThan(d))` fetches for a missing or stale entry,
///   or one at least `d` old at `now`.
pub fn needs_fetch<K, V>(
    strategy: FreshnessStrategy,
    cached: Option<&CachedEntry<K, V>>,
    mediator: &dyn Mediator<K, V>,
    now: DateTime<Utc>,
) -> bool {
    match strategy {
        FreshnessStrategy::Fresh => true,
        FreshnessStrategy::Cached(RefreshStrategy::ForceRefresh) => true,
        FreshnessStrategy::Cached(RefreshStrategy::RefreshIfStale) => {
            cached.is_some_and(CachedEntry::is_stale) || mediator.should_fetch(cached)
        }
        FreshnessStrategy::Cached(RefreshStrategy::RefreshIfOlderThan(max_age)) => match cached {
            None => true,
            Some(entry) => entry.is_stale() || entry.is_older_than_at(max_age, now),
        },
    }
}
