//! The persisted cache line of a store.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Last successfully fetched value for one key of one store.
///
/// `stale` is set by invalidation. A stale entry is still served as the
/// leading cached value but always fails freshness checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry<K, V> {
    pub key: K,
    pub value: V,
    pub last_fetched_at: DateTime<Utc>,
    pub stale: bool,
}

impl<K, V> CachedEntry<K, V> {
    /// A freshly fetched, non-stale entry.
    pub fn new(key: K, value: V, last_fetched_at: DateTime<Utc>) -> Self {
        Self {
            key,
            value,
            last_fetched_at,
            stale: false,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Age of the entry relative to `now`. Clock skew clamps to zero.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.last_fetched_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn age(&self) -> Duration {
        self.age_at(Utc::now())
    }

    /// True when the entry is at least `max_age` old at `now`.
    pub fn is_older_than_at(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        self.age_at(now) >= max_age
    }

    pub fn is_older_than(&self, max_age: Duration) -> bool {
        self.is_older_than_at(max_age, Utc::now())
    }

    pub fn last_fetched_at_millis(&self) -> i64 {
        self.last_fetched_at.timestamp_millis()
    }

    /// Map the value, keeping key and freshness metadata.
    pub fn map<U, F>(self, f: F) -> CachedEntry<K, U>
    where
        F: FnOnce(V) -> U,
    {
        CachedEntry {
            key: self.key,
            value: f(self.value),
            last_fetched_at: self.last_fetched_at,
            stale: self.stale,
        }
    }
}
