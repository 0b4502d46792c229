//! Per-key fetch coalescing.
//!
//! At most one fetch task per row key is in flight. Later callers join the
//! running task and observe the same terminal outcome. The task is a
//! [`Shared`] future awaited outside the map lock; the lock only guards map
//! mutation.
//!
//! Every joiner holds a [`FetchTicket`]. Dropping the last ticket of a task
//! removes its map entry and, once joiners have dropped their handles, drops
//! the task itself, cancelling the fetch at its next suspension point.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use fresco_core::Outcome;

/// Shared handle to a running fetch.
pub(crate) type SharedFetch<V> = Shared<BoxFuture<'static, Outcome<V>>>;

struct InFlight<V> {
    id: u64,
    task: SharedFetch<V>,
    subscribers: usize,
}

struct MapState<V> {
    next_id: u64,
    entries: HashMap<String, InFlight<V>>,
}

type SharedState<V> = Arc<Mutex<MapState<V>>>;

fn lock<V>(state: &Mutex<MapState<V>>) -> MutexGuard<'_, MapState<V>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Map from row key to the fetch currently running for it.
pub(crate) struct InFlightMap<V> {
    state: SharedState<V>,
}

/// A joiner's handle on an in-flight fetch.
pub(crate) struct Joined<V> {
    pub task: SharedFetch<V>,
    pub ticket: FetchTicket<V>,
    /// True when an existing task was joined rather than started.
    pub coalesced: bool,
}

impl<V> InFlightMap<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MapState {
                next_id: 0,
                entries: HashMap::new(),
            })),
        }
    }

    /// Join the fetch running for `key`, or start one with `start`.
    ///
    /// `start` is called under the map lock and must only build the future.
    pub fn join_or_start<F>(&self, key: &str, start: F) -> Joined<V>
    where
        F: FnOnce() -> BoxFuture<'static, Outcome<V>>,
    {
        let mut state = lock(&self.state);

        if let Some(entry) = state.entries.get_mut(key) {
            entry.subscribers += 1;
            return Joined {
                task: entry.task.clone(),
                ticket: FetchTicket::new(&self.state, key, entry.id),
                coalesced: true,
            };
        }

        let id = state.next_id;
        state.next_id = state.next_id.wrapping_add(1);

        let fetch = start();
        let weak = Arc::downgrade(&self.state);
        let owned_key = key.to_string();
        let task = async move {
            let outcome = fetch.await;
            if let Some(state) = weak.upgrade() {
                remove_if_current(&state, &owned_key, id);
            }
            outcome
        }
        .boxed()
        .shared();

        state.entries.insert(
            key.to_string(),
            InFlight {
                id,
                task: task.clone(),
                subscribers: 1,
            },
        );

        Joined {
            task,
            ticket: FetchTicket::new(&self.state, key, id),
            coalesced: false,
        }
    }

    /// Number of keys with a fetch in flight.
    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    /// Current joiner count for `key`, if a fetch is in flight.
    #[cfg(test)]
    pub fn subscribers(&self, key: &str) -> Option<usize> {
        lock(&self.state).entries.get(key).map(|e| e.subscribers)
    }
}

fn remove_if_current<V>(state: &Mutex<MapState<V>>, key: &str, id: u64) {
    // Drop the removed entry after releasing the lock.
    let removed = {
        let mut guard = lock(state);
        match guard.entries.get(key) {
            Some(entry) if entry.id == id => guard.entries.remove(key),
            _ => None,
        }
    };
    drop(removed);
}

/// Subscription to one in-flight fetch. Detaches on drop.
pub(crate) struct FetchTicket<V> {
    state: Weak<Mutex<MapState<V>>>,
    key: String,
    id: u64,
}

impl<V> FetchTicket<V> {
    fn new(state: &SharedState<V>, key: &str, id: u64) -> Self {
        Self {
            state: Arc::downgrade(state),
            key: key.to_string(),
            id,
        }
    }
}

impl<V> Drop for FetchTicket<V> {
    fn drop(&mut self) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let removed = {
            let mut guard = lock(&state);
            match guard.entries.get_mut(&self.key) {
                Some(entry) if entry.id == self.id => {
                    entry.subscribers = entry.subscribers.saturating_sub(1);
                    if entry.subscribers == 0 {
                        guard.entries.remove(&self.key)
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };
        drop(removed);
    }
}
