//! Change feed published by persisters.
//!
//! Every successful mutation of a persisted row produces a [`ChangeNotice`].
//! Stores with live updates enabled subscribe before their initial read and
//! re-read the row whenever a matching `Written` notice arrives. Delivery is
//! at-least-once per subscriber; a lagging subscriber re-reads instead of
//! replaying.

use tokio::sync::broadcast;

/// Kind of mutation applied to a persisted row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// A new value was written for the row.
    Written,
    /// The row was flagged stale by invalidation.
    MarkedStale,
    /// The row was deleted.
    Removed,
}

/// One mutation of one persisted row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotice {
    pub store_id: String,
    pub key: String,
    pub kind: ChangeKind,
}

impl ChangeNotice {
    pub fn new(store_id: impl Into<String>, key: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            store_id: store_id.into(),
            key: key.into(),
            kind,
        }
    }

    /// True when this notice concerns `(store_id, key)`.
    pub fn concerns(&self, store_id: &str, key: &str) -> bool {
        self.store_id == store_id && self.key == key
    }
}

/// Broadcast fan-out of [`ChangeNotice`]s.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<ChangeNotice>,
}

impl ChangeFeed {
    /// Default per-subscriber buffer.
    pub const DEFAULT_CAPACITY: usize = 256;

    /// Create a feed buffering up to `capacity` notices per subscriber.
    ///
    /// A zero capacity is raised to one; tokio's broadcast channel rejects 0.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a notice. Having no subscribers is not an error.
    pub fn publish(&self, notice: ChangeNotice) {
        let _ = self.sender.send(notice);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotice> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
