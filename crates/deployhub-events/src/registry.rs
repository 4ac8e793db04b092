//! Subscriber registry.
//!
//! The registry is the authoritative set of subscribers that can currently
//! accept events. `register`, `unregister` and `snapshot` share a single
//! critical section; `snapshot` copies the handles out so a broadcast round
//! never iterates the live map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use deployhub_core::{Event, Gauge};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::SendTimeoutError};

use crate::error::DeliveryError;

/// Unique subscriber identifier.
pub type SubscriberId = u64;

/// Write side of a subscriber, as seen by the broadcaster.
///
/// The connection owns the matching receiver. When the registry drops its
/// handle (and no broadcast round still holds a copy) the receiver reports
/// closed, which is how an evicted connection learns it must shut down.
#[derive(Debug, Clone)]
pub struct SubscriberHandle {
    id: SubscriberId,
    outbox: mpsc::Sender<Event>,
}

impl SubscriberHandle {
    /// Create a handle writing into `outbox`.
    pub fn new(id: SubscriberId, outbox: mpsc::Sender<Event>) -> Self {
        Self { id, outbox }
    }

    /// Subscriber ID.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Whether the connection side has gone away.
    pub fn is_closed(&self) -> bool {
        self.outbox.is_closed()
    }

    /// Queue an event for this subscriber, waiting at most `timeout` for
    /// room in its buffer.
    pub async fn deliver(&self, event: Event, timeout: Duration) -> Result<(), DeliveryError> {
        self.outbox
            .send_timeout(event, timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => DeliveryError::TimedOut(timeout),
                SendTimeoutError::Closed(_) => DeliveryError::Closed,
            })
    }
}

/// Set of live subscribers.
#[derive(Debug, Default)]
pub struct Registry {
    subscribers: Mutex<HashMap<SubscriberId, SubscriberHandle>>,
    next_id: AtomicU64,
    gauge: Option<Gauge>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry that reports its size to `gauge`.
    pub fn with_gauge(gauge: Gauge) -> Self {
        Self {
            gauge: Some(gauge),
            ..Self::default()
        }
    }

    /// Allocate a fresh subscriber ID.
    pub fn next_id(&self) -> SubscriberId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Add a subscriber. Registering an ID that is already present keeps the
    /// existing handle and returns `false`.
    pub fn register(&self, handle: SubscriberHandle) -> bool {
        let mut subscribers = self.subscribers.lock();
        if subscribers.contains_key(&handle.id) {
            return false;
        }
        let id = handle.id;
        subscribers.insert(id, handle);
        self.report(subscribers.len());
        tracing::debug!(subscriber = id, total = subscribers.len(), "subscriber registered");
        true
    }

    /// Remove a subscriber. Removing an absent ID returns `false`.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let removed = subscribers.remove(&id).is_some();
        if removed {
            self.report(subscribers.len());
            tracing::debug!(subscriber = id, total = subscribers.len(), "subscriber unregistered");
        }
        removed
    }

    /// Copy of the subscribers registered right now.
    pub fn snapshot(&self) -> Vec<SubscriberHandle> {
        self.subscribers.lock().values().cloned().collect()
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.lock().contains_key(&id)
    }

    /// Number of registered subscribers.
    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Whether no subscriber is registered.
    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().is_empty()
    }

    fn report(&self, len: usize) {
        if let Some(gauge) = &self.gauge {
            gauge.set(len as i64);
        }
    }
}
