//! In-process publish channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::{EventStream, PublishChannel, DEFAULT_BUFFER_CAPACITY};
use crate::error::ChannelError;
use crate::event::{validate_topic, Event};

/// Publish channel living inside one process.
///
/// Each subscription gets its own bounded buffer. A full buffer drops the
/// event for that subscription only, which keeps publishing non-blocking
/// and matches the at-most-once contract of the networked bus.
pub struct LocalChannel {
    /// Senders per topic. `None` once closed.
    topics: Mutex<Option<HashMap<String, Vec<mpsc::Sender<Event>>>>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl LocalChannel {
    /// Create a channel buffering up to `capacity` events per subscription.
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Mutex::new(Some(HashMap::new())),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Number of events dropped because a subscription buffer was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let guard = self.topics.lock();
        guard
            .as_ref()
            .and_then(|topics| topics.get(topic))
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

impl Default for LocalChannel {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl PublishChannel for LocalChannel {
    fn publish(&self, topic: &str, event: Event) -> Result<(), ChannelError> {
        validate_topic(topic)?;

        let mut guard = self.topics.lock();
        let topics = guard.as_mut().ok_or(ChannelError::Closed)?;
        let Some(senders) = topics.get_mut(topic) else {
            return Ok(());
        };

        senders.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(topic, "subscription buffer full, dropping event");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });

        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<EventStream, ChannelError> {
        validate_topic(topic)?;

        let mut guard = self.topics.lock();
        let topics = guard.as_mut().ok_or(ChannelError::Closed)?;

        let (tx, rx) = mpsc::channel(self.capacity);
        topics.entry(topic.to_string()).or_default().push(tx);

        tracing::debug!(topic, "local subscription created");
        Ok(EventStream::new(topic, rx))
    }

    fn close(&self) {
        // Dropping the senders ends every stream once it is drained.
        if self.topics.lock().take().is_some() {
            tracing::debug!("local publish channel closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.topics.lock().is_none()
    }
}
