//! Publish channel abstraction.
//!
//! A publish channel is an ordered, at-most-once broadcast medium keyed by
//! topic. Producers call [`PublishChannel::publish`]; consumers call
//! [`PublishChannel::subscribe`] and get an [`EventStream`], a lazy sequence
//! of events that ends once the channel is closed and any buffered events
//! have been drained. A stream cannot be restarted after it ends.

mod local;
mod network;

pub use self::local::LocalChannel;
pub use self::network::{NngChannel, NngChannelConfig, DEFAULT_BUS_ADDRESS};

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::error::ChannelError;
use crate::event::Event;

/// Default number of events buffered per subscription.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// A topic-scoped broadcast medium.
pub trait PublishChannel: Send + Sync {
    /// Publish an event on `topic`. Never blocks.
    fn publish(&self, topic: &str, event: Event) -> Result<(), ChannelError>;

    /// Subscribe to `topic`.
    fn subscribe(&self, topic: &str) -> Result<EventStream, ChannelError>;

    /// Close the channel. Open streams end after draining what they buffered.
    fn close(&self);

    /// Whether [`PublishChannel::close`] has been called.
    fn is_closed(&self) -> bool;
}

/// Shared publish channel handle.
pub type SharedChannel = Arc<dyn PublishChannel>;

/// Sequence of events received on one topic.
#[derive(Debug)]
pub struct EventStream {
    topic: String,
    rx: mpsc::Receiver<Event>,
}

impl EventStream {
    pub(crate) fn new(topic: impl Into<String>, rx: mpsc::Receiver<Event>) -> Self {
        Self {
            topic: topic.into(),
            rx,
        }
    }

    /// Create a stream fed by the returned sender.
    ///
    /// Useful for driving a consumer directly; the stream ends when every
    /// sender is dropped.
    pub fn channel(topic: impl Into<String>, capacity: usize) -> (mpsc::Sender<Event>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self::new(topic, rx))
    }

    /// The topic this stream is bound to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the next event. Returns `None` once the channel is closed
    /// and drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Take an already buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.rx.poll_recv(cx)
    }
}
