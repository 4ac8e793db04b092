//! NNG PUB/SUB publish channel.
//!
//! The producing service listens with a PUB socket; consumers dial it with
//! SUB sockets. NNG drops messages for peers that are not connected or whose
//! queues are full, which is exactly the at-most-once contract of the
//! channel.
//!
//! Each subscription runs a dedicated receive thread that forwards frames
//! into a bounded tokio channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use nng::options::protocol::pubsub::Subscribe;
use nng::options::{Options, RecvMaxSize, RecvTimeout};
use nng::{Message, Protocol, Socket};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{EventStream, PublishChannel, DEFAULT_BUFFER_CAPACITY};
use crate::error::ChannelError;
use crate::event::{decode_frame, encode_frame, topic_prefix, validate_topic, Event, MAX_PAYLOAD_SIZE};

/// Default bus address.
pub const DEFAULT_BUS_ADDRESS: &str = "tcp://127.0.0.1:7400";

/// Default interval at which receive threads check for shutdown.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// NNG channel configuration.
#[derive(Debug, Clone)]
pub struct NngChannelConfig {
    /// Address to listen on with a PUB socket (e.g., "tcp://0.0.0.0:7400").
    pub listen_address: Option<String>,
    /// Address to dial with SUB sockets (e.g., "tcp://records:7400").
    pub dial_address: Option<String>,
    /// Events buffered per subscription before the receive thread blocks.
    pub buffer_capacity: usize,
    /// How often receive threads wake up to check for shutdown.
    pub poll_interval: Duration,
    /// Maximum accepted frame size in bytes.
    pub max_message_size: usize,
}

impl NngChannelConfig {
    /// Configuration for a producer listening on `address`.
    pub fn publisher(address: impl Into<String>) -> Self {
        Self {
            listen_address: Some(address.into()),
            ..Self::default()
        }
    }

    /// Configuration for a consumer dialing `address`.
    pub fn subscriber(address: impl Into<String>) -> Self {
        Self {
            dial_address: Some(address.into()),
            ..Self::default()
        }
    }

    /// Set the per-subscription buffer capacity.
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity.max(1);
        self
    }

    /// Set the shutdown poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl Default for NngChannelConfig {
    fn default() -> Self {
        Self {
            listen_address: None,
            dial_address: None,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_message_size: MAX_PAYLOAD_SIZE + 512,
        }
    }
}

/// Publish channel backed by NNG PUB/SUB sockets.
pub struct NngChannel {
    publisher: Mutex<Option<Socket>>,
    config: NngChannelConfig,
    stop_flag: Arc<AtomicBool>,
}

impl NngChannel {
    /// Open the channel, binding the PUB socket if one is configured.
    pub fn open(config: NngChannelConfig) -> Result<Self, ChannelError> {
        let publisher = match &config.listen_address {
            Some(address) => {
                let socket = Socket::new(Protocol::Pub0).map_err(|e| {
                    ChannelError::Transport(format!("failed to create PUB socket: {}", e))
                })?;
                socket.listen(address).map_err(|e| {
                    ChannelError::Transport(format!("failed to listen on {}: {}", address, e))
                })?;
                tracing::info!(address = %address, "publish channel listening");
                Some(socket)
            }
            None => None,
        };

        Ok(Self {
            publisher: Mutex::new(publisher),
            config,
            stop_flag: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The channel configuration.
    pub fn config(&self) -> &NngChannelConfig {
        &self.config
    }

    fn open_subscriber(&self, address: &str, topic: &str) -> Result<Socket, ChannelError> {
        let socket = Socket::new(Protocol::Sub0)
            .map_err(|e| ChannelError::Transport(format!("failed to create SUB socket: {}", e)))?;

        socket
            .set_opt::<RecvMaxSize>(self.config.max_message_size)
            .map_err(|e| ChannelError::Transport(format!("failed to set max message size: {}", e)))?;
        socket
            .set_opt::<RecvTimeout>(Some(self.config.poll_interval))
            .map_err(|e| ChannelError::Transport(format!("failed to set recv timeout: {}", e)))?;
        socket
            .set_opt::<Subscribe>(topic_prefix(topic))
            .map_err(|e| ChannelError::Transport(format!("failed to subscribe to {}: {}", topic, e)))?;

        // Non-blocking dial keeps retrying until the producer comes up.
        socket
            .dial_async(address)
            .map_err(|e| ChannelError::Transport(format!("failed to dial {}: {}", address, e)))?;

        Ok(socket)
    }
}

impl PublishChannel for NngChannel {
    fn publish(&self, topic: &str, event: Event) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }

        let guard = self.publisher.lock();
        let socket = guard.as_ref().ok_or(ChannelError::NotPublisher)?;

        let frame = encode_frame(topic, event.as_bytes())?;
        socket
            .send(Message::from(frame.as_slice()))
            .map_err(|(_, e)| ChannelError::Transport(format!("failed to publish: {}", e)))?;

        tracing::trace!(topic, bytes = event.len(), "event published");
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<EventStream, ChannelError> {
        validate_topic(topic)?;
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }

        let address = self
            .config
            .dial_address
            .as_deref()
            .ok_or(ChannelError::NotSubscriber)?;
        let socket = self.open_subscriber(address, topic)?;

        let (tx, rx) = mpsc::channel(self.config.buffer_capacity.max(1));
        let stop_flag = self.stop_flag.clone();
        let thread_topic = topic.to_string();

        thread::Builder::new()
            .name(format!("deployhub-sub-{}", topic))
            .spawn(move || receive_loop(socket, thread_topic, tx, stop_flag))
            .map_err(|e| ChannelError::Transport(format!("failed to spawn receiver: {}", e)))?;

        tracing::info!(address = %address, topic, "subscribed to publish channel");
        Ok(EventStream::new(topic, rx))
    }

    fn close(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(socket) = self.publisher.lock().take() {
            socket.close();
        }
        tracing::debug!("nng publish channel closed");
    }

    fn is_closed(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }
}

impl Drop for NngChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Forward frames from a SUB socket until the channel closes or the stream
/// is dropped. Dropping `tx` on exit ends the stream.
///
/// On close, frames the socket has already queued are still handed over
/// before the socket is released.
fn receive_loop(
    socket: Socket,
    topic: String,
    tx: mpsc::Sender<Event>,
    stop_flag: Arc<AtomicBool>,
) {
    let mut stopped = false;
    loop {
        if tx.is_closed() {
            break;
        }
        if stop_flag.load(Ordering::SeqCst) {
            stopped = true;
            break;
        }

        let msg = match socket.recv() {
            Ok(msg) => msg,
            Err(nng::Error::TimedOut) => continue,
            Err(nng::Error::Closed) => break,
            Err(e) => {
                tracing::warn!(error = %e, topic = %topic, "receive failed on publish channel");
                continue;
            }
        };

        if !forward_frame(&msg, &topic, &tx) {
            break;
        }
    }

    if stopped {
        let mut drained = 0usize;
        while let Ok(msg) = socket.try_recv() {
            if !forward_frame(&msg, &topic, &tx) {
                break;
            }
            drained += 1;
        }
        tracing::debug!(topic = %topic, drained, "drained queued frames");
    }

    socket.close();
    tracing::debug!(topic = %topic, "publish channel receiver stopped");
}

/// Decode one frame and pass its event on. Returns `false` once the stream
/// has been dropped.
fn forward_frame(msg: &Message, topic: &str, tx: &mpsc::Sender<Event>) -> bool {
    match decode_frame(msg.as_slice()) {
        Ok((frame_topic, payload)) if frame_topic == topic => tx
            .blocking_send(Event::new(Bytes::copy_from_slice(payload)))
            .is_ok(),
        Ok((frame_topic, _)) => {
            tracing::trace!(topic = %frame_topic, "ignoring frame for another topic");
            true
        }
        Err(e) => {
            tracing::warn!(error = %e, topic = %topic, "dropping malformed frame");
            true
        }
    }
}
