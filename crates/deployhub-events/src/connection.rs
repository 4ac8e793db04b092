//! Connection lifecycle management.
//!
//! Every subscriber connection walks `Connecting → Open → Closing → Closed`
//! exactly once. Registration happens on the way into `Open`, after the
//! outbound buffer exists, so the broadcaster can never pick up a subscriber
//! that cannot take writes. Any of these moves a connection to `Closing`:
//!
//! - the peer sends a close frame, the stream ends, or a read fails
//! - a write to the socket fails or times out
//! - the broadcaster evicts the subscriber (its outbox closes)
//! - the service shuts down
//!
//! `Closing → Closed` unregisters the subscriber and releases the socket.
//! Errors while releasing are logged and swallowed.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use deployhub_core::{Counter, Event, MetricsRegistry};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{broadcast, mpsc};

use crate::error::LifecycleError;
use crate::registry::{Registry, SubscriberHandle, SubscriberId};

/// Default number of events buffered per subscriber.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 64;

/// Default time a single socket write may take.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed for the close handshake during teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Upgrade in progress, not yet registered.
    Connecting,
    /// Registered and receiving events.
    Open,
    /// Shutting down; no longer accepting events.
    Closing,
    /// Unregistered and released. Terminal.
    Closed,
}

impl ConnectionState {
    fn successor(self) -> Option<Self> {
        match self {
            Self::Connecting => Some(Self::Open),
            Self::Open => Some(Self::Closing),
            Self::Closing => Some(Self::Closed),
            Self::Closed => None,
        }
    }
}

/// Why a connection left `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer sent a close frame or the stream ended.
    PeerClosed,
    /// Reading from the socket failed.
    ReadError,
    /// Writing to the socket failed or timed out.
    WriteFailed,
    /// The broadcaster dropped the subscriber after a failed delivery.
    Evicted,
    /// The service is shutting down.
    Shutdown,
}

impl CloseReason {
    /// Whether the peer is still worth sending a close frame to.
    fn should_send_close(self) -> bool {
        matches!(self, Self::Evicted | Self::Shutdown)
    }
}

/// One subscriber connection's lifecycle state.
#[derive(Debug)]
pub struct Connection {
    id: SubscriberId,
    state: ConnectionState,
    registry: Arc<Registry>,
    close_reason: Option<CloseReason>,
}

impl Connection {
    /// Start a connection in `Connecting`.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            id: registry.next_id(),
            state: ConnectionState::Connecting,
            registry,
            close_reason: None,
        }
    }

    /// Subscriber ID.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Why the connection is closing, once it is.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    fn transition(&mut self, to: ConnectionState) -> Result<(), LifecycleError> {
        if self.state.successor() != Some(to) {
            return Err(LifecycleError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        tracing::trace!(subscriber = self.id, from = ?self.state, to = ?to, "connection state change");
        self.state = to;
        Ok(())
    }

    /// `Connecting → Open`: create the outbound buffer and register.
    pub fn open(&mut self, buffer: usize) -> Result<mpsc::Receiver<Event>, LifecycleError> {
        self.transition(ConnectionState::Open)?;
        let (tx, rx) = mpsc::channel(buffer.max(1));
        self.registry.register(SubscriberHandle::new(self.id, tx));
        Ok(rx)
    }

    /// `Open → Closing`.
    pub fn begin_close(&mut self, reason: CloseReason) -> Result<(), LifecycleError> {
        self.transition(ConnectionState::Closing)?;
        self.close_reason = Some(reason);
        Ok(())
    }

    /// `Closing → Closed`: unregister. Idempotent with respect to the
    /// registry, since an evicted subscriber is already gone.
    pub fn finish_close(&mut self) -> Result<(), LifecycleError> {
        self.transition(ConnectionState::Closed)?;
        self.registry.unregister(self.id);
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // A task cancelled mid-flight must not leave a dead handle behind.
        if self.state != ConnectionState::Closed {
            self.registry.unregister(self.id);
        }
    }
}

/// Per-connection settings.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    /// Events buffered between the broadcaster and the socket writer.
    pub outbound_buffer: usize,
    /// Maximum time for one socket write.
    pub write_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// Accepts upgraded sockets and drives each through its lifecycle.
pub struct ConnectionManager {
    registry: Arc<Registry>,
    settings: ConnectionSettings,
    shutdown: broadcast::Sender<()>,
    opened: Counter,
    closed: Counter,
}

impl ConnectionManager {
    /// Create a manager registering into `registry`. Connections close when
    /// `shutdown` fires.
    pub fn new(
        registry: Arc<Registry>,
        settings: ConnectionSettings,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            registry,
            settings,
            shutdown,
            opened: Counter::default(),
            closed: Counter::default(),
        }
    }

    /// Record connection counts into `metrics`.
    pub fn with_metrics(mut self, metrics: &MetricsRegistry) -> Self {
        self.opened = metrics.counter("connections_opened_total", "Subscriber connections opened");
        self.closed = metrics.counter("connections_closed_total", "Subscriber connections closed");
        self
    }

    /// The registry connections are added to.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Serve one subscriber until it closes. Returns why it closed.
    pub async fn serve<S, E>(&self, socket: S) -> CloseReason
    where
        S: Stream<Item = Result<Message, E>> + Sink<Message>,
        E: Display,
        <S as Sink<Message>>::Error: Display,
    {
        let mut shutdown = self.shutdown.subscribe();
        let mut connection = Connection::new(self.registry.clone());
        let id = connection.id();

        let mut outbox = match connection.open(self.settings.outbound_buffer) {
            Ok(outbox) => outbox,
            Err(e) => {
                tracing::error!(subscriber = id, error = %e, "failed to open connection");
                return CloseReason::Shutdown;
            }
        };
        self.opened.inc();
        tracing::info!(subscriber = id, subscribers = self.registry.len(), "subscriber connected");

        let (mut sink, mut stream) = socket.split();
        let write_timeout = self.settings.write_timeout;

        let reason = loop {
            tokio::select! {
                inbound = stream.next() => match inbound {
                    Some(Ok(Message::Close(_))) | None => break CloseReason::PeerClosed,
                    // Inbound content only signals liveness.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(subscriber = id, error = %e, "read failed");
                        break CloseReason::ReadError;
                    }
                },
                outbound = outbox.recv() => match outbound {
                    Some(event) => {
                        match tokio::time::timeout(write_timeout, sink.send(to_message(&event))).await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => {
                                tracing::warn!(subscriber = id, error = %e, "write failed");
                                break CloseReason::WriteFailed;
                            }
                            Err(_) => {
                                tracing::warn!(subscriber = id, timeout = ?write_timeout, "write timed out");
                                break CloseReason::WriteFailed;
                            }
                        }
                    }
                    None => break CloseReason::Evicted,
                },
                _ = shutdown.recv() => break CloseReason::Shutdown,
            }
        };

        if let Err(e) = connection.begin_close(reason) {
            tracing::error!(subscriber = id, error = %e, "lifecycle violation");
        }
        if let Err(e) = connection.finish_close() {
            tracing::error!(subscriber = id, error = %e, "lifecycle violation");
        }
        drop(outbox);

        // Release the socket. Teardown errors stay local.
        if reason.should_send_close() {
            match tokio::time::timeout(CLOSE_TIMEOUT, sink.send(Message::Close(None))).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(subscriber = id, error = %e, "close frame not sent"),
                Err(_) => tracing::debug!(subscriber = id, "close frame timed out"),
            }
        }
        match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(subscriber = id, error = %e, "socket close failed"),
            Err(_) => tracing::debug!(subscriber = id, "socket close timed out"),
        }

        self.closed.inc();
        tracing::info!(subscriber = id, reason = ?reason, subscribers = self.registry.len(), "subscriber disconnected");
        reason
    }
}

/// Text frame when the payload is UTF-8, binary otherwise.
fn to_message(event: &Event) -> Message {
    match event.as_text() {
        Some(text) => Message::Text(text.to_string()),
        None => Message::Binary(event.as_bytes().to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster::Broadcaster;
    use futures::channel::mpsc as fmpsc;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// In-memory socket: the test feeds inbound frames and reads outbound
    /// ones.
    struct FakeSocket {
        inbound: fmpsc::UnboundedReceiver<Result<Message, String>>,
        outbound: fmpsc::UnboundedSender<Message>,
        fail_writes: bool,
    }

    impl Stream for FakeSocket {
        type Item = Result<Message, String>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Pin::new(&mut self.inbound).poll_next(cx)
        }
    }

    impl Sink<Message> for FakeSocket {
        type Error = String;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), String>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), String> {
            if self.fail_writes {
                return Err("broken pipe".to_string());
            }
            self.outbound
                .unbounded_send(item)
                .map_err(|e| e.to_string())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), String>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), String>> {
            Poll::Ready(Ok(()))
        }
    }

    struct Peer {
        inbound: fmpsc::UnboundedSender<Result<Message, String>>,
        outbound: fmpsc::UnboundedReceiver<Message>,
    }

    impl Peer {
        async fn next_text(&mut self) -> Option<String> {
            match self.outbound.next().await {
                Some(Message::Text(text)) => Some(text),
                _ => None,
            }
        }
    }

    fn socket_pair(fail_writes: bool) -> (FakeSocket, Peer) {
        let (in_tx, in_rx) = fmpsc::unbounded();
        let (out_tx, out_rx) = fmpsc::unbounded();
        (
            FakeSocket {
                inbound: in_rx,
                outbound: out_tx,
                fail_writes,
            },
            Peer {
                inbound: in_tx,
                outbound: out_rx,
            },
        )
    }

    fn manager() -> (Arc<ConnectionManager>, broadcast::Sender<()>) {
        let (shutdown, _) = broadcast::channel(1);
        let manager = ConnectionManager::new(
            Arc::new(Registry::new()),
            ConnectionSettings::default(),
            shutdown.clone(),
        );
        (Arc::new(manager), shutdown)
    }

    async fn wait_for_subscribers(registry: &Registry, count: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while registry.len() != count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("registry never reached expected size");
    }

    #[test]
    fn test_state_machine_happy_path() {
        let registry = Arc::new(Registry::new());
        let mut conn = Connection::new(registry.clone());
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(!registry.contains(conn.id()));

        let _outbox = conn.open(4).unwrap();
        assert_eq!(conn.state(), ConnectionState::Open);
        assert!(registry.contains(conn.id()));

        conn.begin_close(CloseReason::PeerClosed).unwrap();
        assert_eq!(conn.state(), ConnectionState::Closing);
        assert_eq!(conn.close_reason(), Some(CloseReason::PeerClosed));

        conn.finish_close().unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(!registry.contains(conn.id()));
    }

    #[test]
    fn test_state_machine_rejects_skips_and_reentry() {
        let registry = Arc::new(Registry::new());
        let mut conn = Connection::new(registry);

        assert!(conn.begin_close(CloseReason::Shutdown).is_err());
        assert!(conn.finish_close().is_err());

        conn.open(1).unwrap();
        assert!(conn.open(1).is_err());
        assert!(conn.finish_close().is_err());

        conn.begin_close(CloseReason::Shutdown).unwrap();
        assert!(conn.open(1).is_err());
        conn.finish_close().unwrap();
        assert!(conn.open(1).is_err());
        assert!(conn.begin_close(CloseReason::Shutdown).is_err());
    }

    #[test]
    fn test_dropped_connection_unregisters() {
        let registry = Arc::new(Registry::new());
        let mut conn = Connection::new(registry.clone());
        let _outbox = conn.open(1).unwrap();
        assert_eq!(registry.len(), 1);

        drop(conn);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_events_are_written_as_text() {
        let (manager, _shutdown) = manager();
        let (socket, mut peer) = socket_pair(false);

        let task = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.serve(socket).await })
        };
        wait_for_subscribers(manager.registry(), 1).await;

        let broadcaster = Broadcaster::new(manager.registry().clone());
        broadcaster.broadcast(&Event::from(r#"{"id":1,"status":"created"}"#)).await;
        assert_eq!(peer.next_text().await.as_deref(), Some(r#"{"id":1,"status":"created"}"#));

        peer.inbound.unbounded_send(Ok(Message::Close(None))).unwrap();
        assert_eq!(task.await.unwrap(), CloseReason::PeerClosed);
        assert!(manager.registry().is_empty());
    }

    #[tokio::test]
    async fn test_binary_payload_is_written_as_binary() {
        let (manager, _shutdown) = manager();
        let (socket, mut peer) = socket_pair(false);
        let task = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.serve(socket).await })
        };
        wait_for_subscribers(manager.registry(), 1).await;

        Broadcaster::new(manager.registry().clone())
            .broadcast(&Event::from(vec![0xff, 0x00]))
            .await;
        assert!(matches!(peer.outbound.next().await, Some(Message::Binary(b)) if b == vec![0xff, 0x00]));

        drop(peer.inbound);
        assert_eq!(task.await.unwrap(), CloseReason::PeerClosed);
    }

    #[tokio::test]
    async fn test_inbound_messages_are_ignored() {
        let (manager, _shutdown) = manager();
        let (socket, mut peer) = socket_pair(false);
        let task = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.serve(socket).await })
        };
        wait_for_subscribers(manager.registry(), 1).await;

        peer.inbound.unbounded_send(Ok(Message::Text("ping".into()))).unwrap();
        peer.inbound.unbounded_send(Ok(Message::Ping(vec![1]))).unwrap();
        Broadcaster::new(manager.registry().clone())
            .broadcast(&Event::from("still here"))
            .await;
        assert_eq!(peer.next_text().await.as_deref(), Some("still here"));

        peer.inbound.unbounded_send(Err("reset".to_string())).unwrap();
        assert_eq!(task.await.unwrap(), CloseReason::ReadError);
        assert!(manager.registry().is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_closes_connection() {
        let (manager, _shutdown) = manager();
        let (socket, _peer) = socket_pair(true);
        let task = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.serve(socket).await })
        };
        wait_for_subscribers(manager.registry(), 1).await;

        Broadcaster::new(manager.registry().clone())
            .broadcast(&Event::from("x"))
            .await;

        assert_eq!(task.await.unwrap(), CloseReason::WriteFailed);
        assert!(manager.registry().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_closes_connection_with_close_frame() {
        let (manager, shutdown) = manager();
        let (socket, mut peer) = socket_pair(false);
        let task = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.serve(socket).await })
        };
        wait_for_subscribers(manager.registry(), 1).await;

        shutdown.send(()).unwrap();
        assert_eq!(task.await.unwrap(), CloseReason::Shutdown);
        assert!(matches!(peer.outbound.next().await, Some(Message::Close(None))));
        assert!(manager.registry().is_empty());
    }

    #[tokio::test]
    async fn test_eviction_closes_connection() {
        let (manager, _shutdown) = manager();
        let (socket, _peer) = socket_pair(false);
        let task = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.serve(socket).await })
        };
        wait_for_subscribers(manager.registry(), 1).await;

        let id = manager.registry().snapshot()[0].id();
        manager.registry().unregister(id);

        assert_eq!(task.await.unwrap(), CloseReason::Evicted);
    }

    #[tokio::test]
    async fn test_abrupt_disconnect_mid_stream() {
        let (manager, _shutdown) = manager();
        let (socket_a, mut peer_a) = socket_pair(false);
        let (socket_b, mut peer_b) = socket_pair(false);

        let task_a = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.serve(socket_a).await })
        };
        let task_b = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.serve(socket_b).await })
        };
        wait_for_subscribers(manager.registry(), 2).await;

        let broadcaster = Broadcaster::new(manager.registry().clone());
        for i in 1..=3 {
            broadcaster.broadcast(&Event::from(format!("event-{}", i))).await;
        }
        for i in 1..=3 {
            assert_eq!(peer_a.next_text().await, Some(format!("event-{}", i)));
        }

        // A vanishes without a close frame.
        drop(peer_a);
        assert_eq!(task_a.await.unwrap(), CloseReason::PeerClosed);
        assert_eq!(manager.registry().len(), 1);

        for i in 4..=5 {
            let report = broadcaster.broadcast(&Event::from(format!("event-{}", i))).await;
            assert_eq!(report.delivered, 1);
        }
        for i in 1..=5 {
            assert_eq!(peer_b.next_text().await, Some(format!("event-{}", i)));
        }

        drop(peer_b.inbound);
        assert_eq!(task_b.await.unwrap(), CloseReason::PeerClosed);
    }
}
