//! Fan-out broadcaster.
//!
//! Drains the publish channel and offers each event to every subscriber in
//! the registry snapshot taken when the event arrives. Deliveries within a
//! round run concurrently and each is bounded by the delivery timeout, so a
//! stalled subscriber costs the round at most one timeout and never blocks
//! the others. A failed subscriber is evicted from the registry; its
//! connection sees its outbox close and shuts itself down.

use std::sync::Arc;
use std::time::Duration;

use deployhub_core::{Counter, Event, EventStream, MetricsRegistry};
use futures::future::join_all;

use crate::registry::Registry;

/// Default time a single delivery may wait for buffer space.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome of one broadcast round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundReport {
    /// Subscribers in the snapshot.
    pub recipients: usize,
    /// Deliveries that succeeded.
    pub delivered: usize,
    /// Subscribers evicted after a failed delivery.
    pub evicted: usize,
}

/// Broadcaster counters.
#[derive(Debug, Clone, Default)]
pub struct BroadcastMetrics {
    events_received: Counter,
    deliveries: Counter,
    delivery_failures: Counter,
}

impl BroadcastMetrics {
    /// Register the broadcaster counters in `registry`.
    pub fn register(registry: &MetricsRegistry) -> Self {
        Self {
            events_received: registry
                .counter("events_received_total", "Events read from the publish channel"),
            deliveries: registry
                .counter("deliveries_total", "Events handed to subscriber buffers"),
            delivery_failures: registry.counter(
                "delivery_failures_total",
                "Deliveries that failed and evicted a subscriber",
            ),
        }
    }
}

/// Pushes events from the publish channel to registered subscribers.
pub struct Broadcaster {
    registry: Arc<Registry>,
    delivery_timeout: Duration,
    metrics: BroadcastMetrics,
}

impl Broadcaster {
    /// Create a broadcaster over `registry`.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
            metrics: BroadcastMetrics::default(),
        }
    }

    /// Set the per-subscriber delivery timeout.
    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Record into the given counters.
    pub fn with_metrics(mut self, metrics: BroadcastMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Run until the stream ends, i.e. the publish channel was closed and
    /// everything it had buffered has been broadcast.
    pub async fn run(self, mut events: EventStream) {
        tracing::info!(topic = events.topic(), "broadcaster started");

        let mut rounds: u64 = 0;
        while let Some(event) = events.recv().await {
            self.broadcast(&event).await;
            rounds += 1;
        }

        tracing::info!(topic = events.topic(), rounds, "publish channel closed, broadcaster stopped");
    }

    /// Offer one event to every subscriber registered right now.
    pub async fn broadcast(&self, event: &Event) -> RoundReport {
        self.metrics.events_received.inc();

        let snapshot = self.registry.snapshot();
        let mut report = RoundReport {
            recipients: snapshot.len(),
            ..RoundReport::default()
        };
        if snapshot.is_empty() {
            tracing::trace!(bytes = event.len(), "no subscribers for event");
            return report;
        }

        let timeout = self.delivery_timeout;
        let results = join_all(snapshot.iter().map(|subscriber| async move {
            let result = subscriber.deliver(event.clone(), timeout).await;
            (subscriber.id(), result)
        }))
        .await;
        // Release the snapshot so evicted outboxes can close.
        drop(snapshot);

        for (id, result) in results {
            match result {
                Ok(()) => {
                    report.delivered += 1;
                    self.metrics.deliveries.inc();
                }
                Err(e) => {
                    self.metrics.delivery_failures.inc();
                    tracing::warn!(subscriber = id, error = %e, "delivery failed, evicting subscriber");
                    if self.registry.unregister(id) {
                        report.evicted += 1;
                    }
                }
            }
        }

        tracing::trace!(
            recipients = report.recipients,
            delivered = report.delivered,
            evicted = report.evicted,
            "broadcast round complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SubscriberHandle;
    use tokio::sync::mpsc;

    fn subscribe(registry: &Registry, capacity: usize) -> (u64, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        let id = registry.next_id();
        registry.register(SubscriberHandle::new(id, tx));
        (id, rx)
    }

    #[tokio::test]
    async fn test_every_subscriber_gets_every_event_in_order() {
        let registry = Arc::new(Registry::new());
        let mut receivers: Vec<_> = (0..3).map(|_| subscribe(&registry, 16).1).collect();
        let broadcaster = Broadcaster::new(registry.clone());

        for i in 0..10 {
            let report = broadcaster.broadcast(&Event::from(format!("{}", i))).await;
            assert_eq!(report.delivered, 3);
        }

        for rx in receivers.iter_mut() {
            for i in 0..10 {
                let event = rx.recv().await.unwrap();
                assert_eq!(event.as_text(), Some(i.to_string().as_str()));
            }
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_evicted_without_affecting_others() {
        let registry = Arc::new(Registry::new());
        let (gone_id, gone_rx) = subscribe(&registry, 4);
        let (_, mut live_rx) = subscribe(&registry, 4);
        drop(gone_rx);

        let broadcaster = Broadcaster::new(registry.clone());
        let report = broadcaster.broadcast(&Event::from("x")).await;

        assert_eq!(report, RoundReport { recipients: 2, delivered: 1, evicted: 1 });
        assert!(!registry.contains(gone_id));
        assert_eq!(live_rx.recv().await, Some(Event::from("x")));
    }

    #[tokio::test]
    async fn test_stalled_subscriber_is_bounded_by_timeout() {
        let registry = Arc::new(Registry::new());
        let (stalled_id, _stalled_rx) = subscribe(&registry, 1);
        let (_, mut live_rx) = subscribe(&registry, 8);

        let broadcaster = Broadcaster::new(registry.clone())
            .with_delivery_timeout(Duration::from_millis(50));

        // Fills the stalled buffer.
        broadcaster.broadcast(&Event::from("1")).await;

        let started = std::time::Instant::now();
        let report = broadcaster.broadcast(&Event::from("2")).await;
        assert!(started.elapsed() < Duration::from_secs(1));

        assert_eq!(report.evicted, 1);
        assert!(!registry.contains(stalled_id));
        assert_eq!(live_rx.recv().await, Some(Event::from("1")));
        assert_eq!(live_rx.recv().await, Some(Event::from("2")));
    }

    #[tokio::test]
    async fn test_evicted_outbox_reports_closed() {
        let registry = Arc::new(Registry::new());
        let (_, mut stalled_rx) = subscribe(&registry, 1);
        let broadcaster = Broadcaster::new(registry.clone())
            .with_delivery_timeout(Duration::from_millis(10));

        broadcaster.broadcast(&Event::from("1")).await;
        broadcaster.broadcast(&Event::from("2")).await;

        // The buffered event is still readable, then the outbox ends.
        assert_eq!(stalled_rx.recv().await, Some(Event::from("1")));
        assert_eq!(stalled_rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_late_joiner_misses_earlier_events() {
        let registry = Arc::new(Registry::new());
        let (_, mut early) = subscribe(&registry, 8);
        let broadcaster = Broadcaster::new(registry.clone());

        broadcaster.broadcast(&Event::from("before")).await;
        let (_, mut late) = subscribe(&registry, 8);
        broadcaster.broadcast(&Event::from("after")).await;

        assert_eq!(early.recv().await, Some(Event::from("before")));
        assert_eq!(early.recv().await, Some(Event::from("after")));
        assert_eq!(late.recv().await, Some(Event::from("after")));
    }

    #[tokio::test]
    async fn test_run_drains_then_stops_when_channel_closes() {
        let registry = Arc::new(Registry::new());
        let (_, mut rx) = subscribe(&registry, 8);

        let (tx, stream) = EventStream::channel("deployments.events", 8);
        for i in 0..3 {
            tx.send(Event::from(format!("{}", i))).await.unwrap();
        }
        drop(tx);

        let metrics = MetricsRegistry::new("test");
        Broadcaster::new(registry.clone())
            .with_metrics(BroadcastMetrics::register(&metrics))
            .run(stream)
            .await;

        for i in 0..3 {
            assert_eq!(rx.recv().await.unwrap().as_text(), Some(i.to_string().as_str()));
        }
        assert_eq!(metrics.counter("events_received_total", "").get(), 3);
        assert_eq!(metrics.counter("deliveries_total", "").get(), 3);
    }

    #[tokio::test]
    async fn test_empty_registry_round() {
        let broadcaster = Broadcaster::new(Arc::new(Registry::new()));
        let report = broadcaster.broadcast(&Event::from("x")).await;
        assert_eq!(report, RoundReport::default());
    }
}
