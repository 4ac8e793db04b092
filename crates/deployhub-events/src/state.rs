//! Application state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use deployhub_core::{MetricsRegistry, SharedMetrics};
use tokio::sync::broadcast;

use crate::broadcaster::{BroadcastMetrics, Broadcaster};
use crate::config::EventsConfig;
use crate::connection::ConnectionManager;
use crate::registry::Registry;

/// Application state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Live subscribers.
    pub registry: Arc<Registry>,
    /// Drives WebSocket connections.
    pub connections: Arc<ConnectionManager>,
    /// Service metrics.
    pub metrics: SharedMetrics,
    /// Service configuration.
    pub config: EventsConfig,
    ready: Arc<AtomicBool>,
}

impl AppState {
    /// Create new application state. Connections close when `shutdown`
    /// fires.
    pub fn new(config: EventsConfig, shutdown: broadcast::Sender<()>) -> Self {
        let metrics = Arc::new(MetricsRegistry::new("deployhub_events"));
        let registry = Arc::new(Registry::with_gauge(
            metrics.gauge("subscribers", "Registered subscribers"),
        ));
        let connections = ConnectionManager::new(
            registry.clone(),
            config.connection_settings(),
            shutdown,
        )
        .with_metrics(&metrics);

        Self {
            registry,
            connections: Arc::new(connections),
            metrics,
            config,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A broadcaster feeding this state's registry.
    pub fn broadcaster(&self) -> Broadcaster {
        Broadcaster::new(self.registry.clone())
            .with_delivery_timeout(self.config.delivery_timeout)
            .with_metrics(BroadcastMetrics::register(&self.metrics))
    }

    /// Whether the broadcaster is running.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Mark the broadcaster as running or stopped.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }
}
