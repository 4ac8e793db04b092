//! DeployHub webhook forwarder.
//!
//! Subscribes to the change event topic and POSTs every event to the
//! configured webhook URLs.

pub mod config;
pub mod error;
pub mod forwarder;
pub mod routes;

pub use config::{Args, NotifyConfig};
pub use error::NotifyError;
pub use forwarder::{ForwardReport, RetryPolicy, WebhookForwarder};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::Router;
use deployhub_core::{EventStream, MetricsRegistry, SharedMetrics};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Webhook forwarder.
    pub forwarder: Arc<WebhookForwarder>,
    /// Service metrics.
    pub metrics: SharedMetrics,
    ready: Arc<AtomicBool>,
}

impl AppState {
    /// Create new application state.
    pub fn new(config: &NotifyConfig) -> Result<Self, NotifyError> {
        let metrics = Arc::new(MetricsRegistry::new("deployhub_notify"));
        let forwarder = WebhookForwarder::new(config.webhook_urls.clone(), config.timeout, config.retry)?
            .with_metrics(&metrics);

        Ok(Self {
            forwarder: Arc::new(forwarder),
            metrics,
            ready: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Whether the forwarder is consuming events.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }
}

/// Run the forwarder over `events`, flagging the service ready for as long
/// as it runs.
pub async fn run_forwarder(state: AppState, events: EventStream) {
    state.set_ready(true);
    state.forwarder.run(events).await;
    state.set_ready(false);
}

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health::routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
