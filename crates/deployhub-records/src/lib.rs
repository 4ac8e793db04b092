//! DeployHub record store.
//!
//! CRUD over deployment records persisted in sled. Every create, update and
//! delete is announced on the publish channel so the events service and the
//! webhook forwarder can react to it.

pub mod config;
pub mod error;
pub mod model;
pub mod publisher;
pub mod routes;
pub mod store;

pub use config::{Args, RecordsConfig};
pub use error::RecordError;
pub use model::{Deployment, DeploymentInput};
pub use publisher::EventPublisher;
pub use store::{DeploymentStore, StoreConfig};

use std::sync::Arc;

use axum::Router;
use deployhub_core::{Gauge, MetricsRegistry, SharedChannel, SharedMetrics};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Record storage.
    pub store: Arc<DeploymentStore>,
    /// Change event publisher.
    pub publisher: Arc<EventPublisher>,
    /// Service metrics.
    pub metrics: SharedMetrics,
    /// Record count, refreshed on scrape.
    pub deployments: Gauge,
}

impl AppState {
    /// Create new application state publishing to `channel`.
    pub fn new(store: DeploymentStore, channel: SharedChannel, topic: &str) -> Self {
        let metrics = Arc::new(MetricsRegistry::new("deployhub_records"));
        let publisher = EventPublisher::new(channel, topic).with_metrics(&metrics);
        let deployments = metrics.gauge("deployments", "Stored deployment records");

        Self {
            store: Arc::new(store),
            publisher: Arc::new(publisher),
            metrics,
            deployments,
        }
    }
}

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health::routes())
        .merge(routes::deployments::routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
