//! DeployHub gateway.
//!
//! Single public entry point in front of the DeployHub services. Requests
//! are matched against a path-prefix [`RouteTable`] and forwarded by the
//! [`Proxy`]; `/health`, `/ready` and `/metrics` are answered locally.

pub mod config;
pub mod error;
pub mod proxy;
pub mod route_table;
pub mod routes;

pub use config::{Args, GatewayConfig};
pub use error::GatewayError;
pub use proxy::Proxy;
pub use route_table::{Route, RouteTable};

use std::sync::Arc;

use axum::Router;
use deployhub_core::{MetricsRegistry, SharedMetrics};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Request forwarder.
    pub proxy: Arc<Proxy>,
    /// Gateway metrics.
    pub metrics: SharedMetrics,
    /// Gateway configuration.
    pub config: GatewayConfig,
}

impl AppState {
    /// Create new application state.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let metrics = Arc::new(MetricsRegistry::new("deployhub_gateway"));
        let proxy = Proxy::new(&config)?.with_metrics(&metrics);
        Ok(Self {
            proxy: Arc::new(proxy),
            metrics,
            config,
        })
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
        .fallback(routes::proxy::forward)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
