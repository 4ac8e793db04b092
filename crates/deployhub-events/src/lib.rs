//! DeployHub events service.
//!
//! Pushes every change event from the publish channel to every connected
//! WebSocket subscriber:
//!
//! - [`registry`] - The set of subscribers that can currently take events
//! - [`broadcaster`] - Fans each event out to a registry snapshot
//! - [`connection`] - Per-socket lifecycle from upgrade to release
//! - [`routes`] - `/ws`, `/health`, `/ready` and `/metrics`

pub mod broadcaster;
pub mod config;
pub mod connection;
pub mod error;
pub mod registry;
pub mod routes;
pub mod state;

pub use broadcaster::{BroadcastMetrics, Broadcaster, RoundReport};
pub use config::{Args, EventsConfig};
pub use connection::{
    CloseReason, Connection, ConnectionManager, ConnectionSettings, ConnectionState,
};
pub use error::{DeliveryError, LifecycleError};
pub use registry::{Registry, SubscriberHandle, SubscriberId};
pub use state::AppState;

use axum::Router;
use deployhub_core::EventStream;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health::routes())
        .merge(routes::ws::routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Run the broadcaster over `events`, flagging the service ready for as long
/// as it runs.
pub async fn run_broadcaster(state: AppState, events: EventStream) {
    state.set_ready(true);
    state.broadcaster().run(events).await;
    state.set_ready(false);
}
