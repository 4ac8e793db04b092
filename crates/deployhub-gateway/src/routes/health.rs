//! Health, readiness and metrics endpoints.
//!
//! These are served by the gateway itself and take precedence over the
//! route table.

use axum::{extract::State, http::header, response::IntoResponse, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .route("/metrics", get(metrics))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "gateway",
    }))
}

async fn ready_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ready",
        "routes": state.proxy.table().len(),
    }))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}
