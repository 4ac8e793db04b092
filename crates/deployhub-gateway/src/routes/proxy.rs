//! Catch-all proxy handler.

use axum::{extract::Request, extract::State, response::Response};

use crate::error::GatewayError;
use crate::AppState;

/// Forward anything not served locally.
pub async fn forward(State(state): State<AppState>, request: Request) -> Result<Response, GatewayError> {
    state.proxy.forward(request).await
}
