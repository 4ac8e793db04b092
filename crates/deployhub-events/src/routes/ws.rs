//! Subscriber WebSocket endpoint.

use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/ws", get(ws_subscribe))
}

/// Upgrade and hand the socket to the connection manager. Every change event
/// published from then on is pushed to the client until either side closes.
async fn ws_subscribe(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| async move {
        state.connections.serve(socket).await;
    })
}
