//! Error handling for the gateway.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Gateway error type.
///
/// Upstream failures never surface as anything but `502`: a slow upstream
/// and an unreachable one are distinguished only by `code`.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No route prefix matches the request path.
    #[error("no route for {0}")]
    NoRoute(String),

    /// The request could not be read or forwarded as sent.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The upstream did not answer within the timeout.
    #[error("upstream timed out: {0}")]
    UpstreamTimeout(String),

    /// The upstream could not be reached or broke the exchange.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A route definition is malformed.
    #[error("invalid route: {0}")]
    InvalidRoute(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::NoRoute(_) => StatusCode::NOT_FOUND,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::UpstreamTimeout(_) | GatewayError::UpstreamUnavailable(_) => {
                StatusCode::BAD_GATEWAY
            }
            GatewayError::InvalidRoute(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::NoRoute(_) => "NOT_FOUND",
            GatewayError::BadRequest(_) => "BAD_REQUEST",
            GatewayError::UpstreamTimeout(_) => "UPSTREAM_TIMEOUT",
            GatewayError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            GatewayError::InvalidRoute(_) => "INVALID_ROUTE",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": true,
            "code": self.code(),
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::UpstreamTimeout(err.to_string())
        } else if err.is_builder() {
            GatewayError::BadRequest(err.to_string())
        } else {
            GatewayError::UpstreamUnavailable(err.to_string())
        }
    }
}
