//! Error handling for the record store.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Record store error type.
#[derive(Debug, Error)]
pub enum RecordError {
    /// No record with this ID.
    #[error("deployment {0} not found")]
    NotFound(i64),

    /// The request body is missing fields or malformed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The path ID is not a number.
    #[error("invalid deployment id: {0}")]
    InvalidId(String),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// A stored record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RecordError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            RecordError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            RecordError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            RecordError::InvalidId(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            RecordError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            RecordError::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for RecordError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = json!({
            "error": true,
            "code": code,
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for RecordError {
    fn from(rejection: JsonRejection) -> Self {
        RecordError::Validation(rejection.body_text())
    }
}
