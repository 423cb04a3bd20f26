//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors are automatically converted
//! to a JSON-body HTTP response with an appropriate status code.
//!
//! Internal errors are logged with full detail but only a generic message is
//! returned to the caller.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// All errors that can occur in the quill-server request lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Propagated from quill-core's worker pool.
    #[error("runtime error: {0}")]
    Runtime(#[from] quill_core::RuntimeError),

    /// The conversion request failed validation.
    #[error("bad request: {0}")]
    Validation(#[from] quill_core::ValidationError),

    /// The caller referenced a resource that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// An unclassified internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            ServerError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::Validation(e) => (StatusCode::BAD_REQUEST, e.to_string()),

            ServerError::Runtime(e) => {
                error!(error = %e, "conversion runtime error");
                let message = match e {
                    quill_core::RuntimeError::PoolClosed => {
                        return (
                            StatusCode::SERVICE_UNAVAILABLE,
                            Json(json!({ "error": "server is shutting down" })),
                        )
                            .into_response();
                    }
                    quill_core::RuntimeError::TaskFailed { message } => message.clone(),
                };
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(e: anyhow::Error) -> Self {
        error!(error = ?e, "converting anyhow error to ServerError::Internal");
        ServerError::Internal(e.to_string())
    }
}
