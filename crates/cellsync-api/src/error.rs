//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cellsync_kernel::KernelError;
use cellsync_protocols::{IdError, StoreError};
use cellsync_replica::ReplicaError;
use thiserror::Error;
use tracing::error;

/// Errors returned by the HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Access token required")]
    Unauthorized,

    #[error("Permission denied")]
    Forbidden,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Server is read-only")]
    ReadOnly,

    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ReadOnly => StatusCode::CONFLICT,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<IdError> for ApiError {
    fn from(err: IdError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<KernelError> for ApiError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::ReadOnly => ApiError::ReadOnly,
            KernelError::ReadinessTimeout { .. } | KernelError::Cancelled => {
                ApiError::Timeout(err.to_string())
            }
            KernelError::Provision(_) | KernelError::Transport(_) | KernelError::UnknownImage(_) => {
                ApiError::Upstream(err.to_string())
            }
            KernelError::Replica(_) | KernelError::Store(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<ReplicaError> for ApiError {
    fn from(err: ReplicaError) -> Self {
        match err {
            ReplicaError::PermissionDenied => ApiError::Forbidden,
            err => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ApiError::NotFound(what),
            err => ApiError::Internal(err.to_string()),
        }
    }
}
