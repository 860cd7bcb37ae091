//! Kernel error types.

use cellsync_protocols::StoreError;
use cellsync_replica::ReplicaError;
use thiserror::Error;

/// Rejected wire messages. Never reach application state.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("Delimiter frame not found")]
    MissingDelimiter,

    #[error("Expected at least 5 frames after the delimiter, got {0}")]
    ShortMessage(usize),

    #[error("Signature mismatch")]
    BadSignature,

    #[error("Invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),
}

/// Kernel socket failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to connect to {address}: {message}")]
    Connect { address: String, message: String },

    #[error("Socket error: {0}")]
    Socket(String),

    #[error("Transport is closed")]
    Closed,
}

/// Orchestration platform API failures.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Platform API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Failed to decode platform response: {0}")]
    Decode(String),
}

/// Failures of kernel lifecycle operations.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("Provisioning failed: {0}")]
    Provision(#[from] PlatformError),

    #[error("Kernel at {host} not reachable after {attempts} attempts")]
    ReadinessTimeout { host: String, attempts: u32 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("No image configured for kernel kind {0}")]
    UnknownImage(String),

    #[error("Server is read-only")]
    ReadOnly,

    #[error("Replica error: {0}")]
    Replica(#[from] ReplicaError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_message_display() {
        let err = WireError::ShortMessage(3);
        assert!(err.to_string().contains("got 3"));
    }

    #[test]
    fn test_platform_error_converts_to_provision() {
        let err: KernelError = PlatformError::Api {
            status: 500,
            message: "boom".to_string(),
        }
        .into();
        assert!(matches!(err, KernelError::Provision(_)));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_readiness_timeout_display() {
        let err = KernelError::ReadinessTimeout {
            host: "svc-doc-python".to_string(),
            attempts: 60,
        };
        assert!(err.to_string().contains("svc-doc-python"));
        assert!(err.to_string().contains("60"));
    }
}
