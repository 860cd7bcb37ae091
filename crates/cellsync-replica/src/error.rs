//! Replica error types.

use cellsync_protocols::StoreError;
use thiserror::Error;

/// Errors raised while maintaining a replicated document.
#[derive(Debug, Error)]
pub enum ReplicaError {
    #[error("Failed to decode update: {0}")]
    Decode(String),

    #[error("Failed to apply update: {0}")]
    Apply(String),

    #[error("Write permission required")]
    PermissionDenied,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Persistence task for {0} has stopped")]
    Closed(String),
}

/// Transport-level errors in client frames. These close the connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Empty frame")]
    Empty,

    #[error("Malformed frame: {0}")]
    Malformed(String),
}
