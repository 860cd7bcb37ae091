//! # cellsync API
//!
//! External surface of a cellsync server:
//! - **Sync**: the WebSocket gateway to replicated documents
//! - **Kernels**: start, stop, probe, interrupt and execute routes
//! - **Documents**: result clearing and snapshot export
//! - **Health**: detailed health and liveness probes
//!
//! Every document route resolves the caller's permission through
//! [`AccessControl`](cellsync_protocols::AccessControl) before acting.

pub mod access;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod health;
pub mod routes;
pub mod server;
pub mod state;
pub mod websocket;

pub use access::MetadataAccessControl;
pub use error::ApiError;
pub use routes::create_router;
pub use server::{ApiServer, ServerConfig};
pub use state::AppState;
