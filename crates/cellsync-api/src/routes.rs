//! HTTP route definitions.

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::health;
use crate::state::AppState;
use crate::websocket::sync_handler;

/// Create the main router.
///
/// ## Route Structure
///
/// ```text
/// /sync/{document_id}                                 - Sync WebSocket
///
/// /documents/{id}
///   POST   /kernels/{kind}            - Start kernel
///   DELETE /kernels/{kind}            - Stop kernel
///   POST   /kernels/{kind}/status     - Probe status
///   POST   /kernels/{kind}/interrupt  - Interrupt execution
///   POST   /kernels/{kind}/usage      - Refresh resource usage
///   POST   /kernels/{kind}/execute    - Run code
///   DELETE /results/{request_id}      - Clear an execution result
///   GET    /snapshot                  - Export the stored snapshot
///
/// /kernels - Running kernels
/// /health  - Detailed health check
/// /livez   - Liveness probe
/// ```
pub fn create_router(state: Arc<AppState>) -> Router {
    let document_routes = Router::new()
        .route(
            "/kernels/{kind}",
            post(handlers::start_kernel).delete(handlers::stop_kernel),
        )
        .route("/kernels/{kind}/status", post(handlers::kernel_status))
        .route("/kernels/{kind}/interrupt", post(handlers::interrupt_kernel))
        .route("/kernels/{kind}/usage", post(handlers::kernel_usage))
        .route("/kernels/{kind}/execute", post(handlers::execute_code))
        .route("/results/{request_id}", delete(handlers::clear_result))
        .route("/snapshot", get(handlers::export_snapshot))
        .with_state(state.clone());

    let monitoring_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/kernels", get(handlers::list_kernels))
        .with_state(state.clone());

    // Liveness probe has no state dependency
    let liveness_route = Router::new().route("/livez", get(health::liveness_probe));

    let sync_route = Router::new()
        .route("/sync/{document_id}", get(sync_handler))
        .with_state(state);

    Router::new()
        .nest("/documents/{id}", document_routes)
        .merge(monitoring_routes)
        .merge(liveness_route)
        .merge(sync_route)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
#[path = "routes_tests.rs"]
mod tests;
