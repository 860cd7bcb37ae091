//! Health check handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub components: Vec<ComponentHealth>,
}

/// Component health status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Health of the sync gateway, the kernel orchestrator and the store.
///
/// GET /health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let store = match state.store.list_kernels().await {
        Ok(_) => ComponentHealth {
            name: "store".to_string(),
            status: HealthStatus::Healthy,
            message: None,
        },
        Err(e) => ComponentHealth {
            name: "store".to_string(),
            status: HealthStatus::Unhealthy,
            message: Some(e.to_string()),
        },
    };
    let components = vec![
        ComponentHealth {
            name: "sync".to_string(),
            status: HealthStatus::Healthy,
            message: Some(format!(
                "{} documents resident, {} connections",
                state.registry.resident_documents().len(),
                state.open_connections()
            )),
        },
        ComponentHealth {
            name: "kernels".to_string(),
            status: HealthStatus::Healthy,
            message: Some(format!(
                "{} running",
                state.orchestrator.descriptors().await.len()
            )),
        },
        store,
    ];

    let status = if components.iter().any(|c| c.status == HealthStatus::Unhealthy) {
        HealthStatus::Unhealthy
    } else if components.iter().any(|c| c.status == HealthStatus::Degraded) {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime().as_secs(),
        components,
    })
}

/// Liveness probe.
///
/// GET /livez
pub async fn liveness_probe() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "alive" }))
}
