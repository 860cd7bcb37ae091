//! Kernel and document route handlers.
//!
//! - POST   /documents/{id}/kernels/{kind}            - Start kernel
//! - DELETE /documents/{id}/kernels/{kind}            - Stop kernel
//! - POST   /documents/{id}/kernels/{kind}/status     - Probe kernel status
//! - POST   /documents/{id}/kernels/{kind}/interrupt  - Interrupt execution
//! - POST   /documents/{id}/kernels/{kind}/usage      - Refresh resource usage
//! - POST   /documents/{id}/kernels/{kind}/execute    - Run code
//! - DELETE /documents/{id}/results/{request_id}      - Clear an execution result
//! - GET    /documents/{id}/snapshot                  - Export the stored snapshot
//! - GET    /kernels                                  - List running kernels

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use cellsync_kernel::KernelDescriptor;
use cellsync_protocols::{DocumentId, KernelKey, KernelKind, Permission};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

use crate::auth::{TokenQuery, access_token, authorize, require_user};
use crate::error::ApiError;
use crate::state::AppState;

/// Body of an execute request.
#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Response of an execute request.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub accepted: bool,
    pub request_id: String,
}

/// Response for listing kernels.
#[derive(Debug, Serialize)]
pub struct KernelListResponse {
    pub count: usize,
    pub kernels: Vec<KernelDescriptor>,
}

fn kernel_key(document: &str, kind: &str) -> Result<KernelKey, ApiError> {
    Ok(KernelKey::new(DocumentId::parse(document)?, kind.parse::<KernelKind>()?))
}

/// Parse the key and check write permission on its document.
async fn writable_kernel(
    state: &AppState,
    document: &str,
    kind: &str,
    query: &TokenQuery,
    headers: &HeaderMap,
) -> Result<KernelKey, ApiError> {
    let key = kernel_key(document, kind)?;
    let token = access_token(query, headers);
    authorize(state, &key.document, token.as_deref(), Permission::Write).await?;
    Ok(key)
}

/// POST /documents/{id}/kernels/{kind}
pub async fn start_kernel(
    State(state): State<Arc<AppState>>,
    Path((document, kind)): Path<(String, String)>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let key = writable_kernel(&state, &document, &kind, &query, &headers).await?;
    let token = access_token(&query, &headers);
    let owner = require_user(&state, token.as_deref()).await?;

    info!("Start of {} requested by {}", key, owner);
    let started = state.orchestrator.start(&key, &owner).await?;
    Ok(Json(json!({ "started": started })))
}

/// DELETE /documents/{id}/kernels/{kind}
pub async fn stop_kernel(
    State(state): State<Arc<AppState>>,
    Path((document, kind)): Path<(String, String)>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let key = writable_kernel(&state, &document, &kind, &query, &headers).await?;
    let stopped = state.orchestrator.stop(&key).await?;
    Ok(Json(json!({ "stopped": stopped })))
}

/// POST /documents/{id}/kernels/{kind}/status
pub async fn kernel_status(
    State(state): State<Arc<AppState>>,
    Path((document, kind)): Path<(String, String)>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let key = writable_kernel(&state, &document, &kind, &query, &headers).await?;
    let running = state.orchestrator.status(&key).await?;
    Ok(Json(json!({ "running": running })))
}

/// POST /documents/{id}/kernels/{kind}/interrupt
pub async fn interrupt_kernel(
    State(state): State<Arc<AppState>>,
    Path((document, kind)): Path<(String, String)>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let key = writable_kernel(&state, &document, &kind, &query, &headers).await?;
    let interrupted = state.orchestrator.interrupt(&key).await?;
    Ok(Json(json!({ "interrupted": interrupted })))
}

/// POST /documents/{id}/kernels/{kind}/usage
pub async fn kernel_usage(
    State(state): State<Arc<AppState>>,
    Path((document, kind)): Path<(String, String)>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let key = writable_kernel(&state, &document, &kind, &query, &headers).await?;
    let updated = state.orchestrator.usage_status(&key).await?;
    Ok(Json(json!({ "updated": updated })))
}

/// POST /documents/{id}/kernels/{kind}/execute
pub async fn execute_code(
    State(state): State<Arc<AppState>>,
    Path((document, kind)): Path<(String, String)>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let key = writable_kernel(&state, &document, &kind, &query, &headers).await?;
    let request_id = request
        .request_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let accepted = state
        .orchestrator
        .execute(&key, &request.code, &request_id)
        .await?;
    Ok(Json(ExecuteResponse {
        accepted,
        request_id,
    }))
}

/// DELETE /documents/{id}/results/{request_id}
pub async fn clear_result(
    State(state): State<Arc<AppState>>,
    Path((document, request_id)): Path<(String, String)>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let document = DocumentId::parse(document)?;
    let token = access_token(&query, &headers);
    authorize(&state, &document, token.as_deref(), Permission::Write).await?;

    let cleared = state.orchestrator.clear_result(&document, &request_id).await?;
    Ok(Json(json!({ "cleared": cleared })))
}

/// GET /documents/{id}/snapshot
///
/// A resident document is flushed first so the export includes its latest state.
pub async fn export_snapshot(
    State(state): State<Arc<AppState>>,
    Path(document): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let document = DocumentId::parse(document)?;
    let token = access_token(&query, &headers);
    authorize(&state, &document, token.as_deref(), Permission::Read).await?;

    state.registry.flush_now(&document).await?;
    let snapshot = state
        .store
        .load_snapshot(&document)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("snapshot of {}", document)))?;
    Ok(([(CONTENT_TYPE, "application/octet-stream")], snapshot).into_response())
}

/// GET /kernels
///
/// Only kernels of documents the caller can read are listed.
pub async fn list_kernels(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<Json<KernelListResponse>, ApiError> {
    let token = access_token(&query, &headers).ok_or(ApiError::Unauthorized)?;
    let mut kernels = Vec::new();
    for descriptor in state.orchestrator.descriptors().await {
        if state
            .access
            .permission(&descriptor.document, &token)
            .await
            .can_read()
        {
            kernels.push(descriptor);
        }
    }
    Ok(Json(KernelListResponse {
        count: kernels.len(),
        kernels,
    }))
}
