//! Access token extraction and permission checks.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use cellsync_protocols::{DocumentId, Permission, UserId};
use serde::Deserialize;
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

/// `?token=` query parameter.
#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// Token from the query string, falling back to a bearer `Authorization` header.
pub fn access_token(query: &TokenQuery, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = query.token.as_deref().filter(|t| !t.is_empty()) {
        return Some(token.to_string());
    }
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Resolve the permission of `token` on `document`, failing unless it reaches `required`.
///
/// Documents without an access record are reported as not found.
pub async fn authorize(
    state: &AppState,
    document: &DocumentId,
    token: Option<&str>,
    required: Permission,
) -> Result<Permission, ApiError> {
    let token = token.ok_or(ApiError::Unauthorized)?;
    if required == Permission::Write && state.orchestrator.settings().read_only {
        return Err(ApiError::ReadOnly);
    }

    let permission = state.access.permission(document, token).await;
    if permission >= required {
        return Ok(permission);
    }
    if permission == Permission::None && state.store.document_access(document).await?.is_none() {
        return Err(ApiError::NotFound(document.to_string()));
    }
    debug!("Denied {:?} access to {}", required, document);
    Err(ApiError::Forbidden)
}

/// User behind a token, required to attribute kernels.
pub async fn require_user(state: &AppState, token: Option<&str>) -> Result<UserId, ApiError> {
    let token = token.ok_or(ApiError::Unauthorized)?;
    state.access.user(token).await.ok_or(ApiError::Unauthorized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn query(token: Option<&str>) -> TokenQuery {
        TokenQuery {
            token: token.map(str::to_string),
        }
    }

    #[test]
    fn test_query_token_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer header-token"));
        assert_eq!(
            access_token(&query(Some("query-token")), &headers).as_deref(),
            Some("query-token")
        );
    }

    #[test]
    fn test_bearer_header_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer header-token"));
        assert_eq!(
            access_token(&query(Some("")), &headers).as_deref(),
            Some("header-token")
        );
    }

    #[test]
    fn test_missing_or_malformed_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(access_token(&query(None), &headers), None);
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(access_token(&query(None), &headers), None);
    }
}
