//! Session REST API Routes
//!
//! - `POST /auth/token` exchanges an API key for a session
//! - `POST /auth/refresh` renews a session from its refresh token

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::{
    auth::{issue_session, refresh_session, AuthConfig, SessionTokens},
    error::{ApiError, ApiResult},
    state::AppState,
};

// ============================================================================
// TYPES
// ============================================================================

/// Request to open a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "PascalCase")]
pub struct TokenRequest {
    pub app_id: String,
    pub user_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Request to renew a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "PascalCase")]
pub struct RefreshRequest {
    pub access_token: String,
    pub refresh_token: String,
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /auth/token - Open a session
#[utoipa::path(
    post,
    path = "/auth/token",
    tag = "Auth",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Session issued", body = SessionTokens),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 401, description = "Missing or unknown API key", body = ApiError),
    ),
    security(
        ("api_key" = [])
    )
)]
pub async fn issue_token(
    State(config): State<Arc<AuthConfig>>,
    headers: HeaderMap,
    Json(req): Json<TokenRequest>,
) -> ApiResult<Json<SessionTokens>> {
    let api_key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("X-API-Key header required"))?;
    if !config.is_valid_api_key(api_key) {
        return Err(ApiError::unauthorized("Invalid API key"));
    }
    if req.app_id.trim().is_empty() {
        return Err(ApiError::missing_field("AppId"));
    }
    if req.user_id.trim().is_empty() {
        return Err(ApiError::missing_field("UserId"));
    }

    let session = issue_session(&config, &req.user_id, &req.app_id, req.roles)?;
    tracing::info!(app_id = %req.app_id, user_id = %req.user_id, "Session issued");
    Ok(Json(session))
}

/// POST /auth/refresh - Renew a session
#[utoipa::path(
    post,
    path = "/auth/refresh",
    tag = "Auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Session renewed", body = SessionTokens),
        (status = 401, description = "Refresh token rejected", body = ApiError),
    ),
)]
pub async fn refresh_token(
    State(config): State<Arc<AuthConfig>>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<Json<SessionTokens>> {
    let session = refresh_session(&config, &req.access_token, &req.refresh_token)?;
    tracing::debug!(expires_at = %session.expires_at_utc, "Session renewed");
    Ok(Json(session))
}

// ============================================================================
// ROUTER
// ============================================================================

/// Session routes (no auth middleware).
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/token", post(issue_token))
        .route("/refresh", post(refresh_token))
}
