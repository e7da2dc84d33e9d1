//! REST API Routes Module
//!
//! Includes:
//! - Entity routes, authenticated and anonymous (`/public/...`)
//! - Session routes under `/auth`
//! - Health check endpoints (Kubernetes-compatible)
//! - The OpenAPI document at `/openapi.json`
//! - CORS support for browser-based clients

pub mod auth;
pub mod entity;
pub mod health;

use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, header::HeaderName, Method},
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};
use crate::middleware::{auth_middleware, AuthMiddlewareState};
use crate::openapi::ApiDoc;
use crate::state::AppState;

pub use auth::create_router as auth_router;
pub use entity::create_public_router as public_entity_router;
pub use entity::create_router as entity_router;
pub use health::create_router as health_router;

// ============================================================================
// OPENAPI ENDPOINT
// ============================================================================

/// Handler for /openapi.json endpoint.
async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

// ============================================================================
// PRODUCTION VALIDATION
// ============================================================================

/// Check if running in a production environment.
fn is_production_environment() -> bool {
    std::env::var("DICTUM_ENVIRONMENT")
        .map(|e| matches!(e.to_lowercase().as_str(), "production" | "prod"))
        .unwrap_or(false)
}

/// Validate API configuration for production use.
fn validate_api_config_for_production(config: &ApiConfig) -> ApiResult<()> {
    if config.cors_origins.is_empty() {
        return Err(ApiError::invalid_input(
            "CORS origins not configured for production. Set DICTUM_CORS_ORIGINS.",
        ));
    }
    Ok(())
}

// ============================================================================
// CORS LAYER
// ============================================================================

/// Build the CORS layer from ApiConfig.
///
/// With no configured origins every origin is allowed. Otherwise only the
/// configured origins match, `*.example.com` entries covering https
/// subdomains.
fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static("x-api-key"),
        ])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any).allow_headers(Any)
    } else {
        tracing::info!(origins = ?config.cors_origins, "CORS: restricting origins");
        let matcher = config.clone();
        let cors = cors.allow_origin(AllowOrigin::predicate(move |origin, _| {
            origin
                .to_str()
                .map(|o| matcher.is_origin_allowed(o))
                .unwrap_or(false)
        }));
        if config.cors_allow_credentials {
            cors.allow_credentials(true)
        } else {
            cors
        }
    }
}

// ============================================================================
// ROUTER
// ============================================================================

/// Create the complete API router.
///
/// - `/{app_id}/{entity}/{action}[/{subname}]` behind bearer auth
/// - `/public/{app_id}/{entity}/{action}[/{subname}]` anonymous
/// - `/auth/token`, `/auth/refresh`
/// - `/health/live`, `/health/ready`
/// - `/openapi.json`
///
/// Static first segments take priority over the `app_id` parameter, so
/// `public`, `auth` and `health` are not usable as application ids.
///
/// In production the auth and CORS settings are validated first.
pub fn create_api_router(state: AppState, api_config: &ApiConfig) -> ApiResult<Router> {
    if is_production_environment() {
        state.auth_config.validate_for_production()?;
        validate_api_config_for_production(api_config)?;
    }

    let auth_state = AuthMiddlewareState::from_shared(Arc::clone(&state.auth_config));
    let protected = entity::create_router().layer(from_fn_with_state(auth_state, auth_middleware));

    let router = Router::new()
        .merge(protected)
        .nest("/public", entity::create_public_router())
        .nest("/auth", auth::create_router())
        .nest("/health", health::create_router())
        .route("/openapi.json", get(openapi_json))
        .layer(DefaultBodyLimit::max(api_config.body_limit_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(api_config))
        .with_state(state);

    Ok(router)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_requires_cors_origins() {
        let config = ApiConfig::default();
        assert!(validate_api_config_for_production(&config).is_err());

        let config = ApiConfig {
            cors_origins: vec!["https://app.example.com".to_string()],
            ..ApiConfig::default()
        };
        assert!(validate_api_config_for_production(&config).is_ok());
    }

    #[test]
    fn test_cors_layer_builds_for_both_modes() {
        let _ = build_cors_layer(&ApiConfig::default());
        let _ = build_cors_layer(&ApiConfig {
            cors_origins: vec!["*.example.com".to_string()],
            cors_allow_credentials: true,
            ..ApiConfig::default()
        });
    }
}
