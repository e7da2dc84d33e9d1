//! Axum Middleware for Authentication
//!
//! This module provides Axum middleware that:
//! - Authenticates requests using access tokens
//! - Injects AuthContext into request extensions
//! - Returns 401 for unauthenticated requests
//!
//! Matching the token's application against the route happens in the entity
//! handlers, which know the path.

use crate::auth::{authenticate, AuthConfig, AuthContext};
use crate::error::ApiError;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

// ============================================================================
// MIDDLEWARE STATE
// ============================================================================

/// Shared state for authentication middleware.
#[derive(Debug, Clone)]
pub struct AuthMiddlewareState {
    pub auth_config: Arc<AuthConfig>,
}

impl AuthMiddlewareState {
    pub fn from_shared(auth_config: Arc<AuthConfig>) -> Self {
        Self { auth_config }
    }
}

// ============================================================================
// MIDDLEWARE FUNCTION
// ============================================================================

/// Axum middleware for bearer-token authentication.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use axum::{Router, middleware};
/// use dictum_api::middleware::{auth_middleware, AuthMiddlewareState};
/// use dictum_api::AuthConfig;
///
/// let auth_state = AuthMiddlewareState::from_shared(Arc::new(AuthConfig::from_env()));
///
/// let app = Router::new()
///     .route("/:app_id/:entity/:action", axum::routing::post(|| async { "OK" }))
///     .layer(middleware::from_fn_with_state(auth_state, auth_middleware));
/// ```
pub async fn auth_middleware(
    State(state): State<AuthMiddlewareState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthMiddlewareError> {
    let auth_header = request
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok());

    let auth_context = authenticate(&state.auth_config, auth_header).map_err(|e| {
        tracing::debug!(code = %e.code, "Authentication rejected");
        AuthMiddlewareError(e)
    })?;

    request.extensions_mut().insert(auth_context);
    Ok(next.run(request).await)
}

// ============================================================================
// ERROR HANDLING
// ============================================================================

/// Error wrapper for middleware that implements IntoResponse.
#[derive(Debug)]
pub struct AuthMiddlewareError(pub ApiError);

impl IntoResponse for AuthMiddlewareError {
    fn into_response(self) -> Response {
        self.0.into_response()
    }
}

// ============================================================================
// TYPED EXTRACTOR
// ============================================================================

/// Typed Axum extractor for authentication context.
///
/// The `auth_middleware` must be applied to the route for this extractor to
/// succeed; without it the extractor answers 500.
#[derive(Debug, Clone)]
pub struct AuthExtractor(pub AuthContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthExtractor
where
    S: Send + Sync,
{
    type Rejection = AuthMiddlewareError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .map(AuthExtractor)
            .ok_or_else(|| {
                AuthMiddlewareError(ApiError::internal_error(
                    "AuthContext not found in request extensions. \
                     Ensure auth_middleware is applied to this route.",
                ))
            })
    }
}

impl std::ops::Deref for AuthExtractor {
    type Target = AuthContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
