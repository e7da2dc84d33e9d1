//! Entity REST API Routes
//!
//! One handler serves every entity and action:
//!
//! - `POST /{app_id}/{entity}/{action}[/{subname}]` behind the auth middleware
//! - `POST /public/{app_id}/{entity}/{action}[/{subname}]` anonymous, gated by
//!   the entity's public access flags and allow-set
//!
//! The body is a request envelope, or `{FileProcessId, ParentKeys}` for
//! `import`. A cancelled call answers `204`; a call the engine declined to
//! run answers `200 null`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use dictum_core::{AggregatedResult, ImportRequest, Operation, Outcome, RequestEnvelope};

use crate::{
    auth::check_app_access,
    engine::ExecContext,
    error::{ApiError, ApiResult},
    middleware::AuthExtractor,
    state::AppState,
};

// ============================================================================
// PATH
// ============================================================================

/// Path segments shared by the authenticated and public routes.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityPath {
    pub app_id: String,
    pub entity: String,
    pub action: String,
    #[serde(default)]
    pub subname: Option<String>,
}

impl EntityPath {
    fn operation(&self) -> ApiResult<Operation> {
        self.action
            .parse()
            .map_err(|e: dictum_core::UnknownOperation| ApiError::invalid_input(e.to_string()))
    }
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /{app_id}/{entity}/{action} - Run an operation on an entity
#[utoipa::path(
    post,
    path = "/{app_id}/{entity}/{action}",
    tag = "Entities",
    params(
        ("app_id" = String, Path, description = "Application id"),
        ("entity" = String, Path, description = "Entity name"),
        ("action" = String, Path, description = "get, insert, update, delete, lookup, view, proc, process, action or import"),
    ),
    request_body = RequestEnvelope,
    responses(
        (status = 200, description = "Operation result, null when not performed", body = AggregatedResult),
        (status = 204, description = "Operation cancelled"),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 403, description = "Token issued for another application", body = ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn entity_action(
    State(state): State<AppState>,
    AuthExtractor(auth): AuthExtractor,
    Path(path): Path<EntityPath>,
    Json(body): Json<JsonValue>,
) -> ApiResult<Response> {
    check_app_access(&auth, &path.app_id)?;
    dispatch(&state, path, body).await
}

/// POST /public/{app_id}/{entity}/{action} - Anonymous operation on an entity
#[utoipa::path(
    post,
    path = "/public/{app_id}/{entity}/{action}",
    tag = "Entities",
    params(
        ("app_id" = String, Path, description = "Application id"),
        ("entity" = String, Path, description = "Entity name"),
        ("action" = String, Path, description = "Operation name"),
    ),
    request_body = RequestEnvelope,
    responses(
        (status = 200, description = "Operation result, null when not performed", body = AggregatedResult),
        (status = 204, description = "Operation cancelled"),
        (status = 403, description = "Not open to anonymous callers", body = ApiError),
    ),
)]
pub async fn public_entity_action(
    State(state): State<AppState>,
    Path(path): Path<EntityPath>,
    Json(body): Json<JsonValue>,
) -> ApiResult<Response> {
    let operation = path.operation()?;
    let allowed = state
        .registry
        .resolve(&path.entity)
        .map(|instance| {
            instance
                .definition()
                .allows_public(operation, path.subname.as_deref())
        })
        .unwrap_or(false);
    if !allowed {
        tracing::warn!(
            app_id = %path.app_id,
            entity = %path.entity,
            operation = %operation,
            subname = ?path.subname,
            "Anonymous call refused"
        );
        return Err(ApiError::forbidden(format!(
            "{} on {} is not public",
            operation, path.entity
        )));
    }
    dispatch(&state, path, body).await
}

// ============================================================================
// DISPATCH
// ============================================================================

async fn dispatch(state: &AppState, path: EntityPath, body: JsonValue) -> ApiResult<Response> {
    let operation = path.operation()?;
    let ctx = ExecContext::new(&path.app_id).with_timeout(state.request_timeout);
    let entity = path.entity.as_str();
    let subname = path.subname.as_deref();
    tracing::debug!(
        app_id = %path.app_id,
        entity = %entity,
        operation = %operation,
        subname = ?subname,
        "Dispatching entity request"
    );

    if operation == Operation::Import {
        let request: ImportRequest = serde_json::from_value(body)?;
        let outcome = state.importer.run(&ctx, entity, subname, &request).await?;
        return Ok(respond(outcome.map(|report| report.summary)));
    }

    let envelope: RequestEnvelope = serde_json::from_value(body)?;
    let response = match operation {
        Operation::Get => respond(state.engine.get(&ctx, entity, &envelope).await?),
        Operation::Lookup => respond(state.engine.lookup(&ctx, entity, &envelope).await?),
        Operation::View | Operation::Proc => respond(
            state
                .engine
                .query(&ctx, entity, operation, subname, &envelope)
                .await?,
        ),
        _ => respond(
            state
                .engine
                .execute(&ctx, entity, operation, subname, &envelope)
                .await?,
        ),
    };
    Ok(response)
}

fn respond<T: Serialize>(outcome: Outcome<T>) -> Response {
    match outcome {
        Outcome::Completed(body) => (StatusCode::OK, Json(body)).into_response(),
        Outcome::Cancelled => StatusCode::NO_CONTENT.into_response(),
        Outcome::NotPerformed => (StatusCode::OK, Json(JsonValue::Null)).into_response(),
    }
}

// ============================================================================
// ROUTERS
// ============================================================================

/// Authenticated entity routes. The caller layers the auth middleware on.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/:app_id/:entity/:action", post(entity_action))
        .route("/:app_id/:entity/:action/:subname", post(entity_action))
}

/// Anonymous entity routes, nested under `/public`.
pub fn create_public_router() -> Router<AppState> {
    Router::new()
        .route("/:app_id/:entity/:action", post(public_entity_action))
        .route("/:app_id/:entity/:action/:subname", post(public_entity_action))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    fn path(action: &str) -> EntityPath {
        EntityPath {
            app_id: "crm".to_string(),
            entity: "Customer".to_string(),
            action: action.to_string(),
            subname: None,
        }
    }

    #[test]
    fn test_action_segment_parses_case_insensitively() {
        assert_eq!(path("Insert").operation().unwrap(), Operation::Insert);
        assert_eq!(path("proc").operation().unwrap(), Operation::Proc);
    }

    #[test]
    fn test_unknown_action_is_bad_request() {
        let err = path("upsert").operation().unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cancelled_is_no_content() {
        let response = respond::<JsonValue>(Outcome::Cancelled);
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_not_performed_is_null() {
        let response = respond::<JsonValue>(Outcome::NotPerformed);
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"null");
    }
}
