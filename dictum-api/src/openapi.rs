//! OpenAPI Specification for DICTUM API
//!
//! The OpenAPI document for the DICTUM REST API, generated by utoipa from
//! the route annotations and the wire types in `dictum-core`.

use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::auth::SessionTokens;
use crate::error::{ApiError, ErrorCode};
use crate::routes::{
    auth::{self as auth_routes, RefreshRequest, TokenRequest},
    entity,
    health::{self, ComponentHealth, HealthDetails, HealthResponse, HealthStatus},
};

use dictum_core::{
    AggregatedResult, DbStatus, ImportRequest, ImportStatus, ImportSummary, LookupResult,
    Operation, RequestEnvelope, TabularBlock,
};

/// OpenAPI document for DICTUM API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "DICTUM API",
        version = "0.4.0",
        description = "Metadata-driven entity operations: get, insert, update, delete, lookup, views, procedures, actions and file import",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT"),
    ),
    servers(
        (url = "http://localhost:3000", description = "Local Development")
    ),
    tags(
        (name = "Entities", description = "Operations on dictionary-defined entities"),
        (name = "Auth", description = "Session issue and renewal"),
        (name = "Health", description = "Liveness and readiness probes")
    ),
    paths(
        entity::entity_action,
        entity::public_entity_action,
        auth_routes::issue_token,
        auth_routes::refresh_token,
        health::liveness,
        health::readiness,
    ),
    components(
        schemas(
            ApiError, ErrorCode,
            RequestEnvelope, ImportRequest,
            AggregatedResult, DbStatus, TabularBlock, LookupResult, ImportSummary,
            ImportStatus, Operation,
            TokenRequest, RefreshRequest, SessionTokens,
            HealthResponse, HealthStatus, HealthDetails, ComponentHealth
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Security scheme modifier for OpenAPI document.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "api_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-API-Key"))),
            );
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some("Access token from /auth/token"))
                        .build(),
                ),
            );
        }
    }
}

impl ApiDoc {
    /// Generate OpenAPI spec as JSON string.
    pub fn to_json() -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::openapi())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_generation() -> Result<(), String> {
        let openapi = ApiDoc::openapi();
        assert_eq!(openapi.info.title, "DICTUM API");

        let components = openapi
            .components
            .as_ref()
            .ok_or_else(|| "OpenAPI components missing".to_string())?;
        assert!(components.security_schemes.contains_key("api_key"));
        assert!(components.security_schemes.contains_key("bearer_auth"));
        assert!(components.schemas.contains_key("RequestEnvelope"));
        Ok(())
    }

    #[test]
    fn test_openapi_paths_exist() {
        let openapi = ApiDoc::openapi();
        let paths = &openapi.paths.paths;
        assert!(paths.contains_key("/{app_id}/{entity}/{action}"));
        assert!(paths.contains_key("/public/{app_id}/{entity}/{action}"));
        assert!(paths.contains_key("/auth/token"));
        assert!(paths.contains_key("/health/ready"));
    }

    #[test]
    fn test_openapi_json_serialization() -> Result<(), String> {
        let json = ApiDoc::to_json().map_err(|e| format!("Failed to serialize OpenAPI: {}", e))?;
        serde_json::from_str::<serde_json::Value>(&json)
            .map_err(|e| format!("Generated JSON invalid: {}", e))?;
        assert!(json.contains("DICTUM API"));
        Ok(())
    }
}
