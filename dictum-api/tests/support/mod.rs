//! Shared helpers for DICTUM API integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

use dictum_api::auth::{test_clocks, JwtSecret};
use dictum_api::{create_api_router, issue_session, ApiConfig, AppState, AuthConfig};
use dictum_test_utils::fixtures::{self, APP_ID, IMPORT_PROCESS};
use dictum_test_utils::{InMemoryFileStorage, MemoryDatabase};

pub const TEST_API_KEY: &str = "test_key_123";

/// Auth configuration with a fixed clock and one API key.
pub fn test_auth_config() -> AuthConfig {
    let mut config = AuthConfig {
        jwt_secret: JwtSecret::new("test_secret".to_string()).expect("non-empty secret"),
        clock: Arc::new(test_clocks::valid()),
        ..AuthConfig::default()
    };
    config.add_api_key(TEST_API_KEY.to_string());
    config
}

/// Everything a test needs to drive the router and inspect the backend.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub db: MemoryDatabase,
    pub files: Arc<InMemoryFileStorage>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let db = fixtures::seeded_database();
        let files = Arc::new(InMemoryFileStorage::new());
        let state = AppState::new(
            fixtures::sample_registry(),
            Arc::new(db.clone()),
            Arc::new(fixtures::sample_app_keys()),
            files.clone(),
            test_auth_config(),
            IMPORT_PROCESS,
        )
        .with_request_timeout(timeout);
        let router =
            create_api_router(state.clone(), &ApiConfig::default()).expect("router builds");
        Self {
            router,
            state,
            db,
            files,
        }
    }

    /// Bearer token for `app_id`.
    pub fn token_for(&self, app_id: &str) -> String {
        issue_session(&self.state.auth_config, "tester", app_id, vec![])
            .expect("session issued")
            .access_token
    }

    pub fn token(&self) -> String {
        self.token_for(APP_ID)
    }

    /// POST `body` to `uri`, optionally with a bearer token.
    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let request = builder
            .body(Body::from(body.to_string()))
            .expect("request builds");
        send(&self.router, request).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("request builds");
        send(&self.router, request).await
    }
}

/// Run one request; an empty body reads as `Value::Null`.
pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("router is infallible");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}
