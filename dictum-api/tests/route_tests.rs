//! Router-level tests for the DICTUM API.
//!
//! Every request goes through the full router built by `create_api_router`:
//! auth middleware, public gating, dispatch, and the response mapping for
//! completed, cancelled and declined calls.

mod support;

use axum::http::StatusCode;
use serde_json::json;

use dictum_test_utils::codes;
use dictum_test_utils::fixtures::{self, APP_ID, CUSTOMER, TENANT_ID};
use support::{TestApp, TEST_API_KEY};

// ============================================================================
// HEALTH
// ============================================================================

#[tokio::test]
async fn test_liveness() {
    let app = TestApp::new();
    let (status, body) = app.get("/health/live").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_readiness_reports_database() {
    let app = TestApp::new();
    let (status, body) = app.get("/health/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["details"]["database"]["status"], "healthy");

    app.db.set_unavailable(true);
    let (status, body) = app.get("/health/ready").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
}

#[tokio::test]
async fn test_openapi_document_served() {
    let app = TestApp::new();
    let (status, body) = app.get("/openapi.json").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"].get("/{app_id}/{entity}/{action}").is_some());
}

// ============================================================================
// AUTHENTICATED ENTITY ROUTES
// ============================================================================

#[tokio::test]
async fn test_insert_returns_autonum() {
    let app = TestApp::new();
    let token = app.token();
    let (status, body) = app
        .post(
            "/crm/Customer/insert",
            Some(&token),
            json!({"Values": {"Name": "Initech"}}),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Failed"], false);
    assert_eq!(body["AutonumReturned"], true);
    assert_eq!(body["Results"][0]["StatusCode"], codes::AUTONUM);

    let stored = app
        .db
        .rows(CUSTOMER)
        .into_iter()
        .find(|r| r.get("Name") == Some(&json!("Initech")))
        .expect("row inserted");
    assert_eq!(stored.get("TenantId"), Some(&json!(TENANT_ID)));
    assert_eq!(stored.get("Status"), Some(&json!("new")));
}

#[tokio::test]
async fn test_batch_insert_reports_each_record() {
    let app = TestApp::new();
    let token = app.token();
    let (status, body) = app
        .post(
            "/crm/Customer/insert",
            Some(&token),
            json!({
                "Values": {"Status": "lead"},
                "RecordsSelection": [{"Name": "A"}, {"Name": "B"}, {"Name": "C"}]
            }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Results"].as_array().map(Vec::len), Some(3));
    assert_eq!(app.db.opened(), 1);
    assert_eq!(app.db.open_connections(), 0);
    let leads = app
        .db
        .rows(CUSTOMER)
        .into_iter()
        .filter(|r| r.get("Status") == Some(&json!("lead")))
        .count();
    assert_eq!(leads, 3);
}

#[tokio::test]
async fn test_get_and_lookup() {
    let app = TestApp::new();
    let token = app.token();

    let (status, body) = app
        .post("/crm/Customer/get", Some(&token), json!({"Values": {"Id": 100}}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Name"], "Acme");

    let (status, body) = app
        .post("/crm/Customer/lookup", Some(&token), json!({"Values": {"Id": 101}}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Description"], "Globex");
}

#[tokio::test]
async fn test_proc_returns_blocks() {
    let app = TestApp::new();
    let token = app.token();
    let (status, body) = app
        .post("/crm/Customer/proc/Recalc", Some(&token), json!({"Values": {"Id": 100}}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["Header"], json!(["Id", "Total"]));
    assert_eq!(body[0]["records"][0][0], 100);
}

#[tokio::test]
async fn test_unknown_entity_answers_null() {
    let app = TestApp::new();
    let token = app.token();
    let (status, body) = app
        .post("/crm/Invoice/insert", Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_null());
    assert_eq!(app.db.opened(), 0);
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let app = TestApp::new();
    let (status, body) = app.post("/crm/Customer/get", None, json!({})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_garbage_token_is_unauthorized() {
    let app = TestApp::new();
    let (status, _) = app
        .post("/crm/Customer/get", Some("not-a-jwt"), json!({}))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_token_for_other_app_is_forbidden() {
    let app = TestApp::new();
    let token = app.token_for("billing");
    let (status, _) = app
        .post("/crm/Customer/get", Some(&token), json!({"Values": {"Id": 100}}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(app.db.opened(), 0);
}

#[tokio::test]
async fn test_unknown_action_is_bad_request() {
    let app = TestApp::new();
    let token = app.token();
    let (status, _) = app
        .post("/crm/Customer/upsert", Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unavailable_database_is_service_unavailable() {
    let app = TestApp::new();
    app.db.set_unavailable(true);
    let token = app.token();
    let (status, body) = app
        .post("/crm/Customer/insert", Some(&token), json!({"Values": {"Name": "X"}}))
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "SERVICE_UNAVAILABLE");
    assert!(body.get("Results").is_none());
    assert_eq!(app.db.opened(), 0);
}

// ============================================================================
// PUBLIC ENTITY ROUTES
// ============================================================================

#[tokio::test]
async fn test_public_get_allowed() {
    let app = TestApp::new();
    let (status, body) = app
        .post("/public/crm/Customer/get", None, json!({"Values": {"Id": 100}}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Name"], "Acme");
}

#[tokio::test]
async fn test_public_view_in_allow_set() {
    let app = TestApp::new();
    let (status, body) = app
        .post("/public/crm/Customer/view/Active", None, json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["records"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn test_public_write_is_forbidden() {
    let app = TestApp::new();
    let (status, _) = app
        .post("/public/crm/Customer/insert", None, json!({"Values": {"Name": "X"}}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(app.db.opened(), 0);
}

#[tokio::test]
async fn test_public_proc_outside_allow_set_is_forbidden() {
    let app = TestApp::new();
    let (status, _) = app
        .post("/public/crm/Customer/proc/Recalc", None, json!({}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_public_unknown_entity_is_forbidden() {
    let app = TestApp::new();
    let (status, _) = app
        .post("/public/crm/Invoice/get", None, json!({}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_public_unknown_action_is_bad_request() {
    let app = TestApp::new();
    let (status, _) = app
        .post("/public/crm/Customer/upsert", None, json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ============================================================================
// SESSION ROUTES
// ============================================================================

async fn post_with_key(
    app: &TestApp,
    uri: &str,
    key: Option<&str>,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let mut builder = axum::http::Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("x-api-key", key);
    }
    let request = builder
        .body(axum::body::Body::from(body.to_string()))
        .unwrap();
    support::send(&app.router, request).await
}

#[tokio::test]
async fn test_token_requires_api_key() {
    let app = TestApp::new();
    let body = json!({"AppId": APP_ID, "UserId": "u1"});

    let (status, _) = post_with_key(&app, "/auth/token", None, body.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = post_with_key(&app, "/auth/token", Some("wrong"), body.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, session) = post_with_key(&app, "/auth/token", Some(TEST_API_KEY), body).await;
    assert_eq!(status, StatusCode::OK);
    assert!(session["AccessToken"].as_str().is_some_and(|t| !t.is_empty()));
    assert_eq!(session["Claims"]["app_id"], APP_ID);
}

#[tokio::test]
async fn test_token_rejects_blank_user() {
    let app = TestApp::new();
    let (status, body) = post_with_key(
        &app,
        "/auth/token",
        Some(TEST_API_KEY),
        json!({"AppId": APP_ID, "UserId": "  "}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "MISSING_FIELD");
}

#[tokio::test]
async fn test_issued_token_opens_entity_routes() {
    let app = TestApp::new();
    let (_, session) = post_with_key(
        &app,
        "/auth/token",
        Some(TEST_API_KEY),
        json!({"AppId": APP_ID, "UserId": "u1"}),
    )
    .await;
    let token = session["AccessToken"].as_str().unwrap().to_string();

    let (status, body) = app
        .post("/crm/Customer/get", Some(&token), json!({"Values": {"Id": 101}}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Name"], "Globex");
}

#[tokio::test]
async fn test_refresh_issues_new_session() {
    let app = TestApp::new();
    let session =
        dictum_api::issue_session(&app.state.auth_config, "u1", APP_ID, vec![]).unwrap();

    let (status, renewed) = app
        .post(
            "/auth/refresh",
            None,
            json!({"AccessToken": session.access_token, "RefreshToken": session.refresh_token}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(renewed["Claims"]["sub"], "u1");
}

#[tokio::test]
async fn test_refresh_rejects_access_token_as_refresh() {
    let app = TestApp::new();
    let session =
        dictum_api::issue_session(&app.state.auth_config, "u1", APP_ID, vec![]).unwrap();

    let (status, _) = app
        .post(
            "/auth/refresh",
            None,
            json!({"AccessToken": session.access_token, "RefreshToken": session.access_token}),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ============================================================================
// IMPORT
// ============================================================================

#[tokio::test]
async fn test_import_through_route() {
    let app = TestApp::new();
    let dir = tempfile::tempdir().unwrap();
    fixtures::assign_file_guid(&app.db, "guid-1");
    fixtures::stored_file(&dir, &app.files, "guid-1", "csv", b"Name,Status\nWayne,vip\n,vip\nStark,vip\n");
    let token = app.token();

    let (status, body) = app
        .post(
            "/crm/Customer/import/ImportCustomers",
            Some(&token),
            json!({"FileProcessId": "fp-1", "ParentKeys": null}),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ProcessedCount"], 3);
    assert_eq!(body["SuccessCount"], 2);
    assert!(body["Errors"].get("2").is_some());

    let process = app.db.rows(fixtures::IMPORT_PROCESS);
    assert_eq!(process[0].get("Status"), Some(&json!("Completed")));
}

#[tokio::test]
async fn test_import_without_file_answers_null() {
    let app = TestApp::new();
    fixtures::assign_file_guid(&app.db, "guid-missing");
    let token = app.token();

    let (status, body) = app
        .post(
            "/crm/Customer/import/ImportCustomers",
            Some(&token),
            json!({"FileProcessId": "fp-2"}),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.is_null());
    let process = app.db.rows(fixtures::IMPORT_PROCESS);
    assert_eq!(process[0].get("Status"), Some(&json!("Error")));
}
