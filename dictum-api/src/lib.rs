//! DICTUM API - Entity Operations over HTTP
//!
//! Serves dictionary-defined entities through one route shape,
//! `POST /{app_id}/{entity}/{action}[/{subname}]`, with an anonymous
//! `public/` variant. Requests run through the batch engine, which merges
//! request values over column defaults and application keys and executes
//! each record on one pooled connection. Uploaded files are imported by the
//! import pipeline.
//!
//! Database commands go to server-side PostgreSQL functions; this crate
//! generates no SQL.

pub mod auth;
pub mod config;
pub mod db;
pub mod dictionary;
pub mod engine;
pub mod error;
pub mod import;
pub mod macros;
pub mod middleware;
pub mod openapi;
pub mod parsers;
pub mod routes;
pub mod state;
pub mod telemetry;

// Re-export commonly used types
pub use auth::{
    authenticate, check_app_access, issue_session, refresh_session, validate_token, AuthConfig,
    AuthContext, Claims, SessionTokens, TokenType,
};
pub use config::{ApiConfig, ImportConfig};
pub use db::{DbConfig, PgConnectionFactory};
pub use dictionary::{load_dictionary, parse_dictionary, Dictionary};
pub use engine::{BatchEngine, ExecContext};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use import::{process_definition, ImportPipeline, ImportReport};
pub use middleware::{auth_middleware, AuthExtractor, AuthMiddlewareState};
pub use openapi::ApiDoc;
pub use routes::create_api_router;
pub use state::AppState;
