//! Middleware modules for DICTUM API
//!
//! - `auth`: bearer-token authentication for entity routes
//!
//! Public entity routes and the `/auth` endpoints are mounted outside the
//! auth layer.

mod auth;

pub use auth::{auth_middleware, AuthExtractor, AuthMiddlewareError, AuthMiddlewareState};
