//! API Configuration Module
//!
//! Server binding, CORS, request limits and import settings. Configuration
//! is loaded from environment variables with defaults suited to development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ApiError, ApiResult};

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Interface to bind.
    pub host: String,

    /// Port to bind.
    pub port: u16,

    // ========================================================================
    // CORS Configuration
    // ========================================================================
    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins (dev mode).
    /// Example: "https://app.example.com,*.example.com"
    pub cors_origins: Vec<String>,

    /// Whether to allow credentials in CORS requests.
    pub cors_allow_credentials: bool,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,

    // ========================================================================
    // Request limits
    // ========================================================================
    /// Maximum request body size in bytes.
    pub body_limit_bytes: usize,

    /// Per-request timeout. A request that runs out of time is cancelled.
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cors_origins: Vec::new(),
            cors_allow_credentials: false,
            cors_max_age_secs: 86400,
            body_limit_bytes: 2 * 1024 * 1024,
            request_timeout: Duration::from_secs(30),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `DICTUM_HOST`: Bind interface (default: 0.0.0.0)
    /// - `DICTUM_PORT`: Bind port (default: 3000)
    /// - `DICTUM_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `DICTUM_CORS_ALLOW_CREDENTIALS`: "true" or "false" (default: false)
    /// - `DICTUM_CORS_MAX_AGE_SECS`: Preflight cache duration (default: 86400)
    /// - `DICTUM_BODY_LIMIT_BYTES`: Request body limit (default: 2 MiB)
    /// - `DICTUM_REQUEST_TIMEOUT_SECS`: Request timeout (default: 30)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cors_origins = std::env::var("DICTUM_CORS_ORIGINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let cors_allow_credentials = std::env::var("DICTUM_CORS_ALLOW_CREDENTIALS")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(false);

        Self {
            host: std::env::var("DICTUM_HOST").unwrap_or(defaults.host),
            port: env_parse("DICTUM_PORT").unwrap_or(defaults.port),
            cors_origins,
            cors_allow_credentials,
            cors_max_age_secs: env_parse("DICTUM_CORS_MAX_AGE_SECS")
                .unwrap_or(defaults.cors_max_age_secs),
            body_limit_bytes: env_parse("DICTUM_BODY_LIMIT_BYTES")
                .unwrap_or(defaults.body_limit_bytes),
            request_timeout: env_parse("DICTUM_REQUEST_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        }
    }

    pub fn bind_addr(&self) -> ApiResult<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse::<SocketAddr>()
            .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
    }

    /// Check if running in production mode (strict CORS).
    pub fn is_production(&self) -> bool {
        !self.cors_origins.is_empty()
    }

    /// Check if a given origin is allowed.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.cors_origins.is_empty() {
            return true;
        }

        self.cors_origins.iter().any(|allowed| {
            if allowed == origin {
                return true;
            }
            // Wildcard subdomains: *.example.com
            if let Some(pattern) = allowed.strip_prefix("*.") {
                if let Some(origin_domain) = origin.strip_prefix("https://") {
                    return origin_domain.ends_with(&format!(".{}", pattern));
                }
            }
            false
        })
    }
}

// ============================================================================
// IMPORT CONFIGURATION
// ============================================================================

/// Import pipeline configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportConfig {
    /// Directory holding uploaded files as `{guid}.{extension}`.
    pub file_root: PathBuf,

    /// Entity tracking import processes.
    pub process_entity: String,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            file_root: PathBuf::from("./uploads"),
            process_entity: "ImportProcess".to_string(),
        }
    }
}

impl ImportConfig {
    /// Environment variables:
    /// - `DICTUM_IMPORT_FILE_ROOT`: Upload directory (default: ./uploads)
    /// - `DICTUM_IMPORT_PROCESS_ENTITY`: Tracking entity (default: ImportProcess)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            file_root: std::env::var("DICTUM_IMPORT_FILE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.file_root),
            process_entity: std::env::var("DICTUM_IMPORT_PROCESS_ENTITY")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.process_entity),
        }
    }
}
