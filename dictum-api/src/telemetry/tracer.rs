//! Tracing Subscriber Initialization
//!
//! Installs one global subscriber: an `EnvFilter` (overridable through
//! `RUST_LOG`) and a JSON or human-readable formatting layer.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ApiError, ApiResult};

const DEFAULT_FILTER: &str = "dictum_api=debug,tower_http=debug,info";

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup event
    pub service_name: String,
    /// Service version
    pub service_version: String,
    /// Environment (production, staging, development)
    pub environment: String,
    /// Emit JSON lines instead of pretty text
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: std::env::var("DICTUM_SERVICE_NAME")
                .unwrap_or_else(|_| "dictum-api".to_string()),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: std::env::var("DICTUM_ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),
            json: std::env::var("DICTUM_LOG_JSON")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(true),
        }
    }
}

impl TelemetryConfig {
    pub fn from_env() -> Self {
        Self::default()
    }
}

/// Initialize the global tracing subscriber.
///
/// Call once at startup. A second call fails because a subscriber is
/// already installed.
pub fn init_tracing(config: &TelemetryConfig) -> ApiResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.map_err(|e| ApiError::internal_error(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(
        service_name = %config.service_name,
        service_version = %config.service_version,
        environment = %config.environment,
        json = config.json,
        "Telemetry initialized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EnvVarGuard {
        key: &'static str,
        original: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: Option<&str>) -> Self {
            let original = std::env::var(key).ok();
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
            Self { key, original }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match self.original.as_deref() {
                Some(v) => std::env::set_var(self.key, v),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn test_telemetry_config_default() {
        let _name = EnvVarGuard::set("DICTUM_SERVICE_NAME", None);
        let _json = EnvVarGuard::set("DICTUM_LOG_JSON", None);
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "dictum-api");
        assert!(config.json);
    }

    #[test]
    fn test_telemetry_config_plain_text() {
        let _json = EnvVarGuard::set("DICTUM_LOG_JSON", Some("false"));
        assert!(!TelemetryConfig::from_env().json);
    }

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }
}
