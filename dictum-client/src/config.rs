//! Configuration loading for the DICTUM client.
//!
//! Required fields have no defaults. The file is TOML:
//!
//! ```toml
//! api_base_url = "http://localhost:3000"
//! app_id = "crm"
//! request_timeout_ms = 10000
//! renewal_window_secs = 60
//! session_path = "~/.local/state/dictum/session.json"
//! login_redirect_url = "https://crm.example.com/login"
//! public_routes = ["Customer/get", "Customer/view/Active"]
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dictum_core::Operation;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub app_id: String,
    pub request_timeout_ms: u64,
    /// Renew once the access token expires within this many seconds.
    pub renewal_window_secs: u64,
    pub session_path: PathBuf,
    #[serde(default)]
    pub login_redirect_url: Option<String>,
    /// `Entity/action[/subname]` calls allowed without a session.
    #[serde(default)]
    pub public_routes: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or DICTUM_CLIENT_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// An anonymous call the server is expected to accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicRoute {
    entity: String,
    operation: Operation,
    subname: Option<String>,
}

impl PublicRoute {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidValue {
            field: "public_routes",
            reason,
        };
        let mut parts = raw.split('/').map(str::trim);
        let entity = parts
            .next()
            .filter(|e| !e.is_empty())
            .ok_or_else(|| invalid(format!("'{}' has no entity", raw)))?;
        let operation: Operation = parts
            .next()
            .ok_or_else(|| invalid(format!("'{}' has no action", raw)))?
            .parse()
            .map_err(|e: dictum_core::UnknownOperation| invalid(e.to_string()))?;
        let subname = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
        if parts.next().is_some() {
            return Err(invalid(format!("'{}' has too many segments", raw)));
        }
        Ok(Self {
            entity: entity.to_ascii_lowercase(),
            operation,
            subname: subname.map(|s| s.to_ascii_lowercase()),
        })
    }

    pub fn matches(&self, entity: &str, operation: Operation, subname: Option<&str>) -> bool {
        self.entity.eq_ignore_ascii_case(entity)
            && self.operation == operation
            && match (&self.subname, subname) {
                (None, _) => true,
                (Some(expected), Some(actual)) => expected.eq_ignore_ascii_case(actual),
                (Some(_), None) => false,
            }
    }
}

impl ClientConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must be an http(s) URL".to_string(),
            });
        }
        if self.app_id.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "app_id",
                reason: "must not be empty".to_string(),
            });
        }
        if matches!(self.app_id.as_str(), "public" | "auth" | "health") {
            return Err(ConfigError::InvalidValue {
                field: "app_id",
                reason: format!("'{}' is a reserved route segment", self.app_id),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.session_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "session_path",
                reason: "must not be empty".to_string(),
            });
        }
        if let Some(url) = &self.login_redirect_url {
            if url.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "login_redirect_url",
                    reason: "must not be empty when set".to_string(),
                });
            }
        }
        self.public_routes()?;
        Ok(())
    }

    pub fn public_routes(&self) -> Result<Vec<PublicRoute>, ConfigError> {
        self.public_routes.iter().map(|r| PublicRoute::parse(r)).collect()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn renewal_window(&self) -> Duration {
        Duration::from_secs(self.renewal_window_secs)
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("DICTUM_CLIENT_CONFIG").ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
