//! Error types for the DICTUM client.

use crate::config::ConfigError;

/// Session lifecycle failures.
///
/// `Clone` because one renewal outcome is handed to every caller waiting on
/// it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("No session; log in first")]
    NoSession,
    #[error("Session renewal rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("Session renewal failed: {0}")]
    Transport(String),
    #[error("Session store error: {0}")]
    Store(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Non-success HTTP answer.
    #[error("HTTP {status} from {url}: {message}")]
    Http {
        status: u16,
        message: String,
        url: String,
    },
    /// No session and the route is not open to anonymous callers.
    #[error("Not authenticated for {entity}/{action}")]
    Unauthenticated { entity: String, action: String },
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// HTTP status of the failure, when the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Http { status, .. } => Some(*status),
            ClientError::Session(SessionError::Rejected { status, .. }) => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_display_carries_url() {
        let err = ClientError::Http {
            status: 403,
            message: "Access denied".to_string(),
            url: "http://localhost/crm/Customer/get".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("403"));
        assert!(text.contains("/crm/Customer/get"));
        assert_eq!(err.status(), Some(403));
    }

    #[test]
    fn test_session_rejection_status() {
        let err = ClientError::from(SessionError::Rejected {
            status: 401,
            message: "expired".to_string(),
        });
        assert_eq!(err.status(), Some(401));
        assert_eq!(ClientError::from(SessionError::NoSession).status(), None);
    }
}
