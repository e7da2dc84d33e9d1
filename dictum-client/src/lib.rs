//! DICTUM client library.
//!
//! - [`SessionManager`]: cached session, durable persistence, single-flight
//!   renewal
//! - [`Dispatcher`]: entity calls with 401 retry, anonymous fallback and
//!   cancellation

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod persistence;
pub mod session;

pub use config::{ClientConfig, ConfigError, PublicRoute};
pub use dispatcher::{Dispatcher, UnauthorizedHook};
pub use error::{ClientError, SessionError};
pub use persistence::{FileSessionStore, MemorySessionStore, PersistenceError, SessionStore};
pub use session::{HttpRefresher, Session, SessionManager, TokenRefresher};

pub use dictum_core::{date_value, Operation, Outcome, RequestEnvelope, ValueMap};
pub use tokio_util::sync::CancellationToken;
