//! Session Manager
//!
//! Holds the current session, loads it from durable storage on first use and
//! renews it shortly before it expires. Renewal is single-flight: while one
//! refresh exchange is pending, every other caller awaits that same exchange
//! and observes its outcome.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::persistence::SessionStore;

/// Tokens issued by `/auth/token` and `/auth/refresh`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at_utc: DateTime<Utc>,
    #[serde(default)]
    pub claims: serde_json::Map<String, serde_json::Value>,
}

impl Session {
    /// True when the access token expires before `now + window`.
    pub fn expires_within(&self, window: Duration, now: DateTime<Utc>) -> bool {
        chrono::Duration::from_std(window)
            .ok()
            .and_then(|window| now.checked_add_signed(window))
            .map_or(true, |deadline| self.expires_at_utc <= deadline)
    }

    pub fn app_id(&self) -> Option<&str> {
        self.claims.get("app_id").and_then(|v| v.as_str())
    }
}

/// The refresh exchange: old session in, renewed session out.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, session: &Session) -> Result<Session, SessionError>;
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct RefreshBody<'a> {
    access_token: &'a str,
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Calls `POST {base}/auth/refresh`.
#[derive(Debug, Clone)]
pub struct HttpRefresher {
    client: reqwest::Client,
    url: String,
}

impl HttpRefresher {
    pub fn new(client: reqwest::Client, api_base_url: &str) -> Self {
        Self {
            client,
            url: format!("{}/auth/refresh", api_base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl TokenRefresher for HttpRefresher {
    async fn refresh(&self, session: &Session) -> Result<Session, SessionError> {
        let response = self
            .client
            .post(&self.url)
            .json(&RefreshBody {
                access_token: &session.access_token,
                refresh_token: &session.refresh_token,
            })
            .send()
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<Session>()
                .await
                .map_err(|e| SessionError::Transport(e.to_string()));
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.message)
            .unwrap_or(text);
        Err(SessionError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

type Renewal = Shared<BoxFuture<'static, Result<Session, SessionError>>>;

struct Inner {
    current: Mutex<Option<Session>>,
    in_flight: Mutex<Option<Renewal>>,
    store: Arc<dyn SessionStore>,
    refresher: Arc<dyn TokenRefresher>,
    renewal_window: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Empties the in-flight slot when the renewal finishes, fails or unwinds.
struct ClearInFlight(Arc<Inner>);

impl Drop for ClearInFlight {
    fn drop(&mut self) {
        lock(&self.0.in_flight).take();
    }
}

impl Inner {
    fn cached_or_stored(&self) -> Result<Option<Session>, SessionError> {
        if let Some(session) = lock(&self.current).clone() {
            return Ok(Some(session));
        }
        let stored = self.store.load()?;
        if let Some(session) = &stored {
            tracing::debug!(expires_at = %session.expires_at_utc, "Loaded persisted session");
            *lock(&self.current) = Some(session.clone());
        }
        Ok(stored)
    }

    async fn run_renewal(self: Arc<Self>) -> Result<Session, SessionError> {
        let _clear = ClearInFlight(Arc::clone(&self));
        let current = self.cached_or_stored()?.ok_or(SessionError::NoSession)?;

        tracing::debug!(expires_at = %current.expires_at_utc, "Renewing session");
        let renewed = match self.refresher.refresh(&current).await {
            Ok(renewed) => renewed,
            Err(err) => {
                tracing::warn!(error = %err, "Session renewal failed");
                return Err(err);
            }
        };

        if let Err(err) = self.store.save(&renewed) {
            tracing::warn!(error = %err, "Failed to persist renewed session");
        }
        *lock(&self.current) = Some(renewed.clone());
        tracing::info!(expires_at = %renewed.expires_at_utc, "Session renewed");
        Ok(renewed)
    }
}

/// Cheap to clone; clones share the session and the in-flight renewal.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("renewal_window", &self.inner.renewal_window)
            .field("renewing", &self.is_renewing())
            .finish()
    }
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        refresher: Arc<dyn TokenRefresher>,
        renewal_window: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                current: Mutex::new(None),
                in_flight: Mutex::new(None),
                store,
                refresher,
                renewal_window,
            }),
        }
    }

    /// Current session, renewed first when it is about to expire.
    ///
    /// Returns `NoSession` when nothing is cached or persisted.
    pub async fn ensure_valid(&self) -> Result<Session, SessionError> {
        let session = self
            .inner
            .cached_or_stored()?
            .ok_or(SessionError::NoSession)?;
        if session.expires_within(self.inner.renewal_window, Utc::now()) {
            return self.renew_replacing(&session.access_token).await;
        }
        Ok(session)
    }

    /// Run the refresh exchange, or join the one already pending.
    ///
    /// On failure the current session is kept as it was.
    pub async fn renew(&self) -> Result<Session, SessionError> {
        self.renew_after(None).await
    }

    /// Like [`renew`](Self::renew), but a session that has already moved
    /// past `access_token` is returned as is.
    pub async fn renew_replacing(&self, access_token: &str) -> Result<Session, SessionError> {
        self.renew_after(Some(access_token)).await
    }

    async fn renew_after(&self, seen: Option<&str>) -> Result<Session, SessionError> {
        let renewal = {
            let mut slot = lock(&self.inner.in_flight);
            match slot.as_ref() {
                Some(pending) => pending.clone(),
                None => {
                    let current = lock(&self.inner.current).clone();
                    if let (Some(seen), Some(current)) = (seen, current) {
                        if current.access_token != seen {
                            return Ok(current);
                        }
                    }
                    let inner = Arc::clone(&self.inner);
                    let renewal = inner.run_renewal().boxed().shared();
                    *slot = Some(renewal.clone());
                    renewal
                }
            }
        };
        renewal.await
    }

    /// Adopt a freshly issued session and persist it.
    pub fn establish(&self, session: Session) -> Result<(), SessionError> {
        self.inner.store.save(&session)?;
        *lock(&self.inner.current) = Some(session);
        Ok(())
    }

    /// Forget the session, in memory and on disk.
    pub fn invalidate(&self) -> Result<(), SessionError> {
        lock(&self.inner.current).take();
        self.inner.store.clear()?;
        tracing::info!("Session invalidated");
        Ok(())
    }

    pub fn current(&self) -> Option<Session> {
        lock(&self.inner.current).clone()
    }

    pub fn is_renewing(&self) -> bool {
        lock(&self.inner.in_flight).is_some()
    }
}
