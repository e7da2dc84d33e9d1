//! Shared helpers for DICTUM client integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::Request,
    middleware::{from_fn, Next},
    Router,
};
use chrono::Utc;

use dictum_api::auth::JwtSecret;
use dictum_api::{create_api_router, issue_session, ApiConfig, AppState, AuthConfig};
use dictum_client::{
    Dispatcher, MemorySessionStore, Session, SessionError, SessionManager, SessionStore,
    TokenRefresher,
};
use dictum_test_utils::fixtures::{self, CallCounter, APP_ID, IMPORT_PROCESS};
use dictum_test_utils::{InMemoryFileStorage, MemoryDatabase};

pub const TEST_API_KEY: &str = "client_key_123";
pub const RENEWAL_WINDOW: Duration = Duration::from_secs(60);

pub fn session_expiring_in(secs: i64, tag: &str) -> Session {
    Session {
        access_token: format!("access-{}", tag),
        refresh_token: format!("refresh-{}", tag),
        expires_at_utc: Utc::now() + chrono::Duration::seconds(secs),
        claims: serde_json::Map::new(),
    }
}

/// Refresher that counts exchanges, waits `delay`, then succeeds or fails.
pub struct FakeRefresher {
    pub calls: CallCounter,
    delay: Duration,
    failure: Mutex<Option<SessionError>>,
}

impl FakeRefresher {
    pub fn new(delay: Duration) -> Self {
        Self {
            calls: CallCounter::default(),
            delay,
            failure: Mutex::new(None),
        }
    }

    pub fn failing(delay: Duration, error: SessionError) -> Self {
        let refresher = Self::new(delay);
        *refresher.failure.lock().unwrap() = Some(error);
        refresher
    }

    pub fn recover(&self) {
        self.failure.lock().unwrap().take();
    }
}

#[async_trait]
impl TokenRefresher for FakeRefresher {
    async fn refresh(&self, _session: &Session) -> Result<Session, SessionError> {
        let n = self.calls.hit();
        tokio::time::sleep(self.delay).await;
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(session_expiring_in(900, &format!("renewed-{}", n)))
    }
}

pub fn manager_with(
    stored: Option<Session>,
    refresher: Arc<FakeRefresher>,
) -> (SessionManager, Arc<MemorySessionStore>) {
    let store = Arc::new(match stored {
        Some(session) => MemorySessionStore::with_session(session),
        None => MemorySessionStore::new(),
    });
    let manager = SessionManager::new(
        store.clone() as Arc<dyn SessionStore>,
        refresher,
        RENEWAL_WINDOW,
    );
    (manager, store)
}

// ============================================================================
// IN-PROCESS SERVER
// ============================================================================

pub fn server_auth_config() -> AuthConfig {
    let mut config = AuthConfig {
        jwt_secret: JwtSecret::new("client_test_secret".to_string()).expect("non-empty secret"),
        ..AuthConfig::default()
    };
    config.add_api_key(TEST_API_KEY.to_string());
    config
}

/// Bind `router` to an ephemeral local port; returns the base URL.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("server runs");
    });
    format!("http://{}", addr)
}

/// The real API router over a seeded memory database.
pub struct TestServer {
    pub base_url: String,
    pub state: AppState,
    pub db: MemoryDatabase,
    pub files: Arc<InMemoryFileStorage>,
    /// `/auth/refresh` calls seen by the server.
    pub refreshes: CallCounter,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with_timeout(Duration::from_secs(30)).await
    }

    pub async fn start_with_timeout(timeout: Duration) -> Self {
        let db = fixtures::seeded_database();
        let files = Arc::new(InMemoryFileStorage::new());
        let state = AppState::new(
            fixtures::sample_registry(),
            Arc::new(db.clone()),
            Arc::new(fixtures::sample_app_keys()),
            files.clone(),
            server_auth_config(),
            IMPORT_PROCESS,
        )
        .with_request_timeout(timeout);

        let refreshes = CallCounter::default();
        let counter = refreshes.clone();
        let router = create_api_router(state.clone(), &ApiConfig::default())
            .expect("router builds")
            .layer(from_fn(move |request: Request, next: Next| {
                let counter = counter.clone();
                async move {
                    if request.uri().path() == "/auth/refresh" {
                        counter.hit();
                    }
                    next.run(request).await
                }
            }));

        Self {
            base_url: serve(router).await,
            state,
            db,
            files,
            refreshes,
        }
    }

    /// A session issued by this server, as the client stores it.
    pub fn session(&self) -> Session {
        self.session_with(&self.state.auth_config)
    }

    /// Issue with `config` (same secret, other lifetimes).
    pub fn session_with(&self, config: &AuthConfig) -> Session {
        let tokens = issue_session(config, "tester", APP_ID, vec![]).expect("session issued");
        serde_json::from_value(serde_json::to_value(tokens).expect("tokens serialize"))
            .expect("client reads server session")
    }

    /// Dispatcher over a fresh in-memory store and the real refresh route.
    pub fn dispatcher(&self, stored: Option<Session>) -> (Dispatcher, Arc<MemorySessionStore>) {
        let http = reqwest::Client::new();
        let store = Arc::new(match stored {
            Some(session) => MemorySessionStore::with_session(session),
            None => MemorySessionStore::new(),
        });
        let sessions = SessionManager::new(
            store.clone() as Arc<dyn SessionStore>,
            Arc::new(dictum_client::HttpRefresher::new(http.clone(), &self.base_url)),
            RENEWAL_WINDOW,
        );
        (Dispatcher::new(http, &self.base_url, APP_ID, sessions), store)
    }
}
