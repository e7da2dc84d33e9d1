//! Request Dispatcher
//!
//! Sends entity calls to `/{app_id}/{entity}/{action}[/{subname}]` with the
//! current session's bearer token. Without a session, calls listed as public
//! go to the anonymous `/public/...` variant. A 401 triggers one renewal and
//! one retry; a second 401 invalidates the session and signals the host to
//! send the user to the login page when a redirect is configured.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use dictum_core::{
    AggregatedResult, ImportRequest, ImportSummary, LookupResult, Operation, Outcome,
    RequestEnvelope, TabularBlock, ValueMap,
};

use crate::config::{ClientConfig, PublicRoute};
use crate::error::{ClientError, SessionError};
use crate::persistence::FileSessionStore;
use crate::session::{HttpRefresher, Session, SessionManager};

/// Called with the login URL once the session has been given up.
pub type UnauthorizedHook = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct TokenBody<'a> {
    app_id: &'a str,
    user_id: &'a str,
    roles: &'a [String],
}

enum Reply {
    Done(Outcome<Value>),
    Unauthorized(ClientError),
}

#[derive(Clone)]
pub struct Dispatcher {
    http: reqwest::Client,
    base_url: String,
    app_id: String,
    sessions: SessionManager,
    public_routes: Vec<PublicRoute>,
    login_redirect_url: Option<String>,
    on_unauthorized: Option<UnauthorizedHook>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("base_url", &self.base_url)
            .field("app_id", &self.app_id)
            .field("public_routes", &self.public_routes)
            .field("login_redirect_url", &self.login_redirect_url)
            .finish()
    }
}

impl Dispatcher {
    pub fn new(
        http: reqwest::Client,
        api_base_url: &str,
        app_id: impl Into<String>,
        sessions: SessionManager,
    ) -> Self {
        Self {
            http,
            base_url: api_base_url.trim_end_matches('/').to_string(),
            app_id: app_id.into(),
            sessions,
            public_routes: Vec::new(),
            login_redirect_url: None,
            on_unauthorized: None,
        }
    }

    /// Wire up HTTP client, file-backed session store and refresher.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        let sessions = SessionManager::new(
            Arc::new(FileSessionStore::new(&config.session_path)),
            Arc::new(HttpRefresher::new(http.clone(), &config.api_base_url)),
            config.renewal_window(),
        );
        let mut dispatcher = Self::new(http, &config.api_base_url, &config.app_id, sessions)
            .with_public_routes(config.public_routes()?);
        dispatcher.login_redirect_url = config.login_redirect_url.clone();
        Ok(dispatcher)
    }

    pub fn with_public_routes(mut self, routes: Vec<PublicRoute>) -> Self {
        self.public_routes = routes;
        self
    }

    /// Give up on the session after a repeated 401 and hand `url` to `hook`.
    pub fn with_login_redirect(
        mut self,
        url: impl Into<String>,
        hook: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        self.login_redirect_url = Some(url.into());
        self.on_unauthorized = Some(Arc::new(hook));
        self
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    fn is_public(&self, entity: &str, operation: Operation, subname: Option<&str>) -> bool {
        self.public_routes
            .iter()
            .any(|route| route.matches(entity, operation, subname))
    }

    fn url(&self, public: bool, entity: &str, operation: Operation, subname: Option<&str>) -> String {
        let prefix = if public { "/public" } else { "" };
        let mut url = format!(
            "{}{}/{}/{}/{}",
            self.base_url,
            prefix,
            self.app_id,
            entity,
            operation.as_str()
        );
        if let Some(subname) = subname {
            url.push('/');
            url.push_str(subname);
        }
        url
    }

    // ------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------

    /// Open a session with an API key and keep it.
    pub async fn login(
        &self,
        api_key: &str,
        user_id: &str,
        roles: &[String],
    ) -> Result<Session, ClientError> {
        let url = format!("{}/auth/token", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("x-api-key", api_key)
            .json(&TokenBody {
                app_id: &self.app_id,
                user_id,
                roles,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(http_error(status, &url, text));
        }
        let session: Session = response.json().await?;
        self.sessions.establish(session.clone())?;
        tracing::info!(app_id = %self.app_id, user_id = %user_id, "Logged in");
        Ok(session)
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Send one entity call.
    ///
    /// `Ok(Outcome::Cancelled)` when `cancel` fires or the server answers
    /// 204; `Ok(Outcome::NotPerformed)` when the server answers `null`.
    pub async fn dispatch(
        &self,
        entity: &str,
        operation: Operation,
        subname: Option<&str>,
        envelope: &RequestEnvelope,
        cancel: &CancellationToken,
    ) -> Result<Outcome<Value>, ClientError> {
        self.call(entity, operation, subname, envelope, cancel).await
    }

    async fn call<B>(
        &self,
        entity: &str,
        operation: Operation,
        subname: Option<&str>,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<Outcome<Value>, ClientError>
    where
        B: Serialize + ?Sized + Sync,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(entity = %entity, operation = %operation, "Request cancelled");
                Ok(Outcome::Cancelled)
            }
            result = self.call_with_session(entity, operation, subname, body) => result,
        }
    }

    async fn call_with_session<B>(
        &self,
        entity: &str,
        operation: Operation,
        subname: Option<&str>,
        body: &B,
    ) -> Result<Outcome<Value>, ClientError>
    where
        B: Serialize + ?Sized + Sync,
    {
        let session = match self.sessions.ensure_valid().await {
            Ok(session) => session,
            Err(SessionError::NoSession) => {
                if !self.is_public(entity, operation, subname) {
                    return Err(ClientError::Unauthenticated {
                        entity: entity.to_string(),
                        action: operation.to_string(),
                    });
                }
                let url = self.url(true, entity, operation, subname);
                tracing::debug!(url = %url, "Dispatching anonymous request");
                return match self.send(&url, None, body).await? {
                    Reply::Done(outcome) => Ok(outcome),
                    Reply::Unauthorized(err) => Err(err),
                };
            }
            Err(err @ SessionError::Rejected { status: 401, .. }) => {
                return Err(self.give_up(err.into()));
            }
            Err(err) => return Err(err.into()),
        };

        let url = self.url(false, entity, operation, subname);
        tracing::debug!(url = %url, "Dispatching request");
        let first = match self.send(&url, Some(&session.access_token), body).await? {
            Reply::Done(outcome) => return Ok(outcome),
            Reply::Unauthorized(err) => err,
        };

        tracing::debug!(url = %url, "Unauthorized; renewing session and retrying");
        let renewed = match self.sessions.renew_replacing(&session.access_token).await {
            Ok(renewed) => renewed,
            Err(SessionError::Rejected { .. }) | Err(SessionError::NoSession) => {
                return Err(self.give_up(first));
            }
            Err(err) => return Err(err.into()),
        };
        match self.send(&url, Some(&renewed.access_token), body).await? {
            Reply::Done(outcome) => Ok(outcome),
            Reply::Unauthorized(err) => Err(self.give_up(err)),
        }
    }

    async fn send<B>(&self, url: &str, token: Option<&str>, body: &B) -> Result<Reply, ClientError>
    where
        B: Serialize + ?Sized + Sync,
    {
        let mut request = self.http.post(url).json(body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Reply::Done(Outcome::Cancelled));
        }
        if status.is_success() {
            let bytes = response.bytes().await?;
            if bytes.is_empty() {
                return Ok(Reply::Done(Outcome::NotPerformed));
            }
            let value: Value = serde_json::from_slice(&bytes)?;
            return Ok(Reply::Done(match value {
                Value::Null => Outcome::NotPerformed,
                value => Outcome::Completed(value),
            }));
        }

        let text = response.text().await.unwrap_or_default();
        let error = http_error(status, url, text);
        if status == reqwest::StatusCode::UNAUTHORIZED {
            Ok(Reply::Unauthorized(error))
        } else {
            tracing::warn!(status = status.as_u16(), url = %url, error = %error, "Request failed");
            Err(error)
        }
    }

    /// Drop the session and signal the host, when a redirect is configured.
    fn give_up(&self, error: ClientError) -> ClientError {
        let Some(login_url) = self.login_redirect_url.as_deref() else {
            return error;
        };
        tracing::warn!(login_url = %login_url, "Repeated 401; invalidating session");
        if let Err(err) = self.sessions.invalidate() {
            tracing::warn!(error = %err, "Failed to clear persisted session");
        }
        if let Some(hook) = &self.on_unauthorized {
            hook(login_url);
        }
        error
    }

    // ------------------------------------------------------------------
    // Typed calls
    // ------------------------------------------------------------------

    pub async fn get(
        &self,
        entity: &str,
        envelope: &RequestEnvelope,
        cancel: &CancellationToken,
    ) -> Result<Outcome<ValueMap>, ClientError> {
        let outcome = self.dispatch(entity, Operation::Get, None, envelope, cancel).await?;
        decode(outcome)
    }

    pub async fn insert(
        &self,
        entity: &str,
        envelope: &RequestEnvelope,
        cancel: &CancellationToken,
    ) -> Result<Outcome<AggregatedResult>, ClientError> {
        let outcome = self.dispatch(entity, Operation::Insert, None, envelope, cancel).await?;
        decode(outcome)
    }

    pub async fn update(
        &self,
        entity: &str,
        envelope: &RequestEnvelope,
        cancel: &CancellationToken,
    ) -> Result<Outcome<AggregatedResult>, ClientError> {
        let outcome = self.dispatch(entity, Operation::Update, None, envelope, cancel).await?;
        decode(outcome)
    }

    pub async fn delete(
        &self,
        entity: &str,
        envelope: &RequestEnvelope,
        cancel: &CancellationToken,
    ) -> Result<Outcome<AggregatedResult>, ClientError> {
        let outcome = self.dispatch(entity, Operation::Delete, None, envelope, cancel).await?;
        decode(outcome)
    }

    pub async fn process(
        &self,
        entity: &str,
        subname: Option<&str>,
        envelope: &RequestEnvelope,
        cancel: &CancellationToken,
    ) -> Result<Outcome<AggregatedResult>, ClientError> {
        let outcome = self
            .dispatch(entity, Operation::Process, subname, envelope, cancel)
            .await?;
        decode(outcome)
    }

    pub async fn action(
        &self,
        entity: &str,
        name: &str,
        envelope: &RequestEnvelope,
        cancel: &CancellationToken,
    ) -> Result<Outcome<AggregatedResult>, ClientError> {
        let outcome = self
            .dispatch(entity, Operation::Action, Some(name), envelope, cancel)
            .await?;
        decode(outcome)
    }

    /// `proc` is a reserved word.
    pub async fn proc_(
        &self,
        entity: &str,
        name: &str,
        envelope: &RequestEnvelope,
        cancel: &CancellationToken,
    ) -> Result<Outcome<Vec<TabularBlock>>, ClientError> {
        let outcome = self
            .dispatch(entity, Operation::Proc, Some(name), envelope, cancel)
            .await?;
        decode(outcome)
    }

    pub async fn view(
        &self,
        entity: &str,
        name: &str,
        envelope: &RequestEnvelope,
        cancel: &CancellationToken,
    ) -> Result<Outcome<Vec<TabularBlock>>, ClientError> {
        let outcome = self
            .dispatch(entity, Operation::View, Some(name), envelope, cancel)
            .await?;
        decode(outcome)
    }

    pub async fn lookup(
        &self,
        entity: &str,
        envelope: &RequestEnvelope,
        cancel: &CancellationToken,
    ) -> Result<Outcome<LookupResult>, ClientError> {
        let outcome = self.dispatch(entity, Operation::Lookup, None, envelope, cancel).await?;
        decode(outcome)
    }

    /// Import an uploaded file through the entity's import proc.
    pub async fn import(
        &self,
        entity: &str,
        import_proc: &str,
        request: &ImportRequest,
        cancel: &CancellationToken,
    ) -> Result<Outcome<ImportSummary>, ClientError> {
        let outcome = self
            .call(entity, Operation::Import, Some(import_proc), request, cancel)
            .await?;
        decode(outcome)
    }
}

fn decode<T: DeserializeOwned>(outcome: Outcome<Value>) -> Result<Outcome<T>, ClientError> {
    Ok(match outcome {
        Outcome::Completed(value) => Outcome::Completed(serde_json::from_value(value)?),
        Outcome::Cancelled => Outcome::Cancelled,
        Outcome::NotPerformed => Outcome::NotPerformed,
    })
}

fn http_error(status: reqwest::StatusCode, url: &str, text: String) -> ClientError {
    let message = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(ErrorBody {
            code: Some(code),
            message,
        }) => format!("{}: {}", code, message),
        Ok(ErrorBody { code: None, message }) => message,
        Err(_) if text.is_empty() => status
            .canonical_reason()
            .unwrap_or("Request failed")
            .to_string(),
        Err(_) => text,
    };
    ClientError::Http {
        status: status.as_u16(),
        message,
        url: url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemorySessionStore;
    use async_trait::async_trait;
    use std::time::Duration;

    struct NoRefresh;

    #[async_trait]
    impl crate::session::TokenRefresher for NoRefresh {
        async fn refresh(&self, _session: &Session) -> Result<Session, SessionError> {
            Err(SessionError::Transport("offline".to_string()))
        }
    }

    fn dispatcher() -> Dispatcher {
        let sessions = SessionManager::new(
            Arc::new(MemorySessionStore::new()),
            Arc::new(NoRefresh),
            Duration::from_secs(60),
        );
        Dispatcher::new(reqwest::Client::new(), "http://api.local/", "crm", sessions)
            .with_public_routes(vec![PublicRoute::parse("Customer/view/Active").unwrap()])
    }

    #[test]
    fn test_url_shape() {
        let d = dispatcher();
        assert_eq!(
            d.url(false, "Customer", Operation::Insert, None),
            "http://api.local/crm/Customer/insert"
        );
        assert_eq!(
            d.url(true, "Customer", Operation::View, Some("Active")),
            "http://api.local/public/crm/Customer/view/Active"
        );
    }

    #[test]
    fn test_public_allow_list() {
        let d = dispatcher();
        assert!(d.is_public("Customer", Operation::View, Some("Active")));
        assert!(!d.is_public("Customer", Operation::Insert, None));
    }

    #[test]
    fn test_http_error_prefers_api_error_body() {
        let err = http_error(
            reqwest::StatusCode::FORBIDDEN,
            "http://api.local/crm/Customer/get",
            r#"{"code":"FORBIDDEN","message":"Access denied","details":null}"#.to_string(),
        );
        match err {
            ClientError::Http { status, message, url } => {
                assert_eq!(status, 403);
                assert_eq!(message, "FORBIDDEN: Access denied");
                assert!(url.ends_with("/Customer/get"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let err = http_error(reqwest::StatusCode::BAD_GATEWAY, "u", String::new());
        assert!(err.to_string().contains("Bad Gateway"));
    }

    #[test]
    fn test_decode_keeps_neutral_outcomes() {
        let cancelled: Outcome<LookupResult> = decode(Outcome::Cancelled).unwrap();
        assert!(cancelled.is_cancelled());
        let skipped: Outcome<LookupResult> = decode(Outcome::NotPerformed).unwrap();
        assert_eq!(skipped, Outcome::NotPerformed);
        let found: Outcome<LookupResult> =
            decode(Outcome::Completed(serde_json::json!({"Description": "Acme"}))).unwrap();
        assert!(found.is_completed());
        assert!(decode::<LookupResult>(Outcome::Completed(serde_json::json!("Acme"))).is_err());
    }

    #[tokio::test]
    async fn test_private_call_without_session_is_unauthenticated() {
        let d = dispatcher();
        let err = d
            .insert("Customer", &RequestEnvelope::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Unauthenticated { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let d = dispatcher();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = d.get("Customer", &RequestEnvelope::new(), &cancel).await.unwrap();
        assert_eq!(outcome, Outcome::Cancelled);
    }
}
