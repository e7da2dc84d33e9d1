//! Authentication Module
//!
//! Sessions are a pair of HS256 JWTs: a short-lived access token presented
//! as `Authorization: Bearer` on every entity call, and a longer-lived
//! refresh token exchanged (together with the old access token) for a new
//! pair. API keys are accepted only to issue the first pair.

use crate::error::{ApiError, ApiResult};
use chrono::{DateTime, TimeZone, Utc};
use dictum_core::{ConfigError, DictumError};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

const INSECURE_DEFAULT_SECRET: &str = "INSECURE_DEFAULT_SECRET_CHANGE_IN_PRODUCTION";

// ============================================================================
// CLOCK ABSTRACTION
// ============================================================================

/// Clock abstraction for JWT time validation.
///
/// Time checks are done here rather than inside `jsonwebtoken` so tests can
/// inject a fixed instant.
pub trait JwtClock: Send + Sync {
    /// Current time as Unix epoch seconds.
    fn now_epoch_secs(&self) -> i64;
}

/// Production clock using system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl JwtClock for SystemClock {
    fn now_epoch_secs(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// Fixed clock for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl JwtClock for FixedClock {
    fn now_epoch_secs(&self) -> i64 {
        self.0
    }
}

/// Test clock helpers for common scenarios.
pub mod test_clocks {
    use super::FixedClock;

    /// 2024-01-01 00:00:00 UTC
    pub fn valid() -> FixedClock {
        FixedClock(1704067200)
    }

    /// 2030-01-01 00:00:00 UTC
    pub fn future() -> FixedClock {
        FixedClock(1893456000)
    }
}

// ============================================================================
// JWT SECRET (TYPE-SAFE)
// ============================================================================

/// JWT signing secret that never shows up in logs.
#[derive(Clone)]
pub struct JwtSecret(SecretString);

impl JwtSecret {
    /// Create a new JWT secret.
    ///
    /// # Errors
    /// Returns error if the secret is empty.
    pub fn new(secret: String) -> Result<Self, DictumError> {
        if secret.is_empty() {
            return Err(DictumError::Config(ConfigError::MissingRequired {
                field: "jwt_secret".to_string(),
            }));
        }
        Ok(Self(SecretString::new(secret.into())))
    }

    /// Expose the secret value (only for signing and verification).
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn len(&self) -> usize {
        self.0.expose_secret().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }

    pub fn is_insecure_default(&self) -> bool {
        self.0.expose_secret() == INSECURE_DEFAULT_SECRET
    }
}

impl std::fmt::Debug for JwtSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JwtSecret([REDACTED, {} chars])", self.len())
    }
}

fn build_jwt_secret(secret_str: String) -> JwtSecret {
    let normalized = if secret_str.trim().is_empty() {
        INSECURE_DEFAULT_SECRET.to_string()
    } else {
        secret_str
    };

    match JwtSecret::new(normalized) {
        Ok(secret) => secret,
        Err(_) => JwtSecret(SecretString::new(INSECURE_DEFAULT_SECRET.to_string().into())),
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Authentication configuration.
#[derive(Clone)]
pub struct AuthConfig {
    /// API keys allowed to request a first session
    pub api_keys: HashSet<String>,

    /// JWT secret key for signing and verification
    pub jwt_secret: JwtSecret,

    /// JWT algorithm (default: HS256)
    pub jwt_algorithm: Algorithm,

    /// Access token lifetime in seconds (default: 1 hour)
    pub access_token_secs: i64,

    /// Refresh token lifetime in seconds (default: 7 days)
    pub refresh_token_secs: i64,

    /// Clock skew tolerance in seconds (default: 60)
    pub jwt_clock_skew_secs: i64,

    /// Clock for JWT time validation (injected for testing)
    pub clock: Arc<dyn JwtClock>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("api_keys", &format!("[{} keys]", self.api_keys.len()))
            .field("jwt_secret", &self.jwt_secret)
            .field("jwt_algorithm", &self.jwt_algorithm)
            .field("access_token_secs", &self.access_token_secs)
            .field("refresh_token_secs", &self.refresh_token_secs)
            .field("jwt_clock_skew_secs", &self.jwt_clock_skew_secs)
            .field("clock", &"<JwtClock>")
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_keys: HashSet::new(),
            jwt_secret: build_jwt_secret(INSECURE_DEFAULT_SECRET.to_string()),
            jwt_algorithm: Algorithm::HS256,
            access_token_secs: 3600,
            refresh_token_secs: 7 * 24 * 3600,
            jwt_clock_skew_secs: 60,
            clock: Arc::new(SystemClock),
        }
    }
}

impl AuthConfig {
    /// Create authentication configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `DICTUM_API_KEYS`: Comma-separated list of valid API keys
    /// - `DICTUM_JWT_SECRET`: JWT signing secret
    /// - `DICTUM_ACCESS_TOKEN_SECS`: Access token lifetime (default: 3600)
    /// - `DICTUM_REFRESH_TOKEN_SECS`: Refresh token lifetime (default: 604800)
    /// - `DICTUM_JWT_CLOCK_SKEW_SECS`: Clock skew tolerance (default: 60)
    pub fn from_env() -> Self {
        let api_keys = std::env::var("DICTUM_API_KEYS")
            .map(|keys| {
                keys.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let secret_str =
            std::env::var("DICTUM_JWT_SECRET").unwrap_or_else(|_| INSECURE_DEFAULT_SECRET.to_string());
        let defaults = Self::default();

        Self {
            api_keys,
            jwt_secret: build_jwt_secret(secret_str),
            jwt_algorithm: Algorithm::HS256,
            access_token_secs: env_parse("DICTUM_ACCESS_TOKEN_SECS", defaults.access_token_secs),
            refresh_token_secs: env_parse("DICTUM_REFRESH_TOKEN_SECS", defaults.refresh_token_secs),
            jwt_clock_skew_secs: env_parse("DICTUM_JWT_CLOCK_SKEW_SECS", defaults.jwt_clock_skew_secs),
            clock: Arc::new(SystemClock),
        }
    }

    /// Refuse insecure secrets when `DICTUM_ENVIRONMENT` is production.
    ///
    /// Outside production the same findings are logged as warnings.
    pub fn validate_for_production(&self) -> ApiResult<()> {
        let environment = std::env::var("DICTUM_ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase();
        let is_production = environment == "production" || environment == "prod";

        if self.jwt_secret.is_insecure_default() {
            if is_production {
                return Err(ApiError::invalid_input(format!(
                    "Cannot start server in production with insecure JWT secret. \
                     Set DICTUM_JWT_SECRET to a secure value. DICTUM_ENVIRONMENT={}",
                    environment
                )));
            }
            tracing::warn!(
                "Using insecure default JWT secret. Set DICTUM_JWT_SECRET before deploying."
            );
        }

        if self.jwt_secret.len() < 32 {
            if is_production {
                return Err(ApiError::invalid_input(format!(
                    "JWT secret is too short for production use ({} chars). \
                     It must be at least 32 characters long.",
                    self.jwt_secret.len()
                )));
            } else if !self.jwt_secret.is_insecure_default() {
                tracing::warn!(
                    length = self.jwt_secret.len(),
                    "JWT secret is shorter than 32 characters"
                );
            }
        }

        Ok(())
    }

    pub fn add_api_key(&mut self, key: String) {
        self.api_keys.insert(key);
    }

    pub fn is_valid_api_key(&self, key: &str) -> bool {
        self.api_keys.contains(key)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

// ============================================================================
// JWT CLAIMS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT claims carried by both token types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,

    /// Application the session is bound to
    pub app_id: String,

    #[serde(default)]
    pub roles: Vec<String>,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    pub token_type: TokenType,
}

impl Claims {
    pub fn new(
        user_id: String,
        app_id: String,
        roles: Vec<String>,
        token_type: TokenType,
        lifetime_secs: i64,
        clock: &dyn JwtClock,
    ) -> Self {
        let now = clock.now_epoch_secs();
        Self {
            sub: user_id,
            app_id,
            roles,
            iat: now,
            exp: now + lifetime_secs,
            token_type,
        }
    }

    pub fn is_expired(&self, clock: &dyn JwtClock) -> bool {
        self.exp < clock.now_epoch_secs()
    }
}

// ============================================================================
// SESSION TOKENS
// ============================================================================

/// Session handed to clients by `/auth/token` and `/auth/refresh`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "PascalCase")]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at_utc: DateTime<Utc>,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub claims: serde_json::Map<String, serde_json::Value>,
}

fn sign(config: &AuthConfig, claims: &Claims) -> ApiResult<String> {
    let encoding_key = EncodingKey::from_secret(config.jwt_secret.expose().as_bytes());
    encode(&Header::new(config.jwt_algorithm), claims, &encoding_key)
        .map_err(|e| ApiError::internal_error(format!("Failed to generate token: {}", e)))
}

/// Issue a fresh access/refresh pair.
pub fn issue_session(
    config: &AuthConfig,
    user_id: &str,
    app_id: &str,
    roles: Vec<String>,
) -> ApiResult<SessionTokens> {
    let clock = &*config.clock;
    let access = Claims::new(
        user_id.to_string(),
        app_id.to_string(),
        roles.clone(),
        TokenType::Access,
        config.access_token_secs,
        clock,
    );
    let refresh = Claims::new(
        user_id.to_string(),
        app_id.to_string(),
        roles,
        TokenType::Refresh,
        config.refresh_token_secs,
        clock,
    );

    let expires_at_utc = Utc
        .timestamp_opt(access.exp, 0)
        .single()
        .ok_or_else(|| ApiError::internal_error("Token expiry out of range"))?;
    let claims = match serde_json::to_value(&access)? {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };

    Ok(SessionTokens {
        access_token: sign(config, &access)?,
        refresh_token: sign(config, &refresh)?,
        expires_at_utc,
        claims,
    })
}

/// Exchange an (possibly expired) access token plus a valid refresh token
/// for a new session.
pub fn refresh_session(
    config: &AuthConfig,
    access_token: &str,
    refresh_token: &str,
) -> ApiResult<SessionTokens> {
    let previous = decode_claims(config, access_token)?;
    let refresh = validate_token(config, refresh_token, TokenType::Refresh)?;

    if previous.token_type != TokenType::Access {
        return Err(ApiError::invalid_token("Expected an access token"));
    }
    if previous.sub != refresh.sub || previous.app_id != refresh.app_id {
        tracing::warn!(sub = %previous.sub, app_id = %previous.app_id, "Refresh token does not match access token");
        return Err(ApiError::invalid_token("Refresh token does not match access token"));
    }

    issue_session(config, &refresh.sub, &refresh.app_id, refresh.roles)
}

// ============================================================================
// VALIDATION
// ============================================================================

fn validate_claim_times(now: i64, exp: i64, leeway_secs: i64) -> ApiResult<()> {
    if exp < now - leeway_secs {
        return Err(ApiError::token_expired());
    }
    Ok(())
}

/// Verify the signature only; expiry is not checked.
fn decode_claims(config: &AuthConfig, token: &str) -> ApiResult<Claims> {
    let decoding_key = DecodingKey::from_secret(config.jwt_secret.expose().as_bytes());

    let mut validation = Validation::new(config.jwt_algorithm);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.required_spec_claims = HashSet::from(["exp".to_string()]);

    decode::<Claims>(token, &decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                ApiError::invalid_token("Token signature is invalid")
            }
            jsonwebtoken::errors::ErrorKind::InvalidToken => ApiError::invalid_token("Token is invalid"),
            _ => ApiError::invalid_token(format!("Token validation failed: {}", e)),
        })
}

/// Verify signature, expiry and token type.
pub fn validate_token(config: &AuthConfig, token: &str, expected: TokenType) -> ApiResult<Claims> {
    let claims = decode_claims(config, token)?;

    let now = config.clock.now_epoch_secs();
    if now < 0 {
        tracing::error!(timestamp = now, "System clock returned pre-epoch time");
        return Err(ApiError::internal_error("Server time configuration error"));
    }
    validate_claim_times(now, claims.exp, config.jwt_clock_skew_secs)?;

    if claims.token_type != expected {
        return Err(ApiError::invalid_token(format!(
            "Expected a {:?} token",
            expected
        )));
    }
    Ok(claims)
}

// ============================================================================
// AUTHENTICATION CONTEXT
// ============================================================================

/// Caller identity injected into request extensions by the auth middleware.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthContext {
    pub user_id: String,
    pub app_id: String,
    pub roles: Vec<String>,
}

impl AuthContext {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

impl From<Claims> for AuthContext {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            app_id: claims.app_id,
            roles: claims.roles,
        }
    }
}

/// Authenticate an `Authorization: Bearer <access token>` header.
pub fn authenticate(config: &AuthConfig, auth_header: Option<&str>) -> ApiResult<AuthContext> {
    let Some(value) = auth_header else {
        return Err(ApiError::unauthorized(
            "Authentication required: provide an Authorization header",
        ));
    };
    let token = value
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::invalid_token("Authorization header must use Bearer scheme"))?;
    validate_token(config, token, TokenType::Access).map(AuthContext::from)
}

/// The token's application must be the one addressed by the route.
pub fn check_app_access(auth: &AuthContext, app_id: &str) -> ApiResult<()> {
    if auth.app_id == app_id {
        Ok(())
    } else {
        Err(ApiError::forbidden(format!(
            "Access denied to application {}",
            app_id
        )))
    }
}

// ============================================================================
// TESTS
// ============================================================================
