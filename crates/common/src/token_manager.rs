//! OAuth 2.0 JWT-bearer token exchange with cached, single-flight refresh.
//!
//! Mints a signed assertion from the [`ServiceCredential`], exchanges it at the
//! token endpoint for a bearer token, and caches the token until shortly before
//! it expires.
//!
//! # Features
//!
//! - Token reused until `expires_at - refresh threshold - clock drift margin`
//! - Refresh is single-flighted: the cache lock is held across the exchange,
//!   so concurrent callers wait for one mint instead of minting their own
//! - Failures are returned to the caller; the next call retries
//!
//! # Example
//!
//! ```rust,ignore
//! use common::token_manager::{AccessTokenSource, TokenExchangeConfig, TokenExchanger};
//!
//! let config = TokenExchangeConfig::new(
//!     "https://oauth2.googleapis.com/token".to_string(),
//!     "https://www.googleapis.com/auth/drive.file".to_string(),
//!     credential,
//! );
//! let exchanger = TokenExchanger::new(config)?;
//!
//! let token = exchanger.access_token().await?;
//! let header = format!("Bearer {}", token.expose_secret());
//! ```
//!
//! # Security
//!
//! - Private key, assertion and bearer token are `SecretString` (never logged)
//! - Token endpoint error bodies are logged at trace level only
//! - HTTP timeouts prevent hanging connections

use crate::config::ServiceCredential;
use crate::jwt::{
    AssertionClaims, AssertionSigner, RsaSha256Signer, SigningError, DEFAULT_ASSERTION_LIFETIME,
    MAX_ASSERTION_LIFETIME,
};
use crate::secret::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, trace, warn};

// =============================================================================
// Constants
// =============================================================================

/// Grant type for the JWT-bearer assertion flow (RFC 7523).
pub const JWT_BEARER_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Default refresh threshold (5 minutes before expiration).
pub const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::from_secs(300);

/// Default HTTP request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default connection timeout for HTTP client.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Clock drift safety margin (30 seconds).
///
/// Cached tokens are treated as stale this much earlier than the refresh
/// threshold alone would require, covering clock skew against the token
/// endpoint and network latency on the request that carries the token.
const CLOCK_DRIFT_MARGIN_SECS: i64 = 30;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during token exchange.
#[derive(Error, Debug, Clone)]
pub enum TokenError {
    /// The assertion could not be signed.
    #[error("Assertion signing failed: {0}")]
    Signing(#[from] SigningError),

    /// Token endpoint answered with a non-success status.
    #[error("Token endpoint returned status {status}")]
    Upstream { status: u16, body: String },

    /// Transport-level failure reaching the token endpoint.
    #[error("Token endpoint unreachable: {0}")]
    Network(String),

    /// Token response parsing failed.
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the token exchanger.
#[derive(Clone)]
pub struct TokenExchangeConfig {
    /// Token endpoint URL; also the assertion audience.
    pub token_uri: String,

    /// Scope requested for the bearer token.
    pub scope: String,

    /// Issuer identity and signing key.
    pub credential: ServiceCredential,

    /// Assertion lifetime (`exp - iat`), at most one hour.
    pub assertion_lifetime: Duration,

    /// Refresh cached tokens this long before expiration.
    pub refresh_threshold: Duration,

    /// HTTP request timeout.
    pub http_timeout: Duration,
}

impl std::fmt::Debug for TokenExchangeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenExchangeConfig")
            .field("token_uri", &self.token_uri)
            .field("scope", &self.scope)
            .field("credential", &self.credential)
            .field("assertion_lifetime", &self.assertion_lifetime)
            .field("refresh_threshold", &self.refresh_threshold)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

impl TokenExchangeConfig {
    /// Create a new configuration with default lifetimes and timeouts.
    #[must_use]
    pub fn new(token_uri: String, scope: String, credential: ServiceCredential) -> Self {
        Self {
            token_uri,
            scope,
            credential,
            assertion_lifetime: DEFAULT_ASSERTION_LIFETIME,
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    /// Create a new configuration requiring an HTTPS token endpoint.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Configuration` if the URL doesn't use HTTPS.
    pub fn new_secure(
        token_uri: String,
        scope: String,
        credential: ServiceCredential,
    ) -> Result<Self, TokenError> {
        if !token_uri.starts_with("https://") {
            return Err(TokenError::Configuration(
                "Token endpoint must use HTTPS in production".into(),
            ));
        }
        Ok(Self::new(token_uri, scope, credential))
    }

    /// Set the assertion lifetime (clamped to [`MAX_ASSERTION_LIFETIME`]).
    #[must_use]
    pub fn with_assertion_lifetime(mut self, lifetime: Duration) -> Self {
        self.assertion_lifetime = lifetime.min(MAX_ASSERTION_LIFETIME);
        self
    }

    /// Set the refresh threshold.
    #[must_use]
    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold = threshold;
        self
    }

    /// Set the HTTP timeout.
    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }
}

// =============================================================================
// Token Source
// =============================================================================

/// Anything that can hand out a bearer token for the storage API.
#[async_trait::async_trait]
pub trait AccessTokenSource: Send + Sync {
    /// Return a currently valid bearer token.
    ///
    /// # Errors
    ///
    /// Returns `TokenError` if no token could be obtained.
    async fn access_token(&self) -> Result<SecretString, TokenError>;

    /// Discard any cached token; the next `access_token` call mints a new one.
    ///
    /// Callers use this when the storage API rejects a token that has not
    /// yet expired (revoked or rotated).
    async fn invalidate(&self) {}
}

/// Token endpoint response.
#[derive(Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    #[allow(dead_code)]
    #[serde(default)]
    token_type: Option<String>,
    expires_in: u64,
}

impl std::fmt::Debug for OAuthTokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

struct CachedToken {
    token: SecretString,
    expires_at: i64,
}

/// [`AccessTokenSource`] that signs assertions and exchanges them for tokens.
pub struct TokenExchanger {
    config: TokenExchangeConfig,
    http_client: reqwest::Client,
    signer: Arc<dyn AssertionSigner>,
    cache: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for TokenExchanger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenExchanger")
            .field("config", &self.config)
            .field("cache", &"[REDACTED]")
            .finish()
    }
}

impl TokenExchanger {
    /// Create an exchanger using the default RSA-SHA256 signer.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Configuration` if the HTTP client cannot be built.
    pub fn new(config: TokenExchangeConfig) -> Result<Self, TokenError> {
        Self::with_signer(config, Arc::new(RsaSha256Signer))
    }

    /// Create an exchanger with a custom signing primitive.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Configuration` if the HTTP client cannot be built.
    pub fn with_signer(
        config: TokenExchangeConfig,
        signer: Arc<dyn AssertionSigner>,
    ) -> Result<Self, TokenError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| TokenError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            http_client,
            signer,
            cache: Mutex::new(None),
        })
    }

    /// Sign an assertion and exchange it for a bearer token.
    ///
    /// Returns the token and its expiration time (Unix timestamp).
    #[instrument(skip_all)]
    async fn exchange(&self) -> Result<(SecretString, i64), TokenError> {
        let claims = AssertionClaims::issued_now(
            self.config.credential.issuer.clone(),
            self.config.scope.clone(),
            self.config.token_uri.clone(),
            self.config.assertion_lifetime,
        );
        let assertion = self
            .signer
            .sign(&claims, &self.config.credential.private_key)
            .map_err(|e| {
                warn!(target: "common.token_manager", error = %e, "Assertion signing failed");
                TokenError::Signing(e)
            })?;

        debug!(
            target: "common.token_manager",
            url = %self.config.token_uri,
            scope = %self.config.scope,
            "Exchanging assertion for bearer token"
        );

        let form_body = [
            ("grant_type", JWT_BEARER_GRANT_TYPE),
            ("assertion", assertion.expose_secret()),
        ];

        let response = self
            .http_client
            .post(&self.config.token_uri)
            .form(&form_body)
            .send()
            .await
            .map_err(|e| {
                debug!(target: "common.token_manager", error = %e, "HTTP request failed");
                TokenError::Network(e.to_string())
            })?;

        let status = response.status();

        if status.is_success() {
            let token_response: OAuthTokenResponse = response.json().await.map_err(|e| {
                warn!(target: "common.token_manager", error = %e, "Failed to parse token response");
                TokenError::InvalidResponse(e.to_string())
            })?;

            if token_response.access_token.is_empty() {
                return Err(TokenError::InvalidResponse(
                    "Token endpoint returned an empty access_token".into(),
                ));
            }

            let now = chrono::Utc::now().timestamp();
            #[allow(clippy::cast_possible_wrap)]
            let expires_at = now + token_response.expires_in as i64;

            debug!(
                target: "common.token_manager",
                expires_in_secs = token_response.expires_in,
                "Bearer token acquired"
            );

            Ok((SecretString::from(token_response.access_token), expires_at))
        } else {
            // Body may echo request details; keep it out of normal logs
            let body = response.text().await.unwrap_or_else(|e| {
                trace!(target: "common.token_manager", error = %e, "Failed to read error response body");
                String::new()
            });
            warn!(
                target: "common.token_manager",
                status = %status,
                "Token endpoint rejected assertion"
            );
            trace!(
                target: "common.token_manager",
                body = %body,
                "Token endpoint error response body"
            );
            Err(TokenError::Upstream {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait::async_trait]
impl AccessTokenSource for TokenExchanger {
    #[instrument(skip_all)]
    async fn access_token(&self) -> Result<SecretString, TokenError> {
        // Held across the exchange: concurrent callers queue here and then
        // observe the freshly cached token.
        let mut cache = self.cache.lock().await;

        if let Some(cached) = cache.as_ref() {
            let now = chrono::Utc::now().timestamp();
            if !needs_refresh(cached.expires_at, now, self.config.refresh_threshold) {
                trace!(target: "common.token_manager", "Using cached bearer token");
                return Ok(cached.token.clone());
            }
        }

        let (token, expires_at) = self.exchange().await?;
        let first = cache.is_none();
        *cache = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });

        if first {
            info!(target: "common.token_manager", "Initial bearer token acquired");
        } else {
            debug!(target: "common.token_manager", "Bearer token refreshed");
        }

        Ok(token)
    }

    async fn invalidate(&self) {
        if self.cache.lock().await.take().is_some() {
            debug!(target: "common.token_manager", "Cached bearer token discarded");
        }
    }
}

/// Whether a token expiring at `expires_at` must be replaced at `now`.
fn needs_refresh(expires_at: i64, now: i64, refresh_threshold: Duration) -> bool {
    #[allow(clippy::cast_possible_wrap)]
    let threshold_secs = refresh_threshold.as_secs() as i64;
    expires_at - now <= threshold_secs + CLOCK_DRIFT_MARGIN_SECS
}

// =============================================================================
// Test Token Source
// =============================================================================

/// Fixed-value [`AccessTokenSource`] that counts how often it was asked.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug)]
pub struct StaticTokenSource {
    token: SecretString,
    calls: std::sync::atomic::AtomicUsize,
    invalidations: std::sync::atomic::AtomicUsize,
}

#[cfg(any(test, feature = "test-utils"))]
impl StaticTokenSource {
    #[must_use]
    pub fn new(token: &str) -> Self {
        Self {
            token: SecretString::from(token),
            calls: std::sync::atomic::AtomicUsize::new(0),
            invalidations: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Number of `access_token` calls made so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Number of `invalidate` calls made so far.
    #[must_use]
    pub fn invalidation_count(&self) -> usize {
        self.invalidations.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait::async_trait]
impl AccessTokenSource for StaticTokenSource {
    async fn access_token(&self) -> Result<SecretString, TokenError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(self.token.clone())
    }

    async fn invalidate(&self) {
        self.invalidations
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

// =============================================================================
// Tests
// =============================================================================
