//! Upload session broker.
//!
//! Turns a browser's request into a resumable session URL without the caller
//! ever seeing the service credential or the bearer token:
//!
//! ```text
//! origin check -> input check -> bearer token -> storage session -> URL
//! ```
//!
//! The origin check runs first; a rejected origin never reaches the token
//! source.

use crate::config::Config;
use crate::errors::BrokerError;
use crate::observability::metrics::record_token_request;
use crate::services::origin::{OriginPolicy, PatternOriginPolicy};
use crate::services::storage_client::{HttpStorageClient, SessionRequest, StorageClient};
use common::secret::SecretString;
use common::token_manager::{AccessTokenSource, TokenExchangeConfig, TokenExchanger};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Issues resumable upload sessions on behalf of allowed origins.
pub struct UploadSessionBroker {
    origin_policy: Arc<dyn OriginPolicy>,
    token_source: Arc<dyn AccessTokenSource>,
    storage: Arc<dyn StorageClient>,
}

impl UploadSessionBroker {
    /// Assemble a broker from its collaborators.
    pub fn new(
        origin_policy: Arc<dyn OriginPolicy>,
        token_source: Arc<dyn AccessTokenSource>,
        storage: Arc<dyn StorageClient>,
    ) -> Self {
        Self {
            origin_policy,
            token_source,
            storage,
        }
    }

    /// Build the production broker: regex origin policy, JWT-bearer token
    /// exchange, HTTP storage client.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Configuration` if a collaborator cannot be built.
    pub fn from_config(config: &Config) -> Result<Self, BrokerError> {
        let origin_policy = PatternOriginPolicy::new(&config.origin_allow_pattern)
            .map_err(|e| BrokerError::Configuration(format!("Invalid origin pattern: {e}")))?;

        let timeout = Duration::from_secs(config.upstream_timeout_seconds);

        let exchange_config = TokenExchangeConfig::new(
            config.token_uri.clone(),
            config.storage_scope.clone(),
            config.credential.clone(),
        )
        .with_assertion_lifetime(Duration::from_secs(config.token_lifetime_seconds))
        .with_http_timeout(timeout);
        let token_source = TokenExchanger::new(exchange_config)?;

        let storage = HttpStorageClient::new(
            config.storage_upload_url.clone(),
            config.destination_folder_id.clone(),
            timeout,
        )?;

        Ok(Self::new(
            Arc::new(origin_policy),
            Arc::new(token_source),
            Arc::new(storage),
        ))
    }

    /// Validate the caller's origin.
    ///
    /// Returns the origin on success so it can be echoed in CORS headers.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Authorization` if the origin is absent or not
    /// allowed.
    pub fn authorize_origin<'a>(&self, origin: Option<&'a str>) -> Result<&'a str, BrokerError> {
        match origin {
            Some(origin) if self.origin_policy.is_allowed(origin) => Ok(origin),
            Some(origin) => {
                warn!(target: "broker.services.broker", origin = %origin, "Origin rejected");
                Err(BrokerError::Authorization(origin.to_string()))
            }
            None => {
                warn!(target: "broker.services.broker", "Request without Origin header rejected");
                Err(BrokerError::Authorization("missing Origin header".to_string()))
            }
        }
    }

    async fn bearer_token(&self) -> Result<SecretString, BrokerError> {
        let bearer = self.token_source.access_token().await;
        record_token_request(bearer.is_ok());
        bearer.map_err(|e| {
            warn!(target: "broker.services.broker", error = %e, "Bearer token unavailable");
            BrokerError::from(e)
        })
    }

    /// Open a resumable upload session for one file.
    ///
    /// # Errors
    ///
    /// - `Authorization` - origin absent or not allowed (no token is minted)
    /// - `BadRequest` - empty file name or MIME type
    /// - `Signing` / `Configuration` - the credential cannot be used
    /// - `Upstream` / `Network` - token endpoint or storage API failure
    #[instrument(skip_all)]
    pub async fn initiate(
        &self,
        origin: Option<&str>,
        file_name: &str,
        mime_type: &str,
    ) -> Result<String, BrokerError> {
        let origin = self.authorize_origin(origin)?;

        if file_name.trim().is_empty() {
            return Err(BrokerError::BadRequest("fileName must not be empty".to_string()));
        }
        if mime_type.trim().is_empty() {
            return Err(BrokerError::BadRequest("mimeType must not be empty".to_string()));
        }

        debug!(target: "broker.services.broker", mime_type = %mime_type, "Requesting storage session");

        let request = SessionRequest {
            file_name,
            mime_type,
            origin,
        };
        let bearer = self.bearer_token().await?;
        let session_url = match self.storage.create_session(&bearer, request).await {
            // A cached token the storage API no longer accepts: mint one more
            // and try once with it.
            Err(BrokerError::Upstream { status: 401, .. }) => {
                warn!(target: "broker.services.broker", "Storage rejected bearer token, refreshing");
                self.token_source.invalidate().await;
                let bearer = self.bearer_token().await?;
                self.storage.create_session(&bearer, request).await?
            }
            result => result?,
        };

        info!(target: "broker.services.broker", origin = %origin, "Upload session issued");
        Ok(session_url)
    }
}
