//! Upload broker client.
//!
//! Asks the broker for a fresh resumable session URL. The broker holds the
//! service credential; this side only presents its configured origin.

use crate::errors::UploadError;
use common::types::{InitiateUploadRequest, InitiateUploadResponse};
use reqwest::header::ORIGIN;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Obtains resumable session URLs.
#[async_trait::async_trait]
pub trait SessionInitiator: Send + Sync {
    /// Open a session for `file_name` and return its URL.
    ///
    /// # Errors
    ///
    /// - `UploadError::Initiation` - the broker refused or reported failure
    /// - `UploadError::Network` - the broker could not be reached
    async fn initiate(&self, file_name: &str, mime_type: &str) -> Result<String, UploadError>;
}

/// [`SessionInitiator`] calling the broker's HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpBrokerClient {
    http_client: Client,
    endpoint: String,
    origin: String,
}

impl HttpBrokerClient {
    /// Create a client posting to `endpoint` as `origin`.
    ///
    /// # Errors
    ///
    /// Returns `UploadError::Configuration` if the HTTP client fails to build.
    pub fn new(endpoint: String, origin: String, timeout: Duration) -> Result<Self, UploadError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UploadError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            endpoint,
            origin,
        })
    }
}

#[async_trait::async_trait]
impl SessionInitiator for HttpBrokerClient {
    #[instrument(skip_all, fields(mime_type = %mime_type))]
    async fn initiate(&self, file_name: &str, mime_type: &str) -> Result<String, UploadError> {
        let request = InitiateUploadRequest {
            file_name: file_name.to_string(),
            mime_type: mime_type.to_string(),
        };

        let response = self
            .http_client
            .post(&self.endpoint)
            .header(ORIGIN, &self.origin)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(target: "client.broker", error = %e, "Broker request failed");
                UploadError::Network(e.to_string())
            })?;

        let status = response.status();
        // Error responses carry the same body shape; fall back to the status
        // when the body is something else.
        let body: Option<InitiateUploadResponse> = response.json().await.ok();

        match body {
            Some(InitiateUploadResponse {
                success: true,
                upload_url: Some(url),
                ..
            }) if status.is_success() => {
                debug!(target: "client.broker", "Session URL issued");
                Ok(url)
            }
            Some(InitiateUploadResponse {
                error: Some(message),
                ..
            }) => {
                warn!(target: "client.broker", status = %status, error = %message, "Broker refused initiation");
                Err(UploadError::Initiation(message))
            }
            _ if status.is_success() => Err(UploadError::Initiation(
                "Broker response did not include an upload URL".to_string(),
            )),
            _ => {
                warn!(target: "client.broker", status = %status, "Broker returned unexpected response");
                Err(UploadError::Initiation(format!(
                    "Broker returned status {}",
                    status.as_u16()
                )))
            }
        }
    }
}

/// Mock session initiator module for testing.
pub mod mock {

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock initiator returning scripted outcomes.
    pub struct MockInitiator {
        /// Outcomes to return (cycles through them).
        outcomes: Vec<Result<String, UploadError>>,
        /// Number of calls made.
        call_count: AtomicUsize,
    }

    impl MockInitiator {
        /// Create a mock that always returns `session_url`.
        pub fn returning(session_url: &str) -> Self {
            Self::with_sessions(&[session_url])
        }

        /// Create a mock that returns session URLs in sequence.
        pub fn with_sessions(sessions: &[&str]) -> Self {
            Self::with_outcomes(sessions.iter().map(|s| Ok((*s).to_string())).collect())
        }

        /// Create a mock that returns custom outcomes in sequence.
        pub fn with_outcomes(outcomes: Vec<Result<String, UploadError>>) -> Self {
            Self {
                outcomes,
                call_count: AtomicUsize::new(0),
            }
        }

        /// Create a mock whose every call fails with `message`.
        pub fn failing(message: &str) -> Self {
            Self::with_outcomes(vec![Err(UploadError::Initiation(message.to_string()))])
        }

        /// Get the number of calls made.
        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl SessionInitiator for MockInitiator {
        async fn initiate(&self, _file_name: &str, _mime_type: &str) -> Result<String, UploadError> {
            let count = self.call_count.fetch_add(1, Ordering::SeqCst);

            if self.outcomes.is_empty() {
                return Ok("https://storage.example/upload?upload_id=mock".to_string());
            }

            // Cycle through outcomes
            let idx = count % self.outcomes.len();
            self.outcomes
                .get(idx)
                .cloned()
                .unwrap_or_else(|| Err(UploadError::Initiation("no outcome".to_string())))
        }
    }
}
