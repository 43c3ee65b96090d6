//! Storage API client for opening resumable upload sessions.
//!
//! # Security
//!
//! - The bearer token is sent only in the `Authorization` header and never logged
//! - Error bodies from the storage API are logged at trace level only
//! - Timeouts prevent hanging connections

use crate::errors::BrokerError;
use common::secret::{ExposeSecret, SecretString};
use reqwest::header::{AUTHORIZATION, LOCATION, ORIGIN};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, instrument, trace, warn};

/// Header announcing the content type of the bytes that will follow.
pub const UPLOAD_CONTENT_TYPE_HEADER: &str = "X-Upload-Content-Type";

/// Parameters for one session-create call.
#[derive(Debug, Clone, Copy)]
pub struct SessionRequest<'a> {
    /// Name of the object to create.
    pub file_name: &'a str,

    /// MIME type of the upload.
    pub mime_type: &'a str,

    /// Validated caller origin, forwarded so the session carries CORS rights.
    pub origin: &'a str,
}

/// Metadata body of the session-create call.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileMetadata<'a> {
    name: &'a str,
    parents: [&'a str; 1],
    mime_type: &'a str,
}

/// Opens resumable upload sessions at the storage API.
#[async_trait::async_trait]
pub trait StorageClient: Send + Sync {
    /// Create a session and return its URL.
    ///
    /// # Errors
    ///
    /// - `BrokerError::Upstream` - non-success status or missing `Location`
    /// - `BrokerError::Network` - transport failure or timeout
    async fn create_session(
        &self,
        bearer: &SecretString,
        request: SessionRequest<'_>,
    ) -> Result<String, BrokerError>;
}

/// [`StorageClient`] speaking the resumable-upload protocol over HTTP.
#[derive(Debug, Clone)]
pub struct HttpStorageClient {
    http_client: Client,
    upload_url: String,
    folder_id: String,
}

impl HttpStorageClient {
    /// Create a client for `upload_url` placing objects under `folder_id`.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Configuration` if the HTTP client fails to build.
    pub fn new(upload_url: String, folder_id: String, timeout: Duration) -> Result<Self, BrokerError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                BrokerError::Configuration(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            http_client,
            upload_url,
            folder_id,
        })
    }
}

#[async_trait::async_trait]
impl StorageClient for HttpStorageClient {
    #[instrument(skip_all, fields(mime_type = %request.mime_type))]
    async fn create_session(
        &self,
        bearer: &SecretString,
        request: SessionRequest<'_>,
    ) -> Result<String, BrokerError> {
        let metadata = FileMetadata {
            name: request.file_name,
            parents: [self.folder_id.as_str()],
            mime_type: request.mime_type,
        };

        let response = self
            .http_client
            .post(&self.upload_url)
            .query(&[("uploadType", "resumable")])
            .header(AUTHORIZATION, format!("Bearer {}", bearer.expose_secret()))
            .header(UPLOAD_CONTENT_TYPE_HEADER, request.mime_type)
            .header(ORIGIN, request.origin)
            .json(&metadata)
            .send()
            .await
            .map_err(|e| {
                warn!(target: "broker.services.storage", error = %e, "Session create request failed");
                BrokerError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                target: "broker.services.storage",
                status = %status,
                "Storage API rejected session create"
            );
            trace!(target: "broker.services.storage", body = %body, "Storage API error body");
            return Err(BrokerError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .filter(|value| value.starts_with("https://") || value.starts_with("http://"))
            .map(str::to_string)
            .ok_or_else(|| {
                warn!(
                    target: "broker.services.storage",
                    status = %status,
                    "Session create response has no usable Location header"
                );
                BrokerError::Upstream {
                    status: status.as_u16(),
                    body: "missing or invalid Location header".to_string(),
                }
            })?;

        debug!(target: "broker.services.storage", "Resumable session created");
        Ok(location)
    }
}

/// Mock storage client module for testing.
///
/// This module provides mock implementations of the storage client for use in tests.
pub mod mock {

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock storage client returning fixed session URLs.
    pub struct MockStorageClient {
        /// Session URLs to return (cycles through them).
        sessions: Vec<String>,
        /// Number of calls made.
        call_count: AtomicUsize,
        /// Upstream status to fail with, if any.
        fail_status: Option<u16>,
        /// Number of leading calls that fail with `fail_status`.
        fail_calls: usize,
    }

    impl MockStorageClient {
        /// Create a mock that always returns `session_url`.
        pub fn returning(session_url: &str) -> Self {
            Self::with_sessions(vec![session_url.to_string()])
        }

        /// Create a mock that returns session URLs in sequence.
        pub fn with_sessions(sessions: Vec<String>) -> Self {
            Self {
                sessions,
                call_count: AtomicUsize::new(0),
                fail_status: None,
                fail_calls: 0,
            }
        }

        /// Create a mock that fails with an upstream status.
        pub fn failing(status: u16) -> Self {
            Self {
                sessions: vec![],
                call_count: AtomicUsize::new(0),
                fail_status: Some(status),
                fail_calls: usize::MAX,
            }
        }

        /// Create a mock that fails the first `calls` requests with `status`,
        /// then returns `session_url`.
        pub fn failing_first(status: u16, calls: usize, session_url: &str) -> Self {
            Self {
                sessions: vec![session_url.to_string()],
                call_count: AtomicUsize::new(0),
                fail_status: Some(status),
                fail_calls: calls,
            }
        }

        /// Get the number of calls made.
        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl StorageClient for MockStorageClient {
        async fn create_session(
            &self,
            _bearer: &SecretString,
            _request: SessionRequest<'_>,
        ) -> Result<String, BrokerError> {
            let count = self.call_count.fetch_add(1, Ordering::SeqCst);

            if let Some(status) = self.fail_status.filter(|_| count < self.fail_calls) {
                return Err(BrokerError::Upstream {
                    status,
                    body: "Mock storage error".to_string(),
                });
            }

            if self.sessions.is_empty() {
                return Ok("https://storage.example/upload?upload_id=mock".to_string());
            }

            // Cycle through sessions
            let idx = count % self.sessions.len();
            Ok(self
                .sessions
                .get(idx)
                .cloned()
                .unwrap_or_default())
        }
    }
}
