//! Test server harness for E2E testing
//!
//! Provides `TestBrokerServer` for spawning real broker instances in tests.
//! The broker runs its production collaborators (JWT-bearer token exchange,
//! HTTP storage client) against a `wiremock` upstream.

use crate::upstream::{storage_upload_url, token_uri, TEST_FOLDER_ID, TEST_ORIGIN_PATTERN};
use common::testing::{TEST_ISSUER, TEST_RSA_PRIVATE_KEY_PEM};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use upload_broker::config::Config;
use upload_broker::routes::{self, AppState};
use upload_broker::services::UploadSessionBroker;
use wiremock::MockServer;

/// Test harness for spawning the upload broker in E2E tests.
///
/// # Example
/// ```rust,ignore
/// let upstream = MockServer::start().await;
/// mount_token_endpoint(&upstream).await;
/// let session = mount_storage_session(&upstream, "s1").await;
///
/// let server = TestBrokerServer::spawn_with_upstream(upstream).await?;
/// // POST {server.url()}/api/v1/uploads/session ... returns `session`
/// ```
pub struct TestBrokerServer {
    addr: SocketAddr,
    config: Config,
    upstream: MockServer,
    _handle: JoinHandle<()>,
}

impl TestBrokerServer {
    /// Spawn a broker against a fresh upstream with no mocks mounted.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with_upstream(MockServer::start().await).await
    }

    /// Spawn a broker whose token and storage endpoints point at `upstream`.
    pub async fn spawn_with_upstream(upstream: MockServer) -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(upstream, HashMap::new()).await
    }

    /// Spawn a broker with extra environment overrides.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Use the fixture RSA key as its service credential
    /// - Start the HTTP server in the background
    pub async fn spawn_with_vars(
        upstream: MockServer,
        overrides: HashMap<String, String>,
    ) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            (
                "ORIGIN_ALLOW_PATTERN".to_string(),
                TEST_ORIGIN_PATTERN.to_string(),
            ),
            ("SERVICE_ACCOUNT_EMAIL".to_string(), TEST_ISSUER.to_string()),
            (
                "SERVICE_ACCOUNT_PRIVATE_KEY".to_string(),
                TEST_RSA_PRIVATE_KEY_PEM.to_string(),
            ),
            ("TOKEN_URI".to_string(), token_uri(&upstream)),
            (
                "STORAGE_UPLOAD_URL".to_string(),
                storage_upload_url(&upstream),
            ),
            (
                "DESTINATION_FOLDER_ID".to_string(),
                TEST_FOLDER_ID.to_string(),
            ),
            ("UPSTREAM_TIMEOUT_SECONDS".to_string(), "5".to_string()),
        ]);
        vars.extend(overrides);

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let broker = UploadSessionBroker::from_config(&config)
            .map_err(|e| anyhow::anyhow!("Failed to build broker: {}", e))?;

        let state = Arc::new(AppState {
            broker: Arc::new(broker),
        });

        // Initialize metrics recorder for test server
        // Note: This may fail if already installed in the test process.
        // In that case, we create a new recorder without installing it globally.
        let metrics_handle = match routes::init_metrics_recorder() {
            Ok(handle) => handle,
            Err(_) => {
                use metrics_exporter_prometheus::PrometheusBuilder;
                let recorder = PrometheusBuilder::new().build_recorder();
                recorder.handle()
            }
        };

        // Build routes using upload-broker's real route builder
        let app = routes::build_routes(state, metrics_handle);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        // Spawn server in background
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            upstream,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the session initiation endpoint URL.
    pub fn session_endpoint(&self) -> String {
        format!("{}/api/v1/uploads/session", self.url())
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the upstream mock (token endpoint, storage API, session URLs).
    pub fn upstream(&self) -> &MockServer {
        &self.upstream
    }
}

impl Drop for TestBrokerServer {
    fn drop(&mut self) {
        // Explicitly abort the HTTP server task to ensure immediate cleanup
        // when the test completes.
        self._handle.abort();
    }
}
