//! # Broker Test Utilities
//!
//! Shared test utilities for the upload broker and the upload client.
//!
//! This crate provides:
//! - Deterministic credential fixtures (fixed RSA key, issuer)
//! - Upstream mocks for the token endpoint and the storage API (`wiremock`)
//! - Server test harness (`TestBrokerServer` for E2E tests)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use broker_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let server = TestBrokerServer::spawn().await?;
//!
//!     let response = reqwest::Client::new()
//!         .post(format!("{}/api/v1/uploads/session", server.url()))
//!         .header("Origin", TEST_ALLOWED_ORIGIN)
//!         .json(&serde_json::json!({"fileName": "a.txt", "mimeType": "text/plain"}))
//!         .send()
//!         .await?;
//!
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod server_harness;
pub mod upstream;

// Re-export commonly used items
pub use common::testing::{test_credential, TEST_ISSUER, TEST_RSA_PRIVATE_KEY_PEM};
pub use server_harness::*;
pub use upstream::*;
