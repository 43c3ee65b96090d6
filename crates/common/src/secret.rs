//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for every sensitive value in Skiff:
//! the service credential's private key, minted bearer tokens, and the signed
//! assertions exchanged for them.
//!
//! `SecretString` implements `Debug` with redaction, so a struct that derives
//! `Debug` over a secret field still prints safely through `{:?}` or tracing.
//! Secrets are zeroized on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct Session {
//!     upload_url: String,
//!     bearer: SecretString,
//! }
//!
//! let session = Session {
//!     upload_url: "https://storage.example/upload?id=1".to_string(),
//!     bearer: SecretString::from("ya29.token"),
//! };
//!
//! // Debug output redacts the bearer token
//! assert!(!format!("{session:?}").contains("ya29.token"));
//!
//! // Reading the value requires an explicit call
//! let header = format!("Bearer {}", session.bearer.expose_secret());
//! # assert_eq!(header, "Bearer ya29.token");
//! ```
//!
//! # Skiff Usage Guidelines
//!
//! Use `SecretString` for:
//! - Service account private keys (PEM text)
//! - Bearer tokens returned by the token endpoint
//! - Signed JWT assertions while they are in flight
//!
//! Never place a `SecretString` in a span field or event; log the fact that a
//! token was minted, not its value.

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};
