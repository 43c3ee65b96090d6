//! Upload broker error types.
//!
//! All errors map to HTTP status codes via the `IntoResponse` impl and render
//! as `{"success": false, "error": "..."}`. Messages returned to callers are
//! generic; upstream details are logged server-side.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::token_manager::TokenError;
use common::types::InitiateUploadResponse;
use thiserror::Error;

/// Upload broker error type.
///
/// Maps to HTTP status codes:
/// - BadRequest: 400 Bad Request
/// - Authorization: 403 Forbidden
/// - Upstream, Network: 502 Bad Gateway
/// - Configuration, Signing: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Origin not allowed: {0}")]
    Authorization(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Assertion signing failed: {0}")]
    Signing(String),

    #[error("Upstream returned status {status}")]
    Upstream { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),
}

impl BrokerError {
    /// Returns the HTTP status code for this error (for metrics recording).
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            BrokerError::BadRequest(_) => 400,
            BrokerError::Authorization(_) => 403,
            BrokerError::Upstream { .. } | BrokerError::Network(_) => 502,
            BrokerError::Configuration(_) | BrokerError::Signing(_) => 500,
        }
    }

    /// Bounded metric label for this error.
    #[must_use]
    pub fn metric_label(&self) -> &'static str {
        match self {
            BrokerError::BadRequest(_) => "bad_request",
            BrokerError::Authorization(_) => "rejected",
            BrokerError::Upstream { .. } => "upstream_error",
            BrokerError::Network(_) => "network_error",
            BrokerError::Configuration(_) | BrokerError::Signing(_) => "internal_error",
        }
    }
}

impl From<TokenError> for BrokerError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Signing(e) => BrokerError::Signing(e.to_string()),
            TokenError::Upstream { status, body } => BrokerError::Upstream { status, body },
            TokenError::Network(reason) => BrokerError::Network(reason),
            // The endpoint answered successfully but with an unusable body
            TokenError::InvalidResponse(reason) => BrokerError::Upstream {
                status: 200,
                body: reason,
            },
            TokenError::Configuration(reason) => BrokerError::Configuration(reason),
        }
    }
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            BrokerError::Configuration(reason) => {
                tracing::error!(target: "broker.errors", reason = %reason, "Broker misconfigured");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Upload service is not configured correctly".to_string(),
                )
            }
            BrokerError::Authorization(_) => {
                (StatusCode::FORBIDDEN, "Origin not allowed".to_string())
            }
            BrokerError::BadRequest(reason) => (StatusCode::BAD_REQUEST, reason.clone()),
            BrokerError::Signing(reason) => {
                tracing::error!(target: "broker.errors", reason = %reason, "Assertion signing failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to authorize upload".to_string(),
                )
            }
            BrokerError::Upstream { status, body } => {
                tracing::warn!(target: "broker.errors", upstream_status = status, "Upstream rejected request");
                tracing::trace!(target: "broker.errors", body = %body, "Upstream error body");
                (
                    StatusCode::BAD_GATEWAY,
                    format!("Upstream service returned status {status}"),
                )
            }
            BrokerError::Network(reason) => {
                tracing::warn!(target: "broker.errors", reason = %reason, "Upstream unreachable");
                (
                    StatusCode::BAD_GATEWAY,
                    "Upstream service unreachable".to_string(),
                )
            }
        };

        (status, Json(InitiateUploadResponse::failure(message))).into_response()
    }
}
