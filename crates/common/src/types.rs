//! Wire types shared by the upload broker and the upload client.
//!
//! Field names are camelCase on the wire to match the browser-facing API.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an upload task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadTaskId(pub Uuid);

impl UploadTaskId {
    /// Create a new random task ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UploadTaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UploadTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Body of `POST /api/v1/uploads/session`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateUploadRequest {
    /// Name of the object to create at the destination.
    pub file_name: String,

    /// MIME type of the content that will be uploaded.
    pub mime_type: String,
}

/// Response of `POST /api/v1/uploads/session`.
///
/// Exactly one of `upload_url` / `error` is set, matching `success`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateUploadResponse {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InitiateUploadResponse {
    /// Successful initiation carrying the session URL.
    #[must_use]
    pub fn session(upload_url: String) -> Self {
        Self {
            success: true,
            upload_url: Some(upload_url),
            error: None,
        }
    }

    /// Failed initiation carrying a caller-safe message.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            upload_url: None,
            error: Some(message.into()),
        }
    }
}

/// Body sent to the completion notification collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    pub file_name: String,
}

/// Outcome reported by the completion notification collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationOutcome {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NotificationOutcome {
    #[must_use]
    pub fn delivered() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}
