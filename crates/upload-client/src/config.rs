//! Upload client configuration.
//!
//! Loaded from environment variables and validated before any network
//! activity.

use common::config::is_placeholder;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Chunk sizes must be a multiple of this (256 KiB), except the final chunk.
pub const CHUNK_GRANULARITY: u64 = 256 * 1024;

/// Default chunk size (10 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Default bound on consecutive chunk failures.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default per-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 60;

/// Upload client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Session initiation endpoint of the broker.
    pub broker_url: String,

    /// Origin presented to the broker.
    pub origin: String,

    /// Bytes per chunk PUT.
    pub chunk_size: u64,

    /// Consecutive chunk failures tolerated before giving up.
    pub max_retries: u32,

    /// Deadline applied to every outbound request.
    pub request_timeout: Duration,

    /// Completion notification endpoint, if any.
    pub notify_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Environment variable {0} still holds a placeholder value")]
    PlaceholderValue(String),

    #[error("Invalid URL configuration: {0}")]
    InvalidUrl(String),

    #[error("Invalid chunk size configuration: {0}")]
    InvalidChunkSize(String),

    #[error("Invalid retry configuration: {0}")]
    InvalidMaxRetries(String),

    #[error("Invalid request timeout configuration: {0}")]
    InvalidRequestTimeout(String),
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or invalid.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let broker_url = required_url(vars, "BROKER_URL")?;
        let origin = required_url(vars, "UPLOAD_ORIGIN")?;

        let chunk_size = match vars.get("CHUNK_SIZE_BYTES") {
            Some(value_str) => {
                let value: u64 = value_str.parse().map_err(|e| {
                    ConfigError::InvalidChunkSize(format!(
                        "CHUNK_SIZE_BYTES must be a valid integer, got '{value_str}': {e}"
                    ))
                })?;
                if value == 0 || value % CHUNK_GRANULARITY != 0 {
                    return Err(ConfigError::InvalidChunkSize(format!(
                        "CHUNK_SIZE_BYTES must be a positive multiple of {CHUNK_GRANULARITY}, got {value}"
                    )));
                }
                value
            }
            None => DEFAULT_CHUNK_SIZE,
        };

        let max_retries = match vars.get("MAX_RETRIES") {
            Some(value_str) => value_str.parse().map_err(|e| {
                ConfigError::InvalidMaxRetries(format!(
                    "MAX_RETRIES must be a non-negative integer, got '{value_str}': {e}"
                ))
            })?,
            None => DEFAULT_MAX_RETRIES,
        };

        let timeout_secs = match vars.get("REQUEST_TIMEOUT_SECONDS") {
            Some(value_str) => {
                let value: u64 = value_str.parse().map_err(|e| {
                    ConfigError::InvalidRequestTimeout(format!(
                        "REQUEST_TIMEOUT_SECONDS must be a valid integer, got '{value_str}': {e}"
                    ))
                })?;
                if value == 0 {
                    return Err(ConfigError::InvalidRequestTimeout(
                        "REQUEST_TIMEOUT_SECONDS must be positive".to_string(),
                    ));
                }
                value
            }
            None => DEFAULT_REQUEST_TIMEOUT_SECONDS,
        };

        let notify_url = match vars.get("NOTIFY_URL").filter(|v| !v.trim().is_empty()) {
            Some(_) => Some(required_url(vars, "NOTIFY_URL")?),
            None => None,
        };

        Ok(Self {
            broker_url,
            origin,
            chunk_size,
            max_retries,
            request_timeout: Duration::from_secs(timeout_secs),
            notify_url,
        })
    }
}

fn required_url(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    let value = vars
        .get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))?;
    if is_placeholder(value) {
        return Err(ConfigError::PlaceholderValue(name.to_string()));
    }
    if !value.starts_with("https://") && !value.starts_with("http://") {
        return Err(ConfigError::InvalidUrl(format!(
            "{name} must be an http(s) URL, got '{value}'"
        )));
    }
    Ok(value.to_string())
}
