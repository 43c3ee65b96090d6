//! Upload broker configuration.
//!
//! Configuration is loaded from environment variables and validated eagerly,
//! so a misconfigured broker fails at startup rather than on the first
//! initiation request. The service credential is redacted in Debug output.

use common::config::{is_placeholder, CredentialError, ServiceCredential};
use common::jwt::MAX_ASSERTION_LIFETIME;
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default server bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8090";

/// Default OAuth token endpoint.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Default scope requested for storage access.
pub const DEFAULT_STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

/// Default resumable-upload endpoint of the storage API.
pub const DEFAULT_STORAGE_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";

/// Default assertion lifetime in seconds (the token endpoint's maximum).
pub const DEFAULT_TOKEN_LIFETIME_SECONDS: u64 = 3600;

/// Default timeout for outbound token and storage requests.
pub const DEFAULT_UPSTREAM_TIMEOUT_SECONDS: u64 = 10;

/// Upload broker configuration.
#[derive(Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:8090").
    pub bind_address: String,

    /// Regex the caller's `Origin` header must match in full.
    pub origin_allow_pattern: String,

    /// Identity used to sign token assertions.
    pub credential: ServiceCredential,

    /// OAuth token endpoint; also the assertion audience.
    pub token_uri: String,

    /// Scope requested for the bearer token.
    pub storage_scope: String,

    /// Resumable-upload endpoint of the storage API.
    pub storage_upload_url: String,

    /// Folder every created object is placed in.
    pub destination_folder_id: String,

    /// Assertion lifetime in seconds (1-3600).
    pub token_lifetime_seconds: u64,

    /// Timeout for outbound token and storage requests.
    pub upstream_timeout_seconds: u64,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("origin_allow_pattern", &self.origin_allow_pattern)
            .field("credential", &self.credential)
            .field("token_uri", &self.token_uri)
            .field("storage_scope", &self.storage_scope)
            .field("storage_upload_url", &self.storage_upload_url)
            .field("destination_folder_id", &self.destination_folder_id)
            .field("token_lifetime_seconds", &self.token_lifetime_seconds)
            .field("upstream_timeout_seconds", &self.upstream_timeout_seconds)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Environment variable {0} still holds a placeholder value")]
    PlaceholderValue(String),

    #[error("Invalid origin allow pattern: {0}")]
    InvalidOriginPattern(String),

    #[error("Invalid URL configuration: {0}")]
    InvalidUrl(String),

    #[error("Invalid token lifetime configuration: {0}")]
    InvalidTokenLifetime(String),

    #[error("Invalid upstream timeout configuration: {0}")]
    InvalidUpstreamTimeout(String),

    #[error("Invalid service credential: {0}")]
    Credential(#[from] CredentialError),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing, holds a
    /// placeholder, or fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing, holds a
    /// placeholder, or fails validation.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let origin_allow_pattern = required(vars, "ORIGIN_ALLOW_PATTERN")?;
        regex::Regex::new(&origin_allow_pattern)
            .map_err(|e| ConfigError::InvalidOriginPattern(e.to_string()))?;

        let credential = load_credential(vars)?;

        let token_uri = url_or_default(vars, "TOKEN_URI", DEFAULT_TOKEN_URI)?;
        let storage_upload_url =
            url_or_default(vars, "STORAGE_UPLOAD_URL", DEFAULT_STORAGE_UPLOAD_URL)?;

        let storage_scope = vars
            .get("STORAGE_SCOPE")
            .cloned()
            .unwrap_or_else(|| DEFAULT_STORAGE_SCOPE.to_string());
        if is_placeholder(&storage_scope) {
            return Err(ConfigError::PlaceholderValue("STORAGE_SCOPE".to_string()));
        }

        let destination_folder_id = required(vars, "DESTINATION_FOLDER_ID")?;

        // Parse assertion lifetime with validation
        let token_lifetime_seconds = if let Some(value_str) = vars.get("TOKEN_LIFETIME_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidTokenLifetime(format!(
                    "TOKEN_LIFETIME_SECONDS must be a valid integer, got '{value_str}': {e}"
                ))
            })?;

            let max = MAX_ASSERTION_LIFETIME.as_secs();
            if value == 0 || value > max {
                return Err(ConfigError::InvalidTokenLifetime(format!(
                    "TOKEN_LIFETIME_SECONDS must be between 1 and {max}, got {value}"
                )));
            }
            value
        } else {
            DEFAULT_TOKEN_LIFETIME_SECONDS
        };

        let upstream_timeout_seconds =
            if let Some(value_str) = vars.get("UPSTREAM_TIMEOUT_SECONDS") {
                let value: u64 = value_str.parse().map_err(|e| {
                    ConfigError::InvalidUpstreamTimeout(format!(
                        "UPSTREAM_TIMEOUT_SECONDS must be a valid integer, got '{value_str}': {e}"
                    ))
                })?;
                if value == 0 {
                    return Err(ConfigError::InvalidUpstreamTimeout(
                        "UPSTREAM_TIMEOUT_SECONDS must be positive".to_string(),
                    ));
                }
                value
            } else {
                DEFAULT_UPSTREAM_TIMEOUT_SECONDS
            };

        Ok(Config {
            bind_address,
            origin_allow_pattern,
            credential,
            token_uri,
            storage_scope,
            storage_upload_url,
            destination_folder_id,
            token_lifetime_seconds,
            upstream_timeout_seconds,
        })
    }
}

/// Fetch a required, non-empty, non-placeholder variable.
fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    let value = vars
        .get(name)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))?;
    if is_placeholder(value) {
        return Err(ConfigError::PlaceholderValue(name.to_string()));
    }
    Ok(value.clone())
}

fn url_or_default(
    vars: &HashMap<String, String>,
    name: &str,
    default: &str,
) -> Result<String, ConfigError> {
    let value = vars.get(name).cloned().unwrap_or_else(|| default.to_string());
    if is_placeholder(&value) {
        return Err(ConfigError::PlaceholderValue(name.to_string()));
    }
    if !value.starts_with("https://") && !value.starts_with("http://") {
        return Err(ConfigError::InvalidUrl(format!(
            "{name} must be an http(s) URL, got '{value}'"
        )));
    }
    Ok(value)
}

/// Credential from a key file, or from explicit email + key variables.
///
/// The key file wins when both forms are present.
fn load_credential(vars: &HashMap<String, String>) -> Result<ServiceCredential, ConfigError> {
    if let Some(path) = vars.get("SERVICE_ACCOUNT_KEY_FILE").filter(|p| !p.is_empty()) {
        return Ok(ServiceCredential::from_file(path)?);
    }

    let email = required(vars, "SERVICE_ACCOUNT_EMAIL")?;
    let private_key = vars
        .get("SERVICE_ACCOUNT_PRIVATE_KEY")
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar("SERVICE_ACCOUNT_PRIVATE_KEY".to_string()))?;

    let credential = ServiceCredential::new(email, SecretString::from(private_key.clone()));
    credential.validate()?;
    Ok(credential)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;
    use common::testing::{TEST_ISSUER, TEST_RSA_PRIVATE_KEY_PEM};
    use std::io::Write;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            (
                "ORIGIN_ALLOW_PATTERN".to_string(),
                r"https://([a-z0-9-]+\.)?skiff\.example".to_string(),
            ),
            ("SERVICE_ACCOUNT_EMAIL".to_string(), TEST_ISSUER.to_string()),
            (
                "SERVICE_ACCOUNT_PRIVATE_KEY".to_string(),
                TEST_RSA_PRIVATE_KEY_PEM.to_string(),
            ),
            ("DESTINATION_FOLDER_ID".to_string(), "1AbCdEfGhIjK".to_string()),
        ])
    }

    #[test]
    fn test_from_vars_defaults() {
        let config = Config::from_vars(&base_vars()).unwrap();

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.token_uri, DEFAULT_TOKEN_URI);
        assert_eq!(config.storage_scope, DEFAULT_STORAGE_SCOPE);
        assert_eq!(config.storage_upload_url, DEFAULT_STORAGE_UPLOAD_URL);
        assert_eq!(config.token_lifetime_seconds, 3600);
        assert_eq!(config.upstream_timeout_seconds, 10);
        assert_eq!(config.credential.issuer, TEST_ISSUER);
    }

    #[test]
    fn test_from_vars_overrides() {
        let mut vars = base_vars();
        vars.insert("BIND_ADDRESS".to_string(), "127.0.0.1:9000".to_string());
        vars.insert("TOKEN_URI".to_string(), "http://localhost:1234/token".to_string());
        vars.insert("TOKEN_LIFETIME_SECONDS".to_string(), "600".to_string());
        vars.insert("UPSTREAM_TIMEOUT_SECONDS".to_string(), "3".to_string());

        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.token_uri, "http://localhost:1234/token");
        assert_eq!(config.token_lifetime_seconds, 600);
        assert_eq!(config.upstream_timeout_seconds, 3);
    }

    #[test]
    fn test_missing_origin_pattern() {
        let mut vars = base_vars();
        vars.remove("ORIGIN_ALLOW_PATTERN");

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(name)) if name == "ORIGIN_ALLOW_PATTERN"));
    }

    #[test]
    fn test_invalid_origin_pattern() {
        let mut vars = base_vars();
        vars.insert("ORIGIN_ALLOW_PATTERN".to_string(), "https://(unclosed".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidOriginPattern(_))));
    }

    #[test]
    fn test_missing_folder() {
        let mut vars = base_vars();
        vars.remove("DESTINATION_FOLDER_ID");

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(name)) if name == "DESTINATION_FOLDER_ID"));
    }

    #[test]
    fn test_placeholder_folder_rejected() {
        let mut vars = base_vars();
        vars.insert("DESTINATION_FOLDER_ID".to_string(), "YOUR_FOLDER_ID".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::PlaceholderValue(name)) if name == "DESTINATION_FOLDER_ID"));
    }

    #[test]
    fn test_placeholder_endpoint_rejected() {
        let mut vars = base_vars();
        vars.insert("TOKEN_URI".to_string(), "<token endpoint>".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::PlaceholderValue(name)) if name == "TOKEN_URI"));
    }

    #[test]
    fn test_non_http_url_rejected() {
        let mut vars = base_vars();
        vars.insert("STORAGE_UPLOAD_URL".to_string(), "ftp://storage.example".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn test_missing_credential() {
        let mut vars = base_vars();
        vars.remove("SERVICE_ACCOUNT_PRIVATE_KEY");

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(name)) if name == "SERVICE_ACCOUNT_PRIVATE_KEY"));
    }

    #[test]
    fn test_placeholder_private_key_rejected() {
        let mut vars = base_vars();
        vars.insert(
            "SERVICE_ACCOUNT_PRIVATE_KEY".to_string(),
            "changeme".to_string(),
        );

        let result = Config::from_vars(&vars);
        assert!(matches!(
            result,
            Err(ConfigError::Credential(CredentialError::Placeholder("private_key")))
        ));
    }

    #[test]
    fn test_credential_from_key_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let document = serde_json::json!({
            "type": "service_account",
            "client_email": "file-uploader@skiff-test.iam.gserviceaccount.com",
            "private_key": TEST_RSA_PRIVATE_KEY_PEM,
        });
        file.write_all(document.to_string().as_bytes()).unwrap();

        let mut vars = base_vars();
        vars.insert(
            "SERVICE_ACCOUNT_KEY_FILE".to_string(),
            file.path().to_string_lossy().into_owned(),
        );

        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(
            config.credential.issuer,
            "file-uploader@skiff-test.iam.gserviceaccount.com"
        );
        assert_eq!(
            config.credential.private_key.expose_secret(),
            TEST_RSA_PRIVATE_KEY_PEM
        );
    }

    #[test]
    fn test_unreadable_key_file() {
        let mut vars = base_vars();
        vars.insert(
            "SERVICE_ACCOUNT_KEY_FILE".to_string(),
            "/nonexistent/skiff-key.json".to_string(),
        );

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::Credential(CredentialError::Io(_)))));
    }

    #[test]
    fn test_token_lifetime_bounds() {
        for invalid in ["0", "3601", "-5", "abc"] {
            let mut vars = base_vars();
            vars.insert("TOKEN_LIFETIME_SECONDS".to_string(), invalid.to_string());
            let result = Config::from_vars(&vars);
            assert!(
                matches!(result, Err(ConfigError::InvalidTokenLifetime(_))),
                "expected rejection of {invalid}"
            );
        }

        let mut vars = base_vars();
        vars.insert("TOKEN_LIFETIME_SECONDS".to_string(), "1".to_string());
        assert_eq!(Config::from_vars(&vars).unwrap().token_lifetime_seconds, 1);
    }

    #[test]
    fn test_zero_upstream_timeout_rejected() {
        let mut vars = base_vars();
        vars.insert("UPSTREAM_TIMEOUT_SECONDS".to_string(), "0".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidUpstreamTimeout(_))));
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let config = Config::from_vars(&base_vars()).unwrap();
        let debug_str = format!("{config:?}");

        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("BEGIN PRIVATE KEY"));
        assert!(debug_str.contains("1AbCdEfGhIjK"));
    }
}
