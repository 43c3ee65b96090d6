//! Upstream mocks for the token endpoint and the storage API.
//!
//! One `MockServer` plays both roles. Session URLs handed out by the storage
//! mock point back at the same server, so client tests can mount chunk
//! responses on it too.

use wiremock::matchers::{header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Origin accepted by [`TEST_ORIGIN_PATTERN`].
pub const TEST_ALLOWED_ORIGIN: &str = "https://intake.skiff.test";

/// Origin rejected by [`TEST_ORIGIN_PATTERN`].
pub const TEST_REJECTED_ORIGIN: &str = "https://intake.skiff.test.attacker.example";

/// Allow-list pattern used by test brokers.
pub const TEST_ORIGIN_PATTERN: &str = r"https://([a-z0-9-]+\.)?skiff\.test";

/// Destination folder configured on test brokers.
pub const TEST_FOLDER_ID: &str = "skiff-test-folder";

/// Bearer token issued by the token endpoint mock.
pub const TEST_ACCESS_TOKEN: &str = "ya29.skiff-test-token";

/// Path of the token endpoint mock.
pub const TOKEN_PATH: &str = "/token";

/// Path of the storage session-create mock.
pub const STORAGE_UPLOAD_PATH: &str = "/upload/drive/v3/files";

/// Path prefix of session URLs issued by the storage mock.
pub const SESSION_PATH_PREFIX: &str = "/upload/session/";

/// Token endpoint URL on `server`.
pub fn token_uri(server: &MockServer) -> String {
    format!("{}{}", server.uri(), TOKEN_PATH)
}

/// Storage session-create URL on `server`.
pub fn storage_upload_url(server: &MockServer) -> String {
    format!("{}{}", server.uri(), STORAGE_UPLOAD_PATH)
}

/// Session URL for `session_id` on `server`.
pub fn session_url(server: &MockServer, session_id: &str) -> String {
    format!("{}{}{}", server.uri(), SESSION_PATH_PREFIX, session_id)
}

/// Path (without host) of the session URL for `session_id`.
pub fn session_path(session_id: &str) -> String {
    format!("{SESSION_PATH_PREFIX}{session_id}")
}

/// Token endpoint answering every JWT-bearer grant with [`TEST_ACCESS_TOKEN`].
pub async fn mount_token_endpoint(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": TEST_ACCESS_TOKEN,
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .mount(server)
        .await;
}

/// Token endpoint rejecting every grant with `status`.
pub async fn mount_token_failure(server: &MockServer, status: u16) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(status).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "Invalid JWT Signature."
        })))
        .mount(server)
        .await;
}

/// Storage API opening `session_id` for requests carrying the test token.
///
/// Returns the session URL placed in the `Location` header.
pub async fn mount_storage_session(server: &MockServer, session_id: &str) -> String {
    let url = session_url(server, session_id);
    Mock::given(method("POST"))
        .and(path(STORAGE_UPLOAD_PATH))
        .and(query_param("uploadType", "resumable"))
        .and(header("authorization", format!("Bearer {TEST_ACCESS_TOKEN}").as_str()))
        .respond_with(ResponseTemplate::new(200).insert_header("Location", url.as_str()))
        .mount(server)
        .await;
    url
}

/// Storage API handing out `first` once, then `second` for every later call.
///
/// Returns both session URLs.
pub async fn mount_storage_sessions(
    server: &MockServer,
    first: &str,
    second: &str,
) -> (String, String) {
    let first_url = session_url(server, first);
    let second_url = session_url(server, second);

    Mock::given(method("POST"))
        .and(path(STORAGE_UPLOAD_PATH))
        .respond_with(ResponseTemplate::new(200).insert_header("Location", first_url.as_str()))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(STORAGE_UPLOAD_PATH))
        .respond_with(ResponseTemplate::new(200).insert_header("Location", second_url.as_str()))
        .with_priority(2)
        .mount(server)
        .await;

    (first_url, second_url)
}

/// Storage API rejecting session creation with `status`.
pub async fn mount_storage_failure(server: &MockServer, status: u16) {
    Mock::given(method("POST"))
        .and(path(STORAGE_UPLOAD_PATH))
        .respond_with(ResponseTemplate::new(status).set_body_json(serde_json::json!({
            "error": { "code": status, "message": "File not found: skiff-test-folder" }
        })))
        .mount(server)
        .await;
}

/// Every PUT to any session path completes the upload with 200.
///
/// Catch-all for tests that only care about the initiation leg.
pub async fn mount_session_accepting_all(server: &MockServer) {
    Mock::given(method("PUT"))
        .and(path_regex(r"^/upload/session/.+$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "kind": "drive#file",
            "id": "uploaded-file-id"
        })))
        .with_priority(10)
        .mount(server)
        .await;
}
