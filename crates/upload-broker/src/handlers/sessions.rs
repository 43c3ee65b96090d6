//! Upload session handlers.
//!
//! - `POST /api/v1/uploads/session` - open a resumable session
//! - `OPTIONS /api/v1/uploads/session` - CORS preflight
//!
//! Responses to an allowed origin carry `Access-Control-Allow-Origin` echoing
//! that origin; a rejected origin gets a 403 with no CORS headers.

use crate::errors::BrokerError;
use crate::observability::metrics::record_session_initiation;
use crate::routes::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use common::types::{InitiateUploadRequest, InitiateUploadResponse};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument};

/// Methods advertised in preflight responses.
const ALLOWED_METHODS: &str = "POST, OPTIONS";

/// Request headers advertised in preflight responses.
const ALLOWED_HEADERS: &str = "Content-Type";

/// Preflight cache lifetime in seconds.
const PREFLIGHT_MAX_AGE: &str = "3600";

/// Handler for POST /api/v1/uploads/session
///
/// # Request
///
/// ```json
/// { "fileName": "report.pdf", "mimeType": "application/pdf" }
/// ```
///
/// # Response
///
/// - 200: `{"success": true, "uploadUrl": "..."}`
/// - 400 / 403 / 500 / 502: `{"success": false, "error": "..."}`
#[instrument(skip_all, name = "broker.sessions.create")]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<InitiateUploadRequest>, JsonRejection>,
) -> Response {
    let start = Instant::now();

    let origin = match state.broker.authorize_origin(origin_header(&headers)) {
        Ok(origin) => origin,
        Err(e) => {
            record_session_initiation(e.metric_label(), start.elapsed());
            return e.into_response();
        }
    };

    let result = match payload {
        Ok(Json(request)) => {
            state
                .broker
                .initiate(Some(origin), &request.file_name, &request.mime_type)
                .await
        }
        Err(rejection) => {
            debug!(target: "broker.handlers.sessions", error = %rejection, "Malformed initiation request");
            Err(BrokerError::BadRequest(rejection.body_text()))
        }
    };

    let (label, response) = match result {
        Ok(upload_url) => (
            "success",
            Json(InitiateUploadResponse::session(upload_url)).into_response(),
        ),
        Err(e) => (e.metric_label(), e.into_response()),
    };
    record_session_initiation(label, start.elapsed());

    with_cors(response, origin)
}

/// Handler for OPTIONS /api/v1/uploads/session
#[instrument(skip_all, name = "broker.sessions.preflight")]
pub async fn session_preflight(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let origin = match state.broker.authorize_origin(origin_header(&headers)) {
        Ok(origin) => origin,
        Err(e) => return e.into_response(),
    };

    let mut response = with_cors(StatusCode::NO_CONTENT.into_response(), origin);
    let response_headers = response.headers_mut();
    response_headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    response_headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOWED_HEADERS),
    );
    response_headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static(PREFLIGHT_MAX_AGE),
    );
    response
}

/// The `Origin` header, if present and valid visible ASCII.
fn origin_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
}

/// Attach the CORS headers for a validated origin.
fn with_cors(mut response: Response, origin: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(origin) {
        let headers = response.headers_mut();
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
        headers.insert(header::VARY, HeaderValue::from_static("Origin"));
    }
    response
}
