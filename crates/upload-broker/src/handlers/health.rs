//! Health check handler.

use axum::Json;
use serde::Serialize;

/// Liveness response body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Liveness probe.
///
/// The broker holds no connections of its own, so being able to answer is
/// the whole check.
#[tracing::instrument(skip_all, name = "broker.health.check")]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}
