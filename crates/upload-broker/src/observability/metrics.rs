//! Metrics definitions for the upload broker.
//!
//! All metrics follow Prometheus naming conventions:
//! - `broker_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded by code:
//! - `status` on initiations: `success`, `rejected`, `bad_request`,
//!   `upstream_error`, `network_error`, `internal_error`
//! - `status` on token exchanges: `success`, `error`

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Initiation spans a token exchange (when not cached) plus a storage call
        .set_buckets_for_metric(
            Matcher::Prefix("broker_session_initiation".to_string()),
            &[
                0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set session initiation buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// Session Initiation Metrics
// ============================================================================

/// Record a session initiation outcome and its duration.
///
/// Metric: `broker_session_initiations_total`, `broker_session_initiation_duration_seconds`
/// Labels: `status`
pub fn record_session_initiation(status: &'static str, duration: Duration) {
    histogram!("broker_session_initiation_duration_seconds",
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("broker_session_initiations_total",
        "status" => status
    )
    .increment(1);
}

// ============================================================================
// Token Request Metrics
// ============================================================================

/// Record a bearer token request outcome.
///
/// Counts token requests made by the broker, cache hits included.
///
/// Metric: `broker_token_requests_total`
/// Labels: `status`
pub fn record_token_request(success: bool) {
    let status = if success { "success" } else { "error" };
    counter!("broker_token_requests_total",
        "status" => status
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    // These execute the recording functions against the global no-op
    // recorder; values are asserted through /metrics in integration tests.

    #[test]
    fn test_record_session_initiation() {
        record_session_initiation("success", Duration::from_millis(120));
        record_session_initiation("rejected", Duration::from_micros(40));
        record_session_initiation("upstream_error", Duration::from_millis(900));
    }

    #[test]
    fn test_record_token_request() {
        record_token_request(true);
        record_token_request(false);
    }
}
