//! HTTP routes for the upload broker.
//!
//! Defines the Axum router and application state.

use crate::handlers;
use crate::services::UploadSessionBroker;
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

pub use crate::observability::metrics::init_metrics_recorder;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session broker.
    pub broker: Arc<UploadSessionBroker>,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health` - Liveness probe
/// - `/metrics` - Prometheus metrics endpoint (public, unversioned)
/// - `/api/v1/uploads/session` - Session initiation (POST) and CORS preflight (OPTIONS)
/// - TraceLayer for request logging
/// - 30 second request timeout
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/api/v1/uploads/session",
            post(handlers::create_session).options(handlers::session_preflight),
        )
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    api_routes
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::services::storage_client::mock::MockStorageClient;
    use crate::services::PatternOriginPolicy;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use common::token_manager::StaticTokenSource;
    use http_body_util::BodyExt;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    const ALLOWED: &str = "https://intake.skiff.example";
    const SESSION_URL: &str = "https://storage.example/upload?upload_id=route-test";

    struct Fixture {
        router: Router,
        tokens: Arc<StaticTokenSource>,
        storage: Arc<MockStorageClient>,
    }

    fn fixture() -> Fixture {
        let tokens = Arc::new(StaticTokenSource::new("ya29.route"));
        let storage = Arc::new(MockStorageClient::returning(SESSION_URL));
        let broker = UploadSessionBroker::new(
            Arc::new(PatternOriginPolicy::new(r"https://([a-z]+\.)?skiff\.example").unwrap()),
            Arc::clone(&tokens) as _,
            Arc::clone(&storage) as _,
        );
        let state = Arc::new(AppState {
            broker: Arc::new(broker),
        });
        // Unregistered recorder: renders empty, sufficient for routing tests
        let handle = PrometheusBuilder::new().build_recorder().handle();

        Fixture {
            router: build_routes(state, handle),
            tokens,
            storage,
        }
    }

    fn initiate_request(origin: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/v1/uploads/session")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(origin) = origin {
            builder = builder.header(header::ORIGIN, origin);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[tokio::test]
    async fn test_initiate_success() {
        let f = fixture();

        let response = f
            .router
            .oneshot(initiate_request(
                Some(ALLOWED),
                r#"{"fileName":"scan.png","mimeType":"image/png"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            ALLOWED
        );
        assert_eq!(response.headers().get(header::VARY).unwrap(), "Origin");

        let json = json_body(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["uploadUrl"], SESSION_URL);
        assert_eq!(f.tokens.call_count(), 1);
    }

    #[tokio::test]
    async fn test_rejected_origin_is_403_without_cors() {
        let f = fixture();

        let response = f
            .router
            .oneshot(initiate_request(
                Some("https://attacker.test"),
                r#"{"fileName":"scan.png","mimeType":"image/png"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());

        let json = json_body(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Origin not allowed");
        assert_eq!(f.tokens.call_count(), 0);
        assert_eq!(f.storage.call_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_origin_is_403() {
        let f = fixture();

        let response = f
            .router
            .oneshot(initiate_request(
                None,
                r#"{"fileName":"scan.png","mimeType":"image/png"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(f.tokens.call_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_origin_wins_over_malformed_body() {
        let f = fixture();

        let response = f
            .router
            .oneshot(initiate_request(Some("https://attacker.test"), "not json"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_malformed_body_is_400_with_cors() {
        let f = fixture();

        let response = f
            .router
            .oneshot(initiate_request(Some(ALLOWED), r#"{"fileName":"a.txt"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            ALLOWED
        );
        let json = json_body(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(f.tokens.call_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_file_name_is_400() {
        let f = fixture();

        let response = f
            .router
            .oneshot(initiate_request(
                Some(ALLOWED),
                r#"{"fileName":"","mimeType":"text/plain"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_body(response).await;
        assert_eq!(json["error"], "fileName must not be empty");
    }

    #[tokio::test]
    async fn test_preflight_allowed_origin() {
        let f = fixture();

        let response = f
            .router
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/api/v1/uploads/session")
                    .header(header::ORIGIN, ALLOWED)
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let headers = response.headers();
        assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), ALLOWED);
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_METHODS).unwrap(),
            "POST, OPTIONS"
        );
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_HEADERS).unwrap(),
            "Content-Type"
        );
        assert_eq!(headers.get(header::ACCESS_CONTROL_MAX_AGE).unwrap(), "3600");
        assert_eq!(f.tokens.call_count(), 0);
    }

    #[tokio::test]
    async fn test_preflight_rejected_origin() {
        let f = fixture();

        let response = f
            .router
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/api/v1/uploads/session")
                    .header(header::ORIGIN, "https://attacker.test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[tokio::test]
    async fn test_health() {
        let f = fixture();

        let response = f
            .router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["status"], "healthy");
    }

    #[tokio::test]
    async fn test_get_on_session_path_not_allowed() {
        let f = fixture();

        let response = f
            .router
            .oneshot(
                Request::builder()
                    .uri("/api/v1/uploads/session")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
