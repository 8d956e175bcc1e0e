//! HTTP API routes and handlers.
//!
//! Endpoints are organized by domain:
//! - `health` - Service health checks
//! - `scan` - Scan status, summary, device lookup and stop
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

pub mod error;
pub mod health;
pub mod openapi;
pub mod scan;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                    - Health check
/// /api
/// ├── /status                - Engine status snapshot
/// ├── /summary               - Scan totals
/// ├── /devices/{address}     - Per-address state
/// ├── /scan/stop             - Stop scanning (POST, idempotent)
/// └── /openapi.json          - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            scan::router().route("/openapi.json", get(openapi::get_openapi_spec)),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use btrpa_core::{DetectionEvent, EngineSettings, ScanEngine};
    use tower::ServiceExt;

    use crate::state::AppState;

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn app() -> (Router, ScanEngine) {
        let engine = ScanEngine::new(EngineSettings::default());
        (create_router(AppState::shared(engine.clone())), engine)
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _engine) = app();
        let (status, body) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["scanning"], true);
    }

    #[tokio::test]
    async fn test_status_and_summary() {
        let (app, engine) = app();
        engine
            .submit(DetectionEvent::new("AA:BB:CC:DD:EE:FF", -50))
            .await
            .unwrap();
        engine.stop().await;

        let (status, body) = get_json(app.clone(), "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"]["total_detections"], 1);
        assert_eq!(body["status"]["scanning"], false);

        let (status, body) = get_json(app, "/api/summary").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["unique_addresses"], 1);
        assert_eq!(body["per_address_counts"]["AA:BB:CC:DD:EE:FF"], 1);
    }

    #[tokio::test]
    async fn test_device_lookup() {
        let (app, engine) = app();
        engine
            .submit(DetectionEvent::new("AA:BB:CC:DD:EE:FF", -50))
            .await
            .unwrap();
        engine.stop().await;

        let (status, body) = get_json(app.clone(), "/api/devices/aa-bb-cc-dd-ee-ff").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["times_seen"], 1);

        let (status, body) = get_json(app.clone(), "/api/devices/11:22:33:44:55:66").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "device_not_found");

        let (status, _) = get_json(app, "/api/devices/not-an-address").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (app, engine) = app();
        let post = || {
            Request::builder()
                .method(Method::POST)
                .uri("/api/scan/stop")
                .body(Body::empty())
                .unwrap()
        };

        let first = app.clone().oneshot(post()).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let first: serde_json::Value =
            serde_json::from_slice(&to_bytes(first.into_body(), usize::MAX).await.unwrap())
                .unwrap();
        assert_eq!(first["stopped"], true);

        let second = app.oneshot(post()).await.unwrap();
        let second: serde_json::Value =
            serde_json::from_slice(&to_bytes(second.into_body(), usize::MAX).await.unwrap())
                .unwrap();
        assert_eq!(second["stopped"], false);
        assert_eq!(first["summary"], second["summary"]);
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_openapi_endpoint() {
        let (app, _engine) = app();
        let (status, body) = get_json(app, "/api/openapi.json").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["info"]["title"], "btrpa API");
    }
}
