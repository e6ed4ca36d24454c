// crates/server/src/lib.rs
//! Stem-separation HTTP server library.
//!
//! Serves a JSON API for submitting separation jobs, polling their status,
//! and downloading the organized stems.

pub mod error;
pub mod routes;
pub mod state;

pub use error::*;
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes under `/api`
/// - Static frontend files from `config.static_dir`, when set
/// - CORS for development (allows any origin)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let static_dir = state.config.static_dir.clone();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new().merge(api_routes(state));

    if let Some(dir) = static_dir {
        tracing::info!(dir = %dir.display(), "Serving static files");
        let index = dir.join("index.html");
        app = app.fallback_service(ServeDir::new(&dir).fallback(ServeFile::new(index)));
    }

    app.layer(cors).layer(TraceLayer::new_for_http())
}

// ============================================================================
// Integration Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use stemsplit_core::testing::{FakeDownloader, FakeSeparator};
    use stemsplit_core::{Config, FileManager, Pipeline};
    use stemsplit_jobs::{JobRegistry, JobRunner};
    use tower::ServiceExt;

    fn test_state(root: &std::path::Path, static_dir: Option<std::path::PathBuf>) -> Arc<AppState> {
        let config = Config {
            output_dir: root.join("output"),
            temp_dir: root.join("temp"),
            static_dir,
            ..Config::default()
        };
        let pipeline = Pipeline::new(
            Arc::new(FakeDownloader::new(&config.temp_dir)),
            Arc::new(FakeSeparator::new()),
            Arc::new(FileManager::new(&config.output_dir, false, true)),
            &config.temp_dir,
        );
        let runner = JobRunner::new(Arc::new(JobRegistry::new()), Arc::new(pipeline), 2);
        AppState::with_runner(config, Arc::new(runner))
    }

    /// Helper to make a GET request to the app.
    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body_str = String::from_utf8(body.to_vec()).unwrap();

        (status, body_str)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_app(test_state(dir.path(), None));
        let (status, body) = get(app, "/api/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
        assert!(json["uptime_secs"].is_number());
        assert_eq!(json["active_jobs"], 0);
    }

    #[tokio::test]
    async fn test_models_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_app(test_state(dir.path(), None));
        let (status, body) = get(app, "/api/models").await;

        assert_eq!(status, StatusCode::OK);
        let models: Vec<String> = serde_json::from_str(&body).unwrap();
        assert_eq!(models, Config::default().available_models);
    }

    #[tokio::test]
    async fn test_cors_headers() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_app(test_state(dir.path(), None));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .header("Origin", "http://localhost:3000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("access-control-allow-origin"));
    }

    #[tokio::test]
    async fn test_unknown_route_without_static_dir() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_app(test_state(dir.path(), None));
        let (status, _) = get(app, "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_static_dir_serves_index_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let static_dir = dir.path().join("static");
        std::fs::create_dir_all(&static_dir).unwrap();
        std::fs::write(static_dir.join("index.html"), "<h1>stemsplit</h1>").unwrap();

        let app = create_app(test_state(dir.path(), Some(static_dir)));
        let (status, body) = get(app.clone(), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("stemsplit"));

        let (status, body) = get(app, "/some/client/route").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("stemsplit"));
    }
}
