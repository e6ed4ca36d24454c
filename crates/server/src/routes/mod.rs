//! API route handlers for the stem-separation server.

pub mod download;
pub mod health;
pub mod jobs;
pub mod models;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined API router with all routes under /api prefix.
///
/// Routes:
/// - GET  /api/health - Health check
/// - GET  /api/models - Configured model names
/// - POST /api/process - Submit one URL
/// - POST /api/batch - Submit several URLs
/// - GET  /api/status/{id} - Job snapshot
/// - GET  /api/history - Completed jobs, newest first
/// - GET  /api/jobs - Jobs not yet finished
/// - GET  /api/jobs/stream - SSE stream of job updates
/// - GET  /api/download/{id}/{stem} - Organized stem file
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", models::router())
        .nest("/api", jobs::router())
        .nest("/api", download::router())
        .with_state(state)
}
