//! Model listing endpoint.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};

use crate::state::AppState;

/// GET /api/models - The configured model names.
pub async fn list_models(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.config.available_models.clone())
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/models", get(list_models))
}
