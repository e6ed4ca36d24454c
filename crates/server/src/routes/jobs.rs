// crates/server/src/routes/jobs.rs
//! Job submission and status routes.
//!
//! - POST /process - submit one URL
//! - POST /batch - submit several URLs
//! - GET /status/{id} - snapshot of one job
//! - GET /history - completed jobs, newest first
//! - GET /jobs - jobs not yet finished
//! - GET /jobs/stream - SSE stream of job updates

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use stemsplit_core::validate::{partition_urls, validate_url};
use stemsplit_core::{Job, JobId, JobSource, ValidationError};
use tokio::sync::broadcast::error::RecvError;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct ProcessResponse {
    pub success: bool,
    pub job_id: JobId,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct SkippedUrl {
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct BatchResponse {
    pub success: bool,
    pub job_ids: Vec<JobId>,
    pub skipped: Vec<SkippedUrl>,
}

/// Resolve the requested model against the configured list.
fn resolve_model(state: &AppState, requested: Option<String>) -> Result<String, ValidationError> {
    match requested.filter(|m| !m.trim().is_empty()) {
        None => Ok(state.config.default_model.clone()),
        Some(model) if state.config.is_known_model(&model) => Ok(model),
        Some(model) => Err(ValidationError::UnknownModel(model)),
    }
}

/// Unparseable ids cannot name a job, so they are reported as unknown.
pub(crate) fn parse_job_id(raw: &str) -> ApiResult<JobId> {
    raw.parse::<JobId>()
        .map_err(|_| ApiError::JobNotFound(raw.to_string()))
}

/// POST /api/process - submit one URL.
async fn process(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ProcessRequest>,
) -> ApiResult<Json<ProcessResponse>> {
    let url = req.url.unwrap_or_default();
    validate_url(&url, &state.config.supported_platforms)?;
    let model = resolve_model(&state, req.model)?;

    let handle = state.runner.submit(JobSource::Url(url.trim().to_string()), &model);
    Ok(Json(ProcessResponse {
        success: true,
        job_id: handle.id,
    }))
}

/// POST /api/batch - submit every valid URL; invalid ones are reported back.
async fn batch(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BatchRequest>,
) -> ApiResult<Json<BatchResponse>> {
    if req.urls.iter().all(|u| u.trim().is_empty()) {
        return Err(ValidationError::EmptyBatch.into());
    }
    let model = resolve_model(&state, req.model)?;
    let partition = partition_urls(&req.urls, &state.config.supported_platforms);
    if partition.valid.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "No valid URLs ({} skipped)",
            partition.skipped.len()
        )));
    }

    let job_ids = state
        .runner
        .submit_batch(partition.valid, &model)
        .into_iter()
        .map(|handle| handle.id)
        .collect();
    let skipped = partition
        .skipped
        .into_iter()
        .map(|(url, err)| SkippedUrl {
            url,
            reason: err.to_string(),
        })
        .collect();

    Ok(Json(BatchResponse {
        success: true,
        job_ids,
        skipped,
    }))
}

/// GET /api/status/{id}
async fn status(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<Job>> {
    let job_id = parse_job_id(&id)?;
    state
        .registry()
        .get(job_id)
        .map(Json)
        .ok_or(ApiError::JobNotFound(id))
}

/// GET /api/history
async fn history(State(state): State<Arc<AppState>>) -> Json<Vec<Job>> {
    Json(state.registry().history())
}

/// GET /api/jobs
async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<Job>> {
    Json(state.registry().active())
}

/// GET /api/jobs/stream - SSE stream of every job update.
async fn stream_jobs(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.registry().subscribe();

    let stream = async_stream::stream! {
        let mut rx = rx;
        loop {
            match rx.recv().await {
                Ok(job) => {
                    let json = serde_json::to_string(&job).unwrap_or_default();
                    yield Ok(Event::default().event("job").data(json));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Job stream subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/process", post(process))
        .route("/batch", post(batch))
        .route("/status/{id}", get(status))
        .route("/history", get(history))
        .route("/jobs", get(list_jobs))
        .route("/jobs/stream", get(stream_jobs))
}
