// crates/server/src/error.rs
use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use stemsplit_core::ValidationError;
use thiserror::Error;

/// Structured JSON error response for API errors
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Stem not found: {stem} (job {job_id})")]
    StemNotFound { job_id: String, stem: String },

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            ApiError::JobNotFound(id) => {
                tracing::warn!(job_id = %id, "Job not found");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_details("Job not found", format!("Job ID: {id}")),
                )
            }
            ApiError::StemNotFound { job_id, stem } => {
                tracing::warn!(job_id = %job_id, stem = %stem, "Stem not found");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_details("Stem not found", format!("Stem: {stem}")),
                )
            }
            ApiError::FileNotFound(path) => {
                tracing::error!(path = %path.display(), "Stem file missing on disk");
                (StatusCode::NOT_FOUND, ErrorResponse::new("File not found"))
            }
            ApiError::Validation(err) => {
                tracing::warn!(error = %err, "Rejected request");
                (StatusCode::BAD_REQUEST, validation_response(err))
            }
            ApiError::BadRequest(msg) => {
                tracing::warn!(message = %msg, "Bad request");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_details("Bad request", msg.clone()),
                )
            }
            ApiError::Internal(msg) => {
                tracing::error!(message = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Internal server error"),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

fn validation_response(err: &ValidationError) -> ErrorResponse {
    match err {
        ValidationError::MissingUrl | ValidationError::EmptyBatch => ErrorResponse::new(err.to_string()),
        ValidationError::UnknownModel(_) => ErrorResponse::with_details("Unknown model", err.to_string()),
        _ => ErrorResponse::with_details("Invalid URL", err.to_string()),
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
