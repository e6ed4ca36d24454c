//! Stem file download.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use stemsplit_core::AudioFormat;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::error::{ApiError, ApiResult};
use crate::routes::jobs::parse_job_id;
use crate::state::AppState;

/// `Content-Disposition` for an attachment. Names that are not plain ASCII
/// get an ASCII fallback plus an RFC 5987 `filename*` with the real name.
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if fallback == filename {
        format!("attachment; filename=\"{filename}\"")
    } else {
        format!(
            "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
            urlencoding::encode(filename)
        )
    }
}

/// GET /api/download/{id}/{stem}: the organized stem as an attachment
/// named `<title>_<stem>.<ext>`. The file is streamed, and range requests
/// are honored.
async fn download_stem(
    State(state): State<Arc<AppState>>,
    Path((id, stem)): Path<(String, String)>,
    request: Request,
) -> ApiResult<Response> {
    let job_id = parse_job_id(&id)?;
    // Snapshot first; the file is served without touching the registry.
    let job = state
        .registry()
        .get(job_id)
        .ok_or_else(|| ApiError::JobNotFound(id.clone()))?;
    let path = job
        .stems
        .get(&stem)
        .cloned()
        .ok_or_else(|| ApiError::StemNotFound {
            job_id: id.clone(),
            stem: stem.clone(),
        })?;

    let size = match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(_) => return Err(ApiError::FileNotFound(path)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::FileNotFound(path));
        }
        Err(e) => {
            return Err(ApiError::Internal(format!("reading {}: {e}", path.display())));
        }
    };

    let format = AudioFormat::from_path(&path).unwrap_or_default();
    let filename = format!("{}_{}.{}", job.title, stem, format.extension());
    let disposition = HeaderValue::from_str(&content_disposition(&filename))
        .map_err(|e| ApiError::Internal(format!("content-disposition for {filename}: {e}")))?;

    let response = match ServeFile::new(&path).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };
    if response.status() == StatusCode::NOT_FOUND {
        return Err(ApiError::FileNotFound(path));
    }

    tracing::info!(job_id = %job_id, stem = %stem, bytes = size, "Serving stem");
    let mut response = response.map(Body::new);
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(format.content_type()));
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    Ok(response)
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/download/{id}/{stem}", get(download_stem))
}
