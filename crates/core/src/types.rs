// crates/core/src/types.rs
//! Job data model shared by the registry, the pipeline and both front ends.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a job, generated at submission time.
pub type JobId = uuid::Uuid;

/// Mapping from stem name (`vocals`, `drums`, ...) to an audio file.
pub type StemMap = BTreeMap<String, PathBuf>;

/// Lifecycle status of a job.
///
/// `queued → downloading → separating → organizing → complete`, with `error`
/// reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Downloading,
    Separating,
    Organizing,
    Complete,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Separating => "separating",
            Self::Organizing => "organizing",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    /// Whether a job in `self` may move to `next`.
    ///
    /// Staying in the same non-terminal stage is allowed so a stage can report
    /// more than one progress value. `queued → separating` is the local-file
    /// path, which has no download stage.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        if self.is_terminal() {
            return false;
        }
        if next == Error || next == *self {
            return true;
        }
        matches!(
            (self, next),
            (Queued, Downloading)
                | (Queued, Separating)
                | (Downloading, Separating)
                | (Separating, Organizing)
                | (Organizing, Complete)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a job's audio comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSource {
    /// Remote media fetched through the downloader.
    Url(String),
    /// Audio already on disk; the download stage is skipped.
    LocalFile(PathBuf),
}

impl JobSource {
    /// Human-readable form stored on the job record.
    pub fn label(&self) -> String {
        match self {
            Self::Url(url) => url.clone(),
            Self::LocalFile(path) => path.display().to_string(),
        }
    }
}

/// One orchestrated unit of work. Registry reads hand out clones of this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub url: String,
    pub model: String,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    /// Final (organized) stem paths. Empty until the job is complete.
    pub stems: StemMap,
    pub timestamp: DateTime<Utc>,
    /// Sanitized title. Empty until the download finishes.
    pub title: String,
    pub error: Option<String>,
}

impl Job {
    pub fn new(source: &JobSource, model: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            url: source.label(),
            model: model.into(),
            status: JobStatus::Queued,
            progress: 0,
            message: "Job queued".to_string(),
            stems: StemMap::new(),
            timestamp: Utc::now(),
            title: String::new(),
            error: None,
        }
    }
}

/// Receives state changes from a running pipeline.
///
/// The registry implements this for background jobs; the CLI implements it
/// to log progress for local files.
pub trait JobReporter: Send + Sync {
    /// Enter (or stay in) a non-terminal stage.
    fn stage(&self, status: JobStatus, progress: u8, message: &str);

    /// Record the sanitized title once it is known.
    fn set_title(&self, title: &str);

    /// `organizing → complete` with the final stem paths.
    fn complete(&self, stems: &StemMap);

    /// Any non-terminal state → `error`.
    fn fail(&self, message: &str);
}
