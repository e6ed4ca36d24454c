// crates/core/src/error.rs
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config file {}: {message}", .path.display())]
    Malformed { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },

    #[error("Default model {0} is not in the list of available models")]
    UnknownDefaultModel(String),
}

/// Request-level validation failures, surfaced to the caller immediately.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("URL required")]
    MissingUrl,

    #[error("URLs required")]
    EmptyBatch,

    #[error("Malformed URL: {0}")]
    MalformedUrl(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedDomain(String),

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Unknown model: {0}")]
    UnknownModel(String),
}

/// Failures from the download collaborator.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {code:?}: {stderr}")]
    Failed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("unreadable metadata: {0}")]
    Metadata(String),

    #[error("downloaded file missing: {}", .0.display())]
    MissingOutput(PathBuf),

    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures from the separation collaborator.
#[derive(Debug, Error)]
pub enum SeparationError {
    #[error("failed to load model {model}: {reason}")]
    ModelLoad { model: String, reason: String },

    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {code:?}: {stderr}")]
    Failed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("input audio missing: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("stem {stem} was not produced at {}", .path.display())]
    MissingStem { stem: String, path: PathBuf },

    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures while organizing stems into the output layout.
#[derive(Debug, Error)]
pub enum OrganizeError {
    #[error("cannot create output folder {}: {source}", .path.display())]
    CreateFolder {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Some stems were moved and some were not. The moved ones are already at
    /// their final location.
    #[error("moved {} stem(s), failed to move: {}", .moved.len(), failed_names(.failed))]
    Partial {
        folder: PathBuf,
        moved: std::collections::BTreeMap<String, PathBuf>,
        failed: Vec<(String, String)>,
    },

    /// The title is not a single plain path component.
    #[error("title {0:?} is not a valid folder name")]
    UnsafeTitle(String),

    #[error("organizer task failed: {0}")]
    Join(String),
}

fn failed_names(failed: &[(String, String)]) -> String {
    failed
        .iter()
        .map(|(stem, reason)| format!("{stem} ({reason})"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Everything that can end a job in the `error` state.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Download failed: {0}")]
    Download(#[from] DownloadError),

    #[error("Separation failed: {0}")]
    Separation(#[from] SeparationError),

    #[error("Organizing failed: {0}")]
    Organize(#[from] OrganizeError),

    #[error("Error: worker panicked")]
    WorkerPanicked,
}

/// Fatal environment problems detected before any job starts.
#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("Audio tool not found: {0}")]
    AudioToolMissing(String),

    #[error("Insufficient disk space! Need at least {required_gb}GB free, {available_gb:.2}GB available")]
    InsufficientDiskSpace { required_gb: u64, available_gb: f64 },

    #[error("Cannot create directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DownloadError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl SeparationError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
