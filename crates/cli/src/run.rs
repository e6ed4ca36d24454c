//! The three CLI modes: single URL, batch file, local file.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use indicatif::MultiProgress;
use stemsplit_core::validate::{parse_batch_file, partition_urls};
use stemsplit_core::{
    Config, FileManager, Job, JobSource, JobStatus, Pipeline, PipelineOutput, PreflightError,
    ValidationError,
};
use stemsplit_jobs::{JobRegistry, JobRunner};
use thiserror::Error;

use crate::progress::{self, BarReporter};

/// Failures that end the process with exit code 1.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Preflight(#[from] PreflightError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("No valid URLs to process!")]
    NoValidUrls,

    #[error("Failed to read batch file {path}: {source}")]
    BatchFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    JobFailed(String),
}

/// Outcome of a URL run. Individual job failures do not fail the process.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub completed: Vec<Job>,
    pub failed: Vec<Job>,
    pub skipped: usize,
}

pub struct App {
    config: Config,
    pipeline: Arc<Pipeline>,
    progress: MultiProgress,
}

impl App {
    pub fn new(config: Config, pipeline: Arc<Pipeline>, progress: MultiProgress) -> Self {
        Self {
            config,
            pipeline,
            progress,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Read a batch file and process its URLs.
    pub async fn run_batch_file(&self, path: &Path, model: &str) -> Result<RunSummary, CliError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| CliError::BatchFile {
                path: path.display().to_string(),
                source,
            })?;
        self.run_urls(&parse_batch_file(&contents), model).await
    }

    /// Validate `urls`, run the valid ones through the job runner and wait
    /// for all of them.
    pub async fn run_urls(&self, urls: &[String], model: &str) -> Result<RunSummary, CliError> {
        let partition = partition_urls(urls, &self.config.supported_platforms);
        if partition.valid.is_empty() {
            return Err(CliError::NoValidUrls);
        }
        tracing::info!(count = partition.valid.len(), "Processing URL(s)");

        let registry = Arc::new(JobRegistry::new());
        let runner = JobRunner::new(
            Arc::clone(&registry),
            Arc::clone(&self.pipeline),
            self.config.admission_limit(),
        );
        let handles = runner.submit_batch(partition.valid, model);

        let total = handles.len();
        let bars: HashMap<_, _> = handles
            .iter()
            .enumerate()
            .map(|(i, h)| (h.id, progress::job_bar(&self.progress, &format!("[{}/{total}]", i + 1))))
            .collect();
        let final_bars = bars.clone();
        let follower = progress::follow(&registry, bars);

        let mut summary = RunSummary {
            skipped: partition.skipped.len(),
            ..RunSummary::default()
        };
        for handle in handles {
            let Some(job) = handle.wait().await else {
                continue;
            };
            if let Some(bar) = final_bars.get(&job.id) {
                progress::render(bar, &job);
            }
            match job.status {
                JobStatus::Complete => {
                    tracing::info!(url = %job.url, title = %job.title, "[SUCCESS] Complete!");
                    summary.completed.push(job);
                }
                _ => {
                    tracing::error!(url = %job.url, error = %job.message, "Job failed");
                    summary.failed.push(job);
                }
            }
        }
        follower.abort();

        self.cleanup_temp();
        Ok(summary)
    }

    /// Separate a file already on disk. Any failure is fatal.
    pub async fn run_local(&self, path: &Path, model: &str) -> Result<PipelineOutput, CliError> {
        if !path.is_file() {
            return Err(ValidationError::FileNotFound(path.to_path_buf()).into());
        }
        tracing::info!(file = %path.display(), model, "Processing local file");

        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let reporter = BarReporter::new(progress::job_bar(&self.progress, &label));
        let result = self
            .pipeline
            .run(&JobSource::LocalFile(path.to_path_buf()), model, &reporter)
            .await
            .map_err(|e| CliError::JobFailed(e.to_string()));

        self.cleanup_temp();
        result
    }

    fn cleanup_temp(&self) {
        let manager = FileManager::new(
            &self.config.output_dir,
            self.config.keep_original,
            self.config.cleanup_temp,
        );
        manager.cleanup_temp_files(&self.config.temp_dir);
    }
}
