// crates/core/src/pipeline.rs
//! Pipeline coordinator: download → separate → organize for one job.
//!
//! The coordinator drives the job state machine through a [`JobReporter`]
//! and never holds any lock across a collaborator call. Each stage runs only
//! if the previous one succeeded; the first failure ends the job in `error`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::downloader::{Downloader, YtDlpDownloader};
use crate::error::{OrganizeError, PipelineError};
use crate::file_manager::{FileManager, Organized, Organizer};
use crate::separator::{DemucsSeparator, Separator};
use crate::types::{JobReporter, JobSource, JobStatus};
use crate::validate::local_title;

/// Coarse progress checkpoints reported to clients.
pub mod progress {
    pub const DOWNLOAD_STARTED: u8 = 10;
    pub const DOWNLOAD_DONE: u8 = 40;
    pub const SEPARATION_STARTED: u8 = 50;
    pub const SEPARATION_DONE: u8 = 80;
    pub const ORGANIZING: u8 = 90;
    pub const COMPLETE: u8 = 100;
}

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub title: String,
    pub organized: Organized,
}

pub struct Pipeline {
    downloader: Arc<dyn Downloader>,
    separator: Arc<dyn Separator>,
    organizer: Arc<dyn Organizer>,
    temp_dir: PathBuf,
}

impl Pipeline {
    pub fn new(
        downloader: Arc<dyn Downloader>,
        separator: Arc<dyn Separator>,
        organizer: Arc<dyn Organizer>,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            downloader,
            separator,
            organizer,
            temp_dir: temp_dir.into(),
        }
    }

    /// Production wiring: yt-dlp, demucs and the on-disk file manager.
    pub fn from_config(config: &Config) -> Self {
        let downloader = YtDlpDownloader::new(&config.tools.yt_dlp, &config.temp_dir)
            .with_max_retries(config.max_retries)
            .with_socket_timeout(config.download_timeout_secs);
        let separator = DemucsSeparator::new(&config.tools.demucs, &config.tools.ffmpeg, config.device)
            .with_format(config.output_format);
        let organizer = FileManager::new(&config.output_dir, config.keep_original, config.cleanup_temp);
        Self::new(
            Arc::new(downloader),
            Arc::new(separator),
            Arc::new(organizer),
            &config.temp_dir,
        )
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Run one job to a terminal state, reporting every transition.
    ///
    /// Collaborator failures are mapped to `error` here; the result is also
    /// returned so callers (the CLI) can pick an exit code.
    pub async fn run(
        &self,
        source: &JobSource,
        model: &str,
        reporter: &dyn JobReporter,
    ) -> Result<PipelineOutput, PipelineError> {
        match self.execute(source, model, reporter).await {
            Ok(output) => {
                reporter.complete(&output.organized.stems);
                Ok(output)
            }
            Err(e) => {
                reporter.fail(&e.to_string());
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        source: &JobSource,
        model: &str,
        reporter: &dyn JobReporter,
    ) -> Result<PipelineOutput, PipelineError> {
        let (audio, title) = match source {
            JobSource::Url(url) => {
                reporter.stage(
                    JobStatus::Downloading,
                    progress::DOWNLOAD_STARTED,
                    "Downloading audio...",
                );
                let downloaded = self.downloader.download(url).await?;
                reporter.stage(JobStatus::Downloading, progress::DOWNLOAD_DONE, "Download complete");
                reporter.set_title(&downloaded.title);
                (downloaded.path, downloaded.title)
            }
            JobSource::LocalFile(path) => {
                let title = local_title(path);
                reporter.set_title(&title);
                (path.clone(), title)
            }
        };

        reporter.stage(
            JobStatus::Separating,
            progress::SEPARATION_STARTED,
            "Separating stems...",
        );
        let scratch = self.temp_dir.join(&title);
        let stems = self.separator.separate(model, &audio, &scratch).await?;
        reporter.stage(JobStatus::Separating, progress::SEPARATION_DONE, "Separation complete");

        reporter.stage(JobStatus::Organizing, progress::ORGANIZING, "Organizing files...");
        let organizer = Arc::clone(&self.organizer);
        let folder_title = title.clone();
        let organized = tokio::task::spawn_blocking(move || {
            organizer.organize(&folder_title, &stems, Some(audio.as_path()))
        })
        .await
        .map_err(|e| OrganizeError::Join(e.to_string()))??;

        Ok(PipelineOutput { title, organized })
    }
}
