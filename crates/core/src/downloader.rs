// crates/core/src/downloader.rs
//! Downloader: fetches remote audio and resolves its title.
//!
//! The production implementation drives `yt-dlp`; the pipeline only sees the
//! `Downloader` trait.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::error::DownloadError;
use crate::process::stderr_excerpt;
use crate::validate::sanitize_title;

/// A successfully downloaded source.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedAudio {
    /// Local audio file, named after the sanitized title.
    pub path: PathBuf,
    /// Sanitized, filesystem-safe title.
    pub title: String,
    pub duration_secs: f64,
}

/// Fetches remote audio given a URL.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download `url`, retrying internally before reporting failure.
    async fn download(&self, url: &str) -> Result<DownloadedAudio, DownloadError>;
}

/// The subset of yt-dlp's info JSON we rely on.
#[derive(Debug, Deserialize)]
struct MediaInfo {
    id: String,
    title: String,
    #[serde(default)]
    duration: Option<f64>,
}

/// Downloader that spawns `yt-dlp` and extracts audio to WAV.
pub struct YtDlpDownloader {
    program: String,
    output_dir: PathBuf,
    max_retries: u32,
    socket_timeout_secs: u64,
    retry_backoff: Duration,
}

impl YtDlpDownloader {
    pub fn new(program: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            output_dir: output_dir.into(),
            max_retries: 3,
            socket_timeout_secs: 30,
            retry_backoff: Duration::from_secs(2),
        }
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_socket_timeout(mut self, secs: u64) -> Self {
        self.socket_timeout_secs = secs;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    fn command(&self, url: &str) -> Command {
        let retries = self.max_retries.to_string();
        let timeout = self.socket_timeout_secs.to_string();
        let template = self.output_dir.join("%(id)s.%(ext)s");

        let mut cmd = Command::new(&self.program);
        cmd.args(["-f", "bestaudio/best", "-x", "--audio-format", "wav"])
            .args(["--retries", &retries, "--fragment-retries", &retries])
            .args(["--socket-timeout", &timeout])
            .args(["--dump-json", "--no-simulate", "--no-progress", "--no-playlist"])
            .arg("-o")
            .arg(&template)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    async fn attempt(&self, url: &str) -> Result<DownloadedAudio, DownloadError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| DownloadError::io(&self.output_dir, e))?;

        let output = self
            .command(url)
            .output()
            .await
            .map_err(|source| DownloadError::Spawn {
                tool: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(DownloadError::Failed {
                tool: self.program.clone(),
                code: output.status.code(),
                stderr: stderr_excerpt(&output.stderr),
            });
        }

        let info = parse_media_info(&String::from_utf8_lossy(&output.stdout))?;
        let extracted = self.output_dir.join(format!("{}.wav", info.id));
        if !extracted.exists() {
            return Err(DownloadError::MissingOutput(extracted));
        }

        let title = sanitize_title(&info.title);
        let path = self.output_dir.join(format!("{title}.wav"));
        if path != extracted {
            tokio::fs::rename(&extracted, &path)
                .await
                .map_err(|e| DownloadError::io(&path, e))?;
        }

        Ok(DownloadedAudio {
            path,
            title,
            duration_secs: info.duration.unwrap_or(0.0),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

#[async_trait]
impl Downloader for YtDlpDownloader {
    async fn download(&self, url: &str) -> Result<DownloadedAudio, DownloadError> {
        let attempts = self.max_retries.max(1);
        let t0 = Instant::now();
        tracing::info!(url, attempts, "Starting download");

        let mut attempt = 1;
        loop {
            match self.attempt(url).await {
                Ok(audio) => {
                    tracing::info!(
                        url,
                        title = %audio.title,
                        duration_secs = audio.duration_secs,
                        elapsed_ms = t0.elapsed().as_millis() as u64,
                        "Download complete"
                    );
                    return Ok(audio);
                }
                Err(e) if attempt < attempts && is_retryable(&e) => {
                    tracing::warn!(url, attempt, error = %e, "Download attempt failed, retrying");
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(url, attempt, error = %e, "Download failed");
                    return Err(e);
                }
            }
        }
    }
}

/// Only tool failures are worth another attempt; a missing binary or
/// unparsable output will not fix itself.
fn is_retryable(err: &DownloadError) -> bool {
    matches!(err, DownloadError::Failed { .. })
}

/// Parse yt-dlp's `--dump-json` output (last JSON line wins).
fn parse_media_info(stdout: &str) -> Result<MediaInfo, DownloadError> {
    let line = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| l.starts_with('{'))
        .ok_or_else(|| DownloadError::Metadata("no JSON on stdout".to_string()))?;
    serde_json::from_str(line).map_err(|e| DownloadError::Metadata(e.to_string()))
}
