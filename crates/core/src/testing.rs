//! In-process fakes for the download and separation collaborators.
//!
//! Compiled for this crate's tests and, through the `test-support` feature,
//! for downstream crates' tests.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::downloader::{DownloadedAudio, Downloader};
use crate::error::{DownloadError, SeparationError};
use crate::separator::{model_spec, Separator};
use crate::types::StemMap;
use crate::validate::sanitize_title;

/// Writes a small file named after the URL's last path segment.
pub struct FakeDownloader {
    dir: PathBuf,
    fail_all: bool,
    fail_urls: HashSet<String>,
    delay: Duration,
    calls: Mutex<Vec<String>>,
}

impl FakeDownloader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            fail_all: false,
            fail_urls: HashSet::new(),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(dir: impl Into<PathBuf>) -> Self {
        Self {
            fail_all: true,
            ..Self::new(dir)
        }
    }

    pub fn fail_url(mut self, url: impl Into<String>) -> Self {
        self.fail_urls.insert(url.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// URLs this downloader was asked for, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn download(&self, url: &str) -> Result<DownloadedAudio, DownloadError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(url.to_string());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_all || self.fail_urls.contains(url) {
            return Err(DownloadError::Failed {
                tool: "yt-dlp".into(),
                code: Some(1),
                stderr: "ERROR: Video unavailable".into(),
            });
        }
        let segment = url.rsplit('/').find(|s| !s.is_empty()).unwrap_or("track");
        let title = sanitize_title(segment);
        std::fs::create_dir_all(&self.dir).map_err(|e| DownloadError::io(&self.dir, e))?;
        let path = self.dir.join(format!("{title}.wav"));
        std::fs::write(&path, b"RIFF").map_err(|e| DownloadError::io(&path, e))?;
        Ok(DownloadedAudio {
            path,
            title,
            duration_secs: 1.0,
        })
    }
}

/// Writes one small file per stem of the requested model.
///
/// Tracks how many separations run at once so admission limits can be
/// asserted.
#[derive(Default)]
pub struct FakeSeparator {
    fail: bool,
    panic: bool,
    missing_stem: Option<String>,
    delay: Duration,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FakeSeparator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn panicking() -> Self {
        Self {
            panic: true,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Report `stem` as produced without writing its file, so organizing it
    /// fails.
    pub fn with_missing_stem(mut self, stem: impl Into<String>) -> Self {
        self.missing_stem = Some(stem.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping `separate` calls observed.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Separator for FakeSeparator {
    async fn separate(
        &self,
        model: &str,
        _input: &Path,
        output_dir: &Path,
    ) -> Result<StemMap, SeparationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.panic {
            panic!("separator crashed");
        }
        if self.fail {
            return Err(SeparationError::Failed {
                tool: "demucs".into(),
                code: Some(1),
                stderr: "CUDA out of memory".into(),
            });
        }

        let sources = model_spec(model)
            .map(|s| s.sources)
            .unwrap_or_else(|| ["drums", "bass", "other", "vocals"].map(String::from).to_vec());
        std::fs::create_dir_all(output_dir).map_err(|e| SeparationError::io(output_dir, e))?;
        let mut stems = StemMap::new();
        for stem in sources {
            let path = output_dir.join(format!("{stem}.wav"));
            if self.missing_stem.as_deref() != Some(stem.as_str()) {
                std::fs::write(&path, stem.as_bytes()).map_err(|e| SeparationError::io(&path, e))?;
            }
            stems.insert(stem, path);
        }
        Ok(stems)
    }
}
