//! Terminal progress for running jobs.

use std::collections::HashMap;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use stemsplit_core::{Job, JobId, JobReporter, JobStatus, StemMap};
use stemsplit_jobs::JobRegistry;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("  {spinner} {prefix:.bold} [{bar:30}] {pos:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

pub fn job_bar(multi: &MultiProgress, label: &str) -> ProgressBar {
    let bar = multi.add(ProgressBar::new(100));
    bar.set_style(bar_style());
    bar.set_prefix(label.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// Apply one job snapshot to its bar.
pub fn render(bar: &ProgressBar, job: &Job) {
    bar.set_position(u64::from(job.progress));
    if !job.title.is_empty() {
        bar.set_prefix(job.title.clone());
    }
    match job.status {
        JobStatus::Complete => bar.finish_with_message("done"),
        JobStatus::Error => bar.abandon_with_message(job.message.clone()),
        _ => bar.set_message(job.message.clone()),
    }
}

/// Mirror registry updates for `bars` until every bar is finished or the
/// task is aborted.
pub fn follow(registry: &JobRegistry, bars: HashMap<JobId, ProgressBar>) -> JoinHandle<()> {
    let mut rx = registry.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(job) => {
                    if let Some(bar) = bars.get(&job.id) {
                        render(bar, &job);
                    }
                    if bars.values().all(ProgressBar::is_finished) {
                        break;
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Reporter for local files, which run outside the registry.
pub struct BarReporter {
    bar: ProgressBar,
}

impl BarReporter {
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl JobReporter for BarReporter {
    fn stage(&self, status: JobStatus, progress: u8, message: &str) {
        tracing::info!(status = %status, progress, "{message}");
        self.bar.set_position(u64::from(progress));
        self.bar.set_message(message.to_string());
    }

    fn set_title(&self, title: &str) {
        self.bar.set_prefix(title.to_string());
    }

    fn complete(&self, stems: &StemMap) {
        tracing::info!(stems = stems.len(), "Processing complete!");
        self.bar.set_position(100);
        self.bar.finish_with_message("done");
    }

    fn fail(&self, message: &str) {
        tracing::error!(error = message, "Processing failed");
        self.bar.abandon_with_message(message.to_string());
    }
}
