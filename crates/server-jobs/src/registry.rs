// crates/server-jobs/src/registry.rs
//! The job table.
//!
//! One `std::sync::Mutex` guards every read and write. It is held only for
//! the map access itself, never across a collaborator call, and readers get
//! cloned snapshots rather than references into the table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use stemsplit_core::pipeline::progress;
use stemsplit_core::{Job, JobId, JobReporter, JobSource, JobStatus, StemMap};
use tokio::sync::broadcast;

use crate::types::RegistryError;

/// Updates buffered per subscriber before the slowest one starts lagging.
pub const UPDATE_CHANNEL_CAPACITY: usize = 256;

pub struct JobRegistry {
    jobs: Mutex<HashMap<JobId, Job>>,
    updates_tx: broadcast::Sender<Job>,
}

impl JobRegistry {
    pub fn new() -> Self {
        let (updates_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            jobs: Mutex::new(HashMap::new()),
            updates_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, Job>> {
        self.jobs.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Job registry mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Register a new job in `queued` and return its snapshot.
    pub fn create(&self, source: &JobSource, model: &str) -> Job {
        let job = Job::new(source, model);
        self.lock().insert(job.id, job.clone());
        tracing::info!(job_id = %job.id, url = %job.url, model, "Job created");
        self.publish(&job);
        job
    }

    /// Snapshot of one job.
    pub fn get(&self, id: JobId) -> Option<Job> {
        self.lock().get(&id).cloned()
    }

    /// Completed jobs, newest first.
    pub fn history(&self) -> Vec<Job> {
        let mut done: Vec<Job> = self
            .lock()
            .values()
            .filter(|j| j.status == JobStatus::Complete)
            .cloned()
            .collect();
        done.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        done
    }

    /// Jobs not yet in a terminal state, oldest first.
    pub fn active(&self) -> Vec<Job> {
        let mut active: Vec<Job> = self
            .lock()
            .values()
            .filter(|j| !j.status.is_terminal())
            .cloned()
            .collect();
        active.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        active
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to every job change (snapshots, in mutation order per job).
    pub fn subscribe(&self) -> broadcast::Receiver<Job> {
        self.updates_tx.subscribe()
    }

    /// Move a job into `status`. Progress never decreases.
    pub fn transition(
        &self,
        id: JobId,
        status: JobStatus,
        progress: u8,
        message: &str,
    ) -> Result<Job, RegistryError> {
        self.update(id, |job| {
            check_transition(job, status)?;
            job.status = status;
            job.progress = job.progress.max(progress.min(progress::COMPLETE));
            job.message = message.to_string();
            Ok(())
        })
    }

    pub fn set_title(&self, id: JobId, title: &str) -> Result<Job, RegistryError> {
        self.update(id, |job| {
            job.title = title.to_string();
            Ok(())
        })
    }

    /// Record final stem paths and enter `complete`.
    pub fn complete(&self, id: JobId, stems: &StemMap) -> Result<Job, RegistryError> {
        let job = self.update(id, |job| {
            check_transition(job, JobStatus::Complete)?;
            job.status = JobStatus::Complete;
            job.progress = progress::COMPLETE;
            job.message = "Processing complete!".to_string();
            job.stems = stems.clone();
            Ok(())
        })?;
        tracing::info!(job_id = %id, title = %job.title, stems = job.stems.len(), "Job complete");
        Ok(job)
    }

    /// Enter `error`, keeping the last reported progress.
    pub fn fail(&self, id: JobId, message: &str) -> Result<Job, RegistryError> {
        let job = self.update(id, |job| {
            check_transition(job, JobStatus::Error)?;
            job.status = JobStatus::Error;
            job.message = message.to_string();
            job.error = Some(message.to_string());
            Ok(())
        })?;
        tracing::error!(job_id = %id, progress = job.progress, error = message, "Job failed");
        Ok(job)
    }

    fn update<F>(&self, id: JobId, f: F) -> Result<Job, RegistryError>
    where
        F: FnOnce(&mut Job) -> Result<(), RegistryError>,
    {
        let snapshot = {
            let mut jobs = self.lock();
            let job = jobs.get_mut(&id).ok_or(RegistryError::UnknownJob(id))?;
            f(job)?;
            job.clone()
        };
        self.publish(&snapshot);
        Ok(snapshot)
    }

    fn publish(&self, job: &Job) {
        // No receivers is the normal case for the HTTP server.
        let _ = self.updates_tx.send(job.clone());
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn check_transition(job: &Job, to: JobStatus) -> Result<(), RegistryError> {
    if job.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(RegistryError::IllegalTransition {
            id: job.id,
            from: job.status,
            to,
        })
    }
}

/// Pipeline reporter bound to one registry entry.
///
/// Registry rejections are logged; they never abort the pipeline.
pub struct RegistryReporter {
    registry: Arc<JobRegistry>,
    id: JobId,
}

impl RegistryReporter {
    pub fn new(registry: Arc<JobRegistry>, id: JobId) -> Self {
        Self { registry, id }
    }

    fn log_rejection(&self, result: Result<Job, RegistryError>) {
        if let Err(e) = result {
            tracing::warn!(job_id = %self.id, error = %e, "Registry rejected job update");
        }
    }
}

impl JobReporter for RegistryReporter {
    fn stage(&self, status: JobStatus, progress: u8, message: &str) {
        tracing::info!(job_id = %self.id, status = %status, progress, message, "Job stage");
        self.log_rejection(self.registry.transition(self.id, status, progress, message));
    }

    fn set_title(&self, title: &str) {
        self.log_rejection(self.registry.set_title(self.id, title));
    }

    fn complete(&self, stems: &StemMap) {
        self.log_rejection(self.registry.complete(self.id, stems));
    }

    fn fail(&self, message: &str) {
        self.log_rejection(self.registry.fail(self.id, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn url_job(registry: &JobRegistry) -> Job {
        registry.create(&JobSource::Url("https://youtu.be/abc".into()), "htdemucs")
    }

    fn walk_to_organizing(registry: &JobRegistry, id: JobId) {
        registry.transition(id, JobStatus::Downloading, 10, "Downloading audio...").unwrap();
        registry.transition(id, JobStatus::Downloading, 40, "Download complete").unwrap();
        registry.transition(id, JobStatus::Separating, 50, "Separating stems...").unwrap();
        registry.transition(id, JobStatus::Separating, 80, "Separation complete").unwrap();
        registry.transition(id, JobStatus::Organizing, 90, "Organizing files...").unwrap();
    }

    #[test]
    fn test_create_starts_queued() {
        let registry = JobRegistry::new();
        let job = url_job(&registry);
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0);
        assert_eq!(job.message, "Job queued");
        assert_eq!(registry.get(job.id), Some(job));
    }

    #[test]
    fn test_get_returns_snapshot() {
        let registry = JobRegistry::new();
        let id = url_job(&registry).id;
        let mut snapshot = registry.get(id).unwrap();
        snapshot.status = JobStatus::Complete;
        snapshot.title = "tampered".into();

        let fresh = registry.get(id).unwrap();
        assert_eq!(fresh.status, JobStatus::Queued);
        assert!(fresh.title.is_empty());
    }

    #[test]
    fn test_full_lifecycle() {
        let registry = JobRegistry::new();
        let id = url_job(&registry).id;
        walk_to_organizing(&registry, id);
        registry.set_title(id, "My_Song").unwrap();

        let mut stems = StemMap::new();
        stems.insert("vocals".into(), PathBuf::from("output/My_Song/My_Song_vocals.wav"));
        let job = registry.complete(id, &stems).unwrap();

        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.progress, 100);
        assert_eq!(job.message, "Processing complete!");
        assert_eq!(job.title, "My_Song");
        assert_eq!(job.stems, stems);
        assert!(job.error.is_none());
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let registry = JobRegistry::new();
        let id = url_job(&registry).id;
        let err = registry.transition(id, JobStatus::Organizing, 90, "x").unwrap_err();
        assert_eq!(
            err,
            RegistryError::IllegalTransition {
                id,
                from: JobStatus::Queued,
                to: JobStatus::Organizing,
            }
        );
        assert!(registry.complete(id, &StemMap::new()).is_err());
        assert_eq!(registry.get(id).unwrap().status, JobStatus::Queued);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let registry = JobRegistry::new();
        let id = url_job(&registry).id;
        registry.fail(id, "Download failed: boom").unwrap();

        assert!(registry.transition(id, JobStatus::Downloading, 10, "again").is_err());
        assert!(registry.fail(id, "twice").is_err());
        assert_eq!(registry.get(id).unwrap().message, "Download failed: boom");
    }

    #[test]
    fn test_progress_never_decreases() {
        let registry = JobRegistry::new();
        let id = url_job(&registry).id;
        registry.transition(id, JobStatus::Downloading, 40, "Download complete").unwrap();
        let job = registry.transition(id, JobStatus::Downloading, 10, "late report").unwrap();
        assert_eq!(job.progress, 40);
    }

    #[test]
    fn test_fail_keeps_progress() {
        let registry = JobRegistry::new();
        let id = url_job(&registry).id;
        registry.transition(id, JobStatus::Downloading, 40, "Download complete").unwrap();
        registry.transition(id, JobStatus::Separating, 50, "Separating stems...").unwrap();
        let job = registry.fail(id, "Separation failed: oom").unwrap();

        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.progress, 50);
        assert_eq!(job.error.as_deref(), Some("Separation failed: oom"));
        assert!(job.stems.is_empty());
    }

    #[test]
    fn test_unknown_job() {
        let registry = JobRegistry::new();
        let id = JobId::new_v4();
        assert!(registry.get(id).is_none());
        assert_eq!(
            registry.fail(id, "x").unwrap_err(),
            RegistryError::UnknownJob(id)
        );
    }

    #[test]
    fn test_history_and_active_views() {
        let registry = JobRegistry::new();
        let first = url_job(&registry).id;
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = url_job(&registry).id;
        std::thread::sleep(std::time::Duration::from_millis(2));
        let failed = url_job(&registry).id;
        let running = url_job(&registry).id;

        for id in [first, second] {
            walk_to_organizing(&registry, id);
            registry.complete(id, &StemMap::new()).unwrap();
        }
        registry.fail(failed, "Download failed: x").unwrap();
        registry.transition(running, JobStatus::Downloading, 10, "Downloading audio...").unwrap();

        let history: Vec<JobId> = registry.history().iter().map(|j| j.id).collect();
        assert_eq!(history, vec![second, first]);
        let active: Vec<JobId> = registry.active().iter().map(|j| j.id).collect();
        assert_eq!(active, vec![running]);
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_subscribe_sees_updates() {
        let registry = JobRegistry::new();
        let mut rx = registry.subscribe();
        let id = url_job(&registry).id;
        registry.transition(id, JobStatus::Downloading, 10, "Downloading audio...").unwrap();

        let created = rx.try_recv().unwrap();
        assert_eq!(created.status, JobStatus::Queued);
        let moved = rx.try_recv().unwrap();
        assert_eq!((moved.id, moved.progress), (id, 10));
    }

    #[test]
    fn test_slow_subscriber_lags_then_resumes() {
        use tokio::sync::broadcast::error::TryRecvError;

        let registry = JobRegistry::new();
        let mut rx = registry.subscribe();
        let overflow = 5;
        let mut last = None;
        for _ in 0..UPDATE_CHANNEL_CAPACITY + overflow {
            last = Some(url_job(&registry).id);
        }

        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Lagged(overflow as u64));
        let mut newest = None;
        while let Ok(job) = rx.try_recv() {
            newest = Some(job.id);
        }
        assert_eq!(newest, last);

        // Updates keep flowing after the lag.
        let id = url_job(&registry).id;
        assert_eq!(rx.try_recv().unwrap().id, id);
    }

    #[test]
    fn test_reporter_ignores_rejections() {
        let registry = Arc::new(JobRegistry::new());
        let id = url_job(&registry).id;
        let reporter = RegistryReporter::new(Arc::clone(&registry), id);

        reporter.fail("Download failed: x");
        reporter.stage(JobStatus::Separating, 50, "Separating stems...");
        let job = registry.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.message, "Download failed: x");
    }
}
