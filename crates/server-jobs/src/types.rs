// crates/server-jobs/src/types.rs
//! Handle and error types for the job system.

use std::sync::Arc;

use stemsplit_core::{Job, JobId, JobStatus};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::registry::JobRegistry;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Job not found: {0}")]
    UnknownJob(JobId),

    #[error("Illegal transition for job {id}: {from} -> {to}")]
    IllegalTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
}

/// Handle to a submitted job.
///
/// The HTTP layer drops it and polls the registry; the CLI awaits it.
pub struct JobHandle {
    pub id: JobId,
    task: JoinHandle<()>,
    registry: Arc<JobRegistry>,
}

impl JobHandle {
    pub(crate) fn new(id: JobId, task: JoinHandle<()>, registry: Arc<JobRegistry>) -> Self {
        Self { id, task, registry }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the worker to finish and return the final job snapshot.
    pub async fn wait(self) -> Option<Job> {
        if let Err(e) = self.task.await {
            tracing::error!(job_id = %self.id, error = %e, "Job task ended abnormally");
        }
        self.registry.get(self.id)
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("finished", &self.task.is_finished())
            .finish()
    }
}
