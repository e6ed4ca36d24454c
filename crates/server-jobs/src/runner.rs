// crates/server-jobs/src/runner.rs
//! Dispatches pipeline workers behind an admission gate.

use std::sync::Arc;

use stemsplit_core::{JobSource, Pipeline, PipelineError};
use tokio::sync::Semaphore;

use crate::registry::{JobRegistry, RegistryReporter};
use crate::types::JobHandle;

/// Spawns one task per submitted job.
///
/// Every task is spawned immediately, but only `max_concurrent` of them run
/// the pipeline at once; the rest wait in `queued` for a permit.
pub struct JobRunner {
    registry: Arc<JobRegistry>,
    pipeline: Arc<Pipeline>,
    admission: Arc<Semaphore>,
    max_concurrent: usize,
}

impl JobRunner {
    pub fn new(registry: Arc<JobRegistry>, pipeline: Arc<Pipeline>, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            registry,
            pipeline,
            admission: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Register a job and spawn its worker. Returns without waiting.
    pub fn submit(&self, source: JobSource, model: &str) -> JobHandle {
        let job = self.registry.create(&source, model);
        let id = job.id;
        let model = model.to_string();
        let registry = Arc::clone(&self.registry);
        let pipeline = Arc::clone(&self.pipeline);
        let admission = Arc::clone(&self.admission);

        let task = tokio::spawn(async move {
            let _permit = match admission.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    tracing::error!(job_id = %id, error = %e, "Admission gate closed");
                    let _ = registry.fail(id, "Error: job runner shut down");
                    return;
                }
            };
            tracing::debug!(job_id = %id, "Job admitted");

            // Inner task so a panic surfaces as a JoinError here instead of
            // leaving the job stuck in a non-terminal state.
            let reporter = RegistryReporter::new(Arc::clone(&registry), id);
            let worker = tokio::spawn(async move { pipeline.run(&source, &model, &reporter).await });

            match worker.await {
                Ok(Ok(output)) => {
                    tracing::debug!(job_id = %id, title = %output.title, "Worker finished");
                }
                Ok(Err(e)) => {
                    tracing::debug!(job_id = %id, error = %e, "Worker finished with error");
                }
                Err(e) => {
                    tracing::error!(job_id = %id, error = %e, "Pipeline worker panicked");
                    if let Err(reg) = registry.fail(id, &PipelineError::WorkerPanicked.to_string()) {
                        tracing::warn!(job_id = %id, error = %reg, "Could not mark panicked job");
                    }
                }
            }
        });

        JobHandle::new(id, task, Arc::clone(&self.registry))
    }

    /// Submit one job per URL. A failing job never affects its siblings.
    pub fn submit_batch<I, S>(&self, urls: I, model: &str) -> Vec<JobHandle>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        urls.into_iter()
            .map(|url| self.submit(JobSource::Url(url.into()), model))
            .collect()
    }
}
