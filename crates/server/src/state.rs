// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use stemsplit_core::{Config, Pipeline};
use stemsplit_jobs::{JobRegistry, JobRunner};

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    pub config: Config,
    /// Owns the job registry and the admission gate.
    pub runner: Arc<JobRunner>,
}

impl AppState {
    /// Wire the production collaborators from `config`.
    pub fn new(config: Config) -> Arc<Self> {
        let pipeline = Arc::new(Pipeline::from_config(&config));
        let runner = JobRunner::new(
            Arc::new(JobRegistry::new()),
            pipeline,
            config.admission_limit(),
        );
        Self::with_runner(config, Arc::new(runner))
    }

    /// Build state around an existing runner (tests inject fakes this way).
    pub fn with_runner(config: Config, runner: Arc<JobRunner>) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            config,
            runner,
        })
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        self.runner.registry()
    }

    /// Get uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
