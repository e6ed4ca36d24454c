// crates/server-jobs/src/lib.rs
//! Job registry and background runner for stem-separation jobs.
//!
//! Provides:
//! - `JobRegistry`: single-lock job table handing out snapshot copies
//! - `RegistryReporter`: pipeline reporter that writes into the registry
//! - `JobRunner`: admission-gated dispatch of pipeline workers
//! - `JobHandle`: awaitable handle to one submitted job

pub mod registry;
pub mod runner;
pub mod types;

pub use registry::{JobRegistry, RegistryReporter};
pub use runner::JobRunner;
pub use types::{JobHandle, RegistryError};
