// crates/observability/src/lib.rs
//! Logging setup shared by the server and CLI binaries.
//!
//! Two layers: a console layer on stderr and a non-blocking, daily-rolling
//! file layer (`stemsplit.log` in the log directory). `RUST_LOG` takes
//! precedence over the configured level for both.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub const LOG_FILE_NAME: &str = "stemsplit.log";

/// Third-party targets that are too chatty at `info`.
const NOISY_TARGETS: &[(&str, &str)] = &[
    ("hyper", "warn"),
    ("hyper_util", "warn"),
    ("tower_http", "info"),
    ("mio", "warn"),
];

/// Build the filter: `RUST_LOG` if set, else `level` plus the noisy-target
/// overrides.
pub fn build_env_filter(level: &str) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    filter_from_level(level)
}

fn filter_from_level(level: &str) -> anyhow::Result<EnvFilter> {
    let mut directives = vec![level.to_string()];
    directives.extend(NOISY_TARGETS.iter().map(|(t, l)| format!("{t}={l}")));
    let filter_str = directives.join(",");
    EnvFilter::try_new(&filter_str).with_context(|| format!("Invalid tracing filter '{filter_str}'"))
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// lifetime of `main`.
pub fn init_logging(log_dir: &Path, level: &str) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(build_env_filter(level)?);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer)
        .with_target(true)
        .with_thread_names(true)
        .with_filter(build_env_filter(level)?);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Global tracing subscriber already set")?;

    tracing::debug!(dir = %log_dir.display(), level, "Logging initialized");
    Ok(guard)
}

/// Console-only logging for tests and short-lived tools.
pub fn init_console_logging(level: &str) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(build_env_filter(level)?)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Global tracing subscriber already set: {e}"))
}
