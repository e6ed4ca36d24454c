//! Centralized path functions for all app storage locations.

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::PreflightError;

/// Name of the append-only audit log kept in the output root.
pub const AUDIT_LOG_NAME: &str = "processed_files.log";

/// App cache root: `~/Library/Caches/stemsplit/` (macOS) or `~/.cache/stemsplit/` (Linux).
pub fn app_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("stemsplit"))
}

/// Audit log path inside an output root.
pub fn audit_log_path(output_dir: &Path) -> PathBuf {
    output_dir.join(AUDIT_LOG_NAME)
}

/// Create the output, temp and log directories (idempotent).
pub fn ensure_directories(config: &Config) -> Result<(), PreflightError> {
    for dir in [&config.output_dir, &config.temp_dir, &config.log_dir] {
        std::fs::create_dir_all(dir).map_err(|source| PreflightError::CreateDir {
            path: dir.clone(),
            source,
        })?;
    }
    Ok(())
}
