// crates/core/src/preflight.rs
//! Environment checks run before any job starts.

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use sysinfo::Disks;

use crate::error::PreflightError;

/// Timeout for each probe subprocess.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Run a command with a timeout, returning None if it times out or fails to start.
fn run_with_timeout(cmd: &mut Command) -> Option<std::process::Output> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .ok()?;

    let deadline = Instant::now() + PROBE_TIMEOUT;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return child.wait_with_output().ok(),
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(_) => return None,
        }
    }
}

/// Verify the audio tool (ffmpeg) is installed and runs.
pub fn check_audio_tool(program: &str) -> Result<(), PreflightError> {
    match run_with_timeout(Command::new(program).arg("-version")) {
        Some(output) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            tracing::debug!(
                tool = program,
                version = stdout.lines().next().unwrap_or_default(),
                "audio tool found"
            );
            Ok(())
        }
        _ => Err(PreflightError::AudioToolMissing(program.to_string())),
    }
}

/// Whether an NVIDIA GPU is visible to this process.
pub fn gpu_available() -> bool {
    run_with_timeout(Command::new("nvidia-smi").arg("-L"))
        .map(|o| o.status.success() && !o.stdout.is_empty())
        .unwrap_or(false)
}

/// Free space in bytes on the filesystem holding `dir`.
///
/// Picks the disk whose mount point is the longest prefix of the directory.
pub fn free_space_bytes(dir: &Path) -> Option<u64> {
    let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|d| dir.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| d.available_space())
}

/// Fail if fewer than `min_gb` gigabytes are free under `dir`.
///
/// An unknown disk (no matching mount point) passes with a warning.
pub fn check_disk_space(dir: &Path, min_gb: u64) -> Result<(), PreflightError> {
    match free_space_bytes(dir) {
        Some(bytes) => ensure_free_space(bytes, min_gb),
        None => {
            tracing::warn!(dir = %dir.display(), "Could not determine free disk space");
            Ok(())
        }
    }
}

fn ensure_free_space(available_bytes: u64, min_gb: u64) -> Result<(), PreflightError> {
    let available_gb = available_bytes as f64 / BYTES_PER_GB;
    if available_gb >= min_gb as f64 {
        Ok(())
    } else {
        Err(PreflightError::InsufficientDiskSpace {
            required_gb: min_gb,
            available_gb,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_audio_tool() {
        let err = check_audio_tool("definitely-not-a-real-ffmpeg-binary").unwrap_err();
        assert!(matches!(err, PreflightError::AudioToolMissing(ref p) if p.contains("definitely")));
    }

    #[test]
    fn test_ensure_free_space_threshold() {
        let two_gb = 2 * 1024 * 1024 * 1024;
        assert!(ensure_free_space(two_gb, 2).is_ok());
        assert!(ensure_free_space(two_gb - 1, 2).is_err());
        assert!(ensure_free_space(0, 0).is_ok());
    }

    #[test]
    fn test_check_disk_space_zero_threshold_passes() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_disk_space(dir.path(), 0).is_ok());
    }

    #[test]
    fn test_check_disk_space_impossible_threshold_fails() {
        let dir = tempfile::tempdir().unwrap();
        if free_space_bytes(dir.path()).is_some() {
            let err = check_disk_space(dir.path(), u64::MAX / 2).unwrap_err();
            assert!(matches!(err, PreflightError::InsufficientDiskSpace { .. }));
        }
    }
}
