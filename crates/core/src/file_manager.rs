// crates/core/src/file_manager.rs
//! FileManager: moves produced stems into the stable output layout.
//!
//! Layout: `<output>/<title>/<title>_<stem>.<ext>`, plus an optional
//! `<title>_original.<ext>` copy and an append-only audit log in the output
//! root.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use crate::error::OrganizeError;
use crate::paths::audit_log_path;
use crate::types::StemMap;

/// Result of a fully successful organize call.
#[derive(Debug, Clone, PartialEq)]
pub struct Organized {
    pub folder: PathBuf,
    /// Stem name → final path inside `folder`.
    pub stems: StemMap,
    pub original: Option<PathBuf>,
}

/// Places separated stems at their final location.
///
/// Synchronous; async callers run it on the blocking pool.
pub trait Organizer: Send + Sync {
    fn organize(
        &self,
        title: &str,
        stems: &StemMap,
        original: Option<&Path>,
    ) -> Result<Organized, OrganizeError>;
}

pub struct FileManager {
    output_dir: PathBuf,
    keep_original: bool,
    cleanup_temp: bool,
}

impl FileManager {
    pub fn new(output_dir: impl Into<PathBuf>, keep_original: bool, cleanup_temp: bool) -> Self {
        Self {
            output_dir: output_dir.into(),
            keep_original,
            cleanup_temp,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Remove and recreate `temp_dir`. Failures are logged, never raised.
    /// Returns whether the directory was cleaned.
    pub fn cleanup_temp_files(&self, temp_dir: &Path) -> bool {
        if !self.cleanup_temp {
            tracing::debug!(dir = %temp_dir.display(), "Temp cleanup disabled");
            return false;
        }
        if !temp_dir.exists() {
            return false;
        }
        let result = std::fs::remove_dir_all(temp_dir).and_then(|_| std::fs::create_dir_all(temp_dir));
        match result {
            Ok(()) => {
                tracing::info!(dir = %temp_dir.display(), "Temporary files cleaned up");
                true
            }
            Err(e) => {
                tracing::warn!(dir = %temp_dir.display(), error = %e, "Failed to cleanup temp files");
                false
            }
        }
    }

    fn append_audit_record(&self, title: &str, stems: &StemMap) -> std::io::Result<()> {
        let path = audit_log_path(&self.output_dir);
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(audit_record(title, stems, chrono::Local::now()).as_bytes())
    }
}

/// One audit block, in the human-readable log format.
fn audit_record<Tz: chrono::TimeZone>(
    title: &str,
    stems: &StemMap,
    at: chrono::DateTime<Tz>,
) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let mut out = String::new();
    out.push('\n');
    out.push_str(&"=".repeat(60));
    out.push('\n');
    out.push_str(&format!("Processed: {title}\n"));
    out.push_str(&format!("Timestamp: {}\n", at.format("%Y-%m-%d %H:%M:%S")));
    out.push_str("Stems created:\n");
    for (stem, path) in stems {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        out.push_str(&format!("  - {stem}: {name}\n"));
    }
    out
}

/// True when `title` names exactly one ordinary entry inside its parent.
fn is_plain_component(title: &str) -> bool {
    let mut components = Path::new(title).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(name)), None) if name == title
    )
}

fn extension_of(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("wav")
}

/// Rename, falling back to copy + remove when source and destination are on
/// different filesystems.
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            if !from.exists() {
                return Err(rename_err);
            }
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)
        }
    }
}

impl Organizer for FileManager {
    fn organize(
        &self,
        title: &str,
        stems: &StemMap,
        original: Option<&Path>,
    ) -> Result<Organized, OrganizeError> {
        if !is_plain_component(title) {
            return Err(OrganizeError::UnsafeTitle(title.to_string()));
        }
        let folder = self.output_dir.join(title);
        if folder.exists() {
            // Two sources with the same sanitized title share a folder.
            tracing::warn!(folder = %folder.display(), "Output folder already exists, files may be overwritten");
        }
        std::fs::create_dir_all(&folder).map_err(|source| OrganizeError::CreateFolder {
            path: folder.clone(),
            source,
        })?;

        let mut moved = StemMap::new();
        let mut failed = Vec::new();
        for (stem, src) in stems {
            let dest = folder.join(format!("{title}_{stem}.{}", extension_of(src)));
            match move_file(src, &dest) {
                Ok(()) => {
                    moved.insert(stem.clone(), dest);
                }
                Err(e) => {
                    tracing::error!(stem = %stem, from = %src.display(), to = %dest.display(), error = %e, "Failed to move stem");
                    failed.push((stem.clone(), e.to_string()));
                }
            }
        }

        let mut original_copy = None;
        if let (true, Some(src)) = (self.keep_original, original) {
            let dest = folder.join(format!("{title}_original.{}", extension_of(src)));
            match std::fs::copy(src, &dest) {
                Ok(_) => original_copy = Some(dest),
                Err(e) => {
                    tracing::error!(from = %src.display(), error = %e, "Failed to copy original audio")
                }
            }
        }

        if let Err(e) = self.append_audit_record(title, &moved) {
            tracing::error!(
                log = %audit_log_path(&self.output_dir).display(),
                error = %e,
                "Failed to append audit record"
            );
        }

        if !failed.is_empty() {
            return Err(OrganizeError::Partial {
                folder,
                moved,
                failed,
            });
        }

        tracing::info!(folder = %folder.display(), stems = moved.len(), "Organized output");
        Ok(Organized {
            folder,
            stems: moved,
            original: original_copy,
        })
    }
}
