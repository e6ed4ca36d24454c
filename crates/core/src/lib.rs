// crates/core/src/lib.rs
pub mod config;
pub mod downloader;
pub mod error;
pub mod file_manager;
pub mod paths;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod separator;
pub mod types;
pub mod validate;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use config::{AudioFormat, Config, Device, ToolPaths};
pub use downloader::{DownloadedAudio, Downloader, YtDlpDownloader};
pub use error::*;
pub use file_manager::{FileManager, Organized, Organizer};
pub use pipeline::{Pipeline, PipelineOutput};
pub use separator::{DemucsSeparator, ModelCache, ModelSpec, Separator};
pub use types::*;
