use std::path::PathBuf;

use clap::Parser;

/// Download audio, split it into stems, and organize the results.
#[derive(Parser, Debug)]
#[command(name = "stemsplit")]
#[command(version)]
#[command(about = "YouTube/SoundCloud stem splitter", long_about = None)]
#[command(after_help = "Examples:\n  \
    stemsplit --url https://youtu.be/dQw4w9WgXcQ\n  \
    stemsplit --batch urls.txt --model htdemucs_6s\n  \
    stemsplit --file song.mp3 --output ./stems")]
pub struct Cli {
    /// YouTube or SoundCloud URL
    #[arg(long, conflicts_with_all = ["batch", "file"])]
    pub url: Option<String>,

    /// Text file with URLs (one per line)
    #[arg(long, conflicts_with = "file")]
    pub batch: Option<PathBuf>,

    /// Local audio file to process
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Separation model (default: configured default model)
    #[arg(long)]
    pub model: Option<String>,

    /// Output directory
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Keep temporary files
    #[arg(long)]
    pub keep_temp: bool,

    /// Don't keep the original audio file
    #[arg(long)]
    pub no_original: bool,

    /// TOML config file (falls back to $STEMSPLIT_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// What the invocation asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Url(String),
    Batch(PathBuf),
    File(PathBuf),
}

impl Cli {
    pub fn source(&self) -> Option<Source> {
        if let Some(url) = &self.url {
            Some(Source::Url(url.clone()))
        } else if let Some(path) = &self.batch {
            Some(Source::Batch(path.clone()))
        } else {
            self.file.clone().map(Source::File)
        }
    }
}
