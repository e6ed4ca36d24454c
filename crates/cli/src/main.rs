// crates/cli/src/main.rs
//! `stemsplit` command-line binary.

mod args;
mod progress;
mod run;

use std::process::ExitCode;
use std::sync::Arc;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use indicatif::MultiProgress;
use stemsplit_core::paths::ensure_directories;
use stemsplit_core::preflight::{check_audio_tool, check_disk_space};
use stemsplit_core::{Config, Pipeline};

use crate::args::{Cli, Source};
use crate::run::{App, CliError};

const RULE: &str = "============================================================";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(output) = &cli.output {
        config.output_dir = output.clone();
    }
    config.keep_original = !cli.no_original;
    config.cleanup_temp = !cli.keep_temp;

    let model = cli.model.clone().unwrap_or_else(|| config.default_model.clone());
    if !config.is_known_model(&model) {
        Cli::command()
            .error(
                ErrorKind::InvalidValue,
                format!(
                    "invalid value '{model}' for '--model' [possible values: {}]",
                    config.available_models.join(", ")
                ),
            )
            .exit();
    }

    let Some(source) = cli.source() else {
        let _ = Cli::command().print_help();
        return ExitCode::FAILURE;
    };

    if let Err(e) = ensure_directories(&config) {
        eprintln!("error: {e}");
        return ExitCode::FAILURE;
    }
    let _log_guard = match stemsplit_observability::init_logging(&config.log_dir, &config.log_level) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!("{RULE}");
    tracing::info!("Stem Splitter v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("{RULE}");

    match run(config, source, &model).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn preflight(config: &Config) -> Result<(), CliError> {
    tracing::info!("Running pre-flight checks...");
    if let Err(e) = check_audio_tool(&config.tools.ffmpeg) {
        tracing::error!("FFmpeg not found! Please install FFmpeg first.");
        tracing::error!("Windows: winget install FFmpeg");
        tracing::error!("macOS: brew install ffmpeg");
        tracing::error!("Linux: sudo apt install ffmpeg");
        return Err(e.into());
    }
    check_disk_space(&config.output_dir, config.min_free_space_gb)?;
    tracing::info!("[OK] All checks passed");
    Ok(())
}

async fn run(config: Config, source: Source, model: &str) -> Result<(), CliError> {
    preflight(&config)?;

    let output_dir = config.output_dir.clone();
    let pipeline = Arc::new(Pipeline::from_config(&config));
    let app = App::new(config, pipeline, MultiProgress::new());

    let summary = match source {
        Source::File(path) => {
            let out = app.run_local(&path, model).await?;
            tracing::info!(folder = %out.organized.folder.display(), "Complete!");
            return Ok(());
        }
        Source::Url(url) => app.run_urls(&[url], model).await?,
        Source::Batch(path) => app.run_batch_file(&path, model).await?,
    };

    tracing::info!("{RULE}");
    tracing::info!(
        completed = summary.completed.len(),
        failed = summary.failed.len(),
        skipped = summary.skipped,
        "All processing complete!"
    );
    tracing::info!("Output directory: {}", output_dir.display());
    tracing::info!("{RULE}");
    Ok(())
}
