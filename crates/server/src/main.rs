// crates/server/src/main.rs
//! Stem-separation server binary.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use stemsplit_core::paths::ensure_directories;
use stemsplit_core::preflight::{check_audio_tool, check_disk_space};
use stemsplit_core::{Config, Device};
use stemsplit_server::{create_app, AppState};

#[derive(Debug, Parser)]
#[command(name = "stemsplit-server", version, about = "HTTP API for audio stem separation")]
struct Args {
    /// TOML config file (falls back to $STEMSPLIT_CONFIG).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the listen port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.bind.set_port(port);
    }

    ensure_directories(&config)?;
    let _log_guard = stemsplit_observability::init_logging(&config.log_dir, &config.log_level)?;

    // Missing tools only fail individual jobs here; warn so the operator knows.
    if let Err(e) = check_audio_tool(&config.tools.ffmpeg) {
        tracing::warn!(error = %e, "Jobs will fail until ffmpeg is available");
    }
    if let Err(e) = check_disk_space(&config.output_dir, config.min_free_space_gb) {
        tracing::warn!(error = %e, "Low disk space");
    }

    let requested = config.device;
    config.device = requested.resolve();
    if requested == Device::Auto && config.device == Device::Cpu {
        tracing::warn!("No GPU detected, separation will run on CPU and be significantly slower");
    }

    let bind = config.bind;
    tracing::info!(
        default_model = %config.default_model,
        max_concurrent_jobs = config.admission_limit(),
        device = config.device.as_str(),
        output_dir = %config.output_dir.display(),
        "Starting server"
    );

    let state = AppState::new(config);
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    tracing::info!(addr = %bind, "Listening");
    eprintln!("\n  stemsplit server ready at http://{bind}\n");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for ctrl-c");
    }
}
