//! Tracing setup for the `retro` binary.
//!
//! Logs go to stderr (human-readable or JSON lines). When a log directory is
//! configured, a daily-rolling JSON file is written there as well. `RUST_LOG`
//! overrides the default filter.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    pub verbose: bool,
    pub json: bool,
    pub log_dir: Option<PathBuf>,
}

/// Keeps the file writer flushing until dropped.
pub struct TelemetryGuard {
    _file: Option<WorkerGuard>,
}

pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "retroboard=debug,retro=debug,tower_http=debug,info"
    } else {
        "retroboard=info,retro=info,warn"
    }
}

pub fn init_tracing(config: &TelemetryConfig) -> Result<TelemetryGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(config.verbose)));

    let stderr_layer = if config.json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(config.verbose)
            .boxed()
    };

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "retro.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to initialize tracing")?;

    Ok(TelemetryGuard { _file: guard })
}
