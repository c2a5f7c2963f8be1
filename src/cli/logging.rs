//! Tracing setup: compact stderr output plus a non-blocking log file.

use super::config::LoggingConfig;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Build the filter: `RUST_LOG` if set, otherwise the configured level
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the process.
pub fn init(config: &LoggingConfig, directory: &Path) -> Result<WorkerGuard, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(directory)
        .map_err(|e| format!("failed to create log directory '{}': {}", directory.display(), e))?;

    let file_appender = tracing_appender::rolling::never(directory, &config.file);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let terminal_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .with_filter(env_filter(&config.level));

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking)
        .with_filter(env_filter(&config.level));

    tracing_subscriber::registry()
        .with(terminal_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}
