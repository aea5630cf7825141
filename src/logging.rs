//! Tracing subscriber setup.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingSection;

/// File name prefix for rotated log files.
const LOG_FILE_PREFIX: &str = "precast-live.log";

/// Build the filter: `RUST_LOG` if set, otherwise `level`.
pub fn build_filter(level: &str) -> Result<EnvFilter> {
    match std::env::var("RUST_LOG") {
        Ok(directive) if !directive.is_empty() => {
            EnvFilter::try_new(&directive).with_context(|| format!("Invalid RUST_LOG '{}'", directive))
        }
        _ => EnvFilter::try_new(level).with_context(|| format!("Invalid log level '{}'", level)),
    }
}

/// Install the global subscriber. Logs go to stderr, and additionally to a
/// daily-rotated file when `settings.directory` is set. Keep the returned
/// guard alive for the life of the process so buffered file output is
/// flushed.
pub fn init(level: &str, settings: &LoggingSection) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(level)?;

    let (file_writer, guard) = match &settings.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter);

    if settings.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(file_writer.map(|w| fmt::layer().json().with_ansi(false).with_writer(w)))
            .try_init()
            .context("Failed to install tracing subscriber")?;
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .with(file_writer.map(|w| fmt::layer().with_ansi(false).with_writer(w)))
            .try_init()
            .context("Failed to install tracing subscriber")?;
    }

    Ok(guard)
}
