//! Structured Logger
//!
//! Wraps `tracing` with console output, optional NDJSON file rotation,
//! and environment-based level control (`RUST_LOG` beats the configured level).

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const FILE_PREFIX: &str = "aerodesk.log";

#[derive(Debug, Clone)]
pub struct LogOptions {
    pub level: String,
    /// Daily-rotated NDJSON files are written here when set.
    pub dir: Option<PathBuf>,
    /// Console lines as JSON instead of human-readable text.
    pub json: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            json: false,
        }
    }
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the global logger.
/// Calling this twice leaves the first subscriber in place.
pub fn init_logger(options: &LogOptions) -> Result<()> {
    // Rolling file appender: writes NDJSON to `<dir>/aerodesk.log.YYYY-MM-DD`
    let file_layer = match &options.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, FILE_PREFIX);
            Some(fmt::layer().json().with_writer(appender).with_ansi(false))
        }
        None => None,
    };

    let json_console = options
        .json
        .then(|| fmt::layer().json().with_writer(std::io::stdout));
    let plain_console = (!options.json).then(|| {
        fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(false)
            .with_ansi(true)
    });

    let _ = tracing_subscriber::registry()
        .with(env_filter(&options.level))
        .with(json_console)
        .with(plain_console)
        .with(file_layer)
        .try_init();

    Ok(())
}
