//! Tracing initialization for CLI applications.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use snafu::ResultExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::{OpenLogFileSnafu, TracingError};

/// Where and how verbosely to log.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Filter used when `RUST_LOG` is unset.
    pub default_level: &'static str,
    /// Append to this file instead of writing to stderr.
    pub file: Option<PathBuf>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            default_level: "info",
            file: None,
        }
    }
}

/// Initialize the global subscriber.
///
/// `RUST_LOG` takes precedence over `options.default_level`. File output is
/// written without ANSI colours.
pub fn init_tracing(options: &LogOptions) -> Result<(), TracingError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.default_level));

    let (stderr_layer, file_layer) = match &options.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .context(OpenLogFileSnafu { path: path.clone() })?;
            let layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(Arc::new(file));
            (None, Some(layer))
        }
        None => {
            let layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr);
            (Some(layer), None)
        }
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(())
}
