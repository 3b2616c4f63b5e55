//! Error types for configuration, metrics and logging setup.

use std::path::PathBuf;

use snafu::prelude::*;

// ============ Config Errors ============

/// Errors that can occur while loading and validating configuration.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Input pattern is empty.
    #[snafu(display("Source pattern cannot be empty"))]
    EmptyPattern,

    /// No shards configured.
    #[snafu(display("At least one shard must be configured"))]
    NoShards,

    /// A shard address is not `host:port`.
    #[snafu(display("Shard '{category}' has invalid address '{address}' (expected host:port)"))]
    InvalidShardAddress { category: String, address: String },

    /// A `--shard` argument is not `CATEGORY=HOST:PORT`.
    #[snafu(display("Invalid shard mapping '{value}' (expected CATEGORY=HOST:PORT)"))]
    InvalidShardMapping { value: String },

    /// A size-like setting is zero.
    #[snafu(display("'{field}' must be greater than zero"))]
    ZeroValue { field: &'static str },

    /// Error rate threshold out of range.
    #[snafu(display("max_error_rate must be in (0, 1], got {value}"))]
    ErrorRateOutOfRange { value: f64 },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file {}: {source}", path.display()))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },

    /// Metrics address could not be parsed.
    #[snafu(display("Failed to parse metrics address: {source}"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics recorder already installed.
    #[snafu(display("Metrics already initialized"))]
    AlreadyInitialized,

    /// Controller accessed before init.
    #[snafu(display("Metrics not initialized"))]
    NotInitialized,
}

// ============ Tracing Errors ============

/// Errors that can occur while setting up log output.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TracingError {
    /// Log file could not be opened for appending.
    #[snafu(display("Failed to open log file {}: {source}", path.display()))]
    OpenLogFile {
        path: PathBuf,
        source: std::io::Error,
    },
}
