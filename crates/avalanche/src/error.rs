//! Error types for the avalanche loader.

use std::path::PathBuf;

use snafu::prelude::*;

pub use avalanche_core::error::{ConfigError, MetricsError, TracingError};

/// Errors that can occur while opening or reading an input file.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ReaderError {
    /// Input file could not be opened.
    #[snafu(display("Failed to open {}: {source}", path.display()))]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Decompression or read failure partway through a file.
    #[snafu(display("Failed to read {} after {lines} lines: {source}", path.display()))]
    Read {
        path: PathBuf,
        lines: u64,
        source: std::io::Error,
    },
}

/// Errors returned by a key-value store.
///
/// Any store error means none of the keys in that call are known to be written.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// Could not establish a connection.
    #[snafu(display("Failed to connect to Redis-protocol shard {address}: {source}"))]
    Connect {
        address: String,
        source: redis::RedisError,
    },

    /// The write command failed.
    #[snafu(display("Write to Redis-protocol shard {address} failed: {source}"))]
    Write {
        address: String,
        source: redis::RedisError,
    },

    /// The write did not complete within the store timeout.
    #[snafu(display("Write to {address} timed out after {timeout_ms}ms"))]
    Timeout { address: String, timeout_ms: u64 },

    /// Store refused the whole batch.
    #[snafu(display("Store {address} unavailable"))]
    Unavailable { address: String },
}

/// Errors that can occur while listing input files.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ListingError {
    /// File-name part of the pattern does not compile.
    #[snafu(display("Invalid file pattern '{pattern}': {source}"))]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },

    /// Directory exists but could not be read.
    #[snafu(display("Failed to list {}: {source}", dir.display()))]
    ReadDir {
        dir: PathBuf,
        source: std::io::Error,
    },
}

/// Top-level loader errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LoaderError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Listing error.
    #[snafu(display("Listing error: {source}"))]
    Listing { source: ListingError },

    /// Reader error.
    #[snafu(display("Reader error: {source}"))]
    Reader { source: ReaderError },

    /// Store setup error.
    #[snafu(display("Store error: {source}"))]
    Store { source: StoreError },

    /// Completed file could not be renamed.
    #[snafu(display("Failed to mark {} as done: {source}", path.display()))]
    MarkDone {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Shutdown requested while a file was being loaded.
    #[snafu(display("Interrupted while loading {}", path.display()))]
    Interrupted { path: PathBuf },

    /// Task join error.
    #[snafu(display("Task join error: {source}"))]
    TaskJoin { source: tokio::task::JoinError },

    /// Metrics error.
    #[snafu(display("Metrics error: {source}"))]
    Metrics { source: MetricsError },

    /// Tracing setup error.
    #[snafu(display("Tracing error: {source}"))]
    Tracing { source: TracingError },
}

impl LoaderError {
    /// Whether this error came from a shutdown request rather than a fault.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, LoaderError::Interrupted { .. })
    }
}

impl From<ConfigError> for LoaderError {
    fn from(source: ConfigError) -> Self {
        LoaderError::Config { source }
    }
}

impl From<ListingError> for LoaderError {
    fn from(source: ListingError) -> Self {
        LoaderError::Listing { source }
    }
}

impl From<ReaderError> for LoaderError {
    fn from(source: ReaderError) -> Self {
        LoaderError::Reader { source }
    }
}

impl From<StoreError> for LoaderError {
    fn from(source: StoreError) -> Self {
        LoaderError::Store { source }
    }
}

impl From<MetricsError> for LoaderError {
    fn from(source: MetricsError) -> Self {
        LoaderError::Metrics { source }
    }
}

impl From<TracingError> for LoaderError {
    fn from(source: TracingError) -> Self {
        LoaderError::Tracing { source }
    }
}
