//! Avalanche: bulk loader for gzip-compressed app-install dumps.
//!
//! This crate handles:
//! - Discovering input files by glob and marking them done once loaded
//! - Reading gzip TSV files in chunks and parsing them in parallel
//! - Routing records to shards by device type
//! - Batched, retrying upserts into one key-value store per shard

pub mod config;
pub mod error;
pub mod pipeline;
pub mod record;
pub mod shard;
pub mod source;

pub use config::{CliArgs, Config};
pub use error::LoaderError;
pub use pipeline::{FileLoader, FileOutcome, FileReport, LoadSummary, Tally};

pub use avalanche_core::{LogOptions, cancel_on_signal, init_metrics, init_tracing};
