//! Configuration for the avalanche loader.
//!
//! Every field has a default, so the loader runs without a file. Values come
//! from (lowest to highest precedence) built-in defaults, the YAML file given
//! with `--config`, and command-line flags.

mod args;

use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use avalanche_core::DEFAULT_METRICS_ADDR;
use avalanche_core::config::interpolate;
use avalanche_core::error::{ReadFileSnafu, YamlParseSnafu};

pub use args::CliArgs;

use crate::error::ConfigError;
use crate::source::CompressionFormat;

/// Input files and how to read them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    /// Glob on the file name; the directory part is literal.
    pub pattern: String,
    pub compression: CompressionFormat,
    /// Lines per chunk handed to a worker.
    pub chunk_lines: usize,
    /// Chunks parsed in parallel.
    pub workers: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            pattern: "/data/appsinstalled/*.tsv.gz".to_string(),
            compression: CompressionFormat::Gzip,
            chunk_lines: 10_000,
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(2)
}

/// Batching and retry behaviour of the shard uploaders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadConfig {
    /// Records per upsert call.
    pub batch_size: usize,
    /// Bounded queue length per shard.
    pub queue_capacity: usize,
    /// Retries after the initial attempt.
    pub retries: u32,
    pub backoff_base_ms: u64,
    /// Upper bound on a single upsert call.
    pub timeout_ms: u64,
    pub dry_run: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            queue_capacity: 5000,
            retries: 3,
            backoff_base_ms: 100,
            timeout_ms: 500,
            dry_run: false,
        }
    }
}

impl UploadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Sleep before retry `attempt` (1-based): `backoff_base * 2^attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        Duration::from_millis(self.backoff_base_ms).saturating_mul(factor)
    }
}

/// What happens to a file once it has been loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompletionConfig {
    /// Files at or above this error rate are rejected.
    pub max_error_rate: f64,
    /// Rename rejected files as done too.
    pub mark_failed_done: bool,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            max_error_rate: 0.01,
            mark_failed_done: true,
        }
    }
}

/// Optional Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: DEFAULT_METRICS_ADDR.to_string(),
        }
    }
}

/// Main configuration for avalanche.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub source: SourceConfig,
    /// Device category to `host:port`.
    pub shards: IndexMap<String, String>,
    pub upload: UploadConfig,
    pub completion: CompletionConfig,
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        // Every shard must speak the Redis protocol.
        let shards = [
            ("idfa", "127.0.0.1:33013"),
            ("gaid", "127.0.0.1:33014"),
            ("adid", "127.0.0.1:33015"),
            ("dvid", "127.0.0.1:33016"),
        ]
        .into_iter()
        .map(|(category, address)| (category.to_string(), address.to_string()))
        .collect();

        Self {
            source: SourceConfig::default(),
            shards,
            upload: UploadConfig::default(),
            completion: CompletionConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Build the effective configuration from command-line arguments.
    pub fn load(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::read(path)?,
            None => Self::default(),
        };
        config.apply_overrides(args)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a YAML document.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config = Self::deserialize(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        Self::deserialize(&contents)
    }

    fn deserialize(contents: &str) -> Result<Self, ConfigError> {
        let result = interpolate(contents);
        if !result.is_ok() {
            return Err(ConfigError::EnvInterpolation {
                message: result.errors.join("\n"),
            });
        }
        serde_yaml::from_str(&result.text).context(YamlParseSnafu)
    }

    /// Apply command-line flags on top of file values.
    pub fn apply_overrides(&mut self, args: &CliArgs) -> Result<(), ConfigError> {
        if let Some(pattern) = &args.pattern {
            self.source.pattern = pattern.clone();
        }
        if let Some(workers) = args.workers {
            self.source.workers = workers;
        }
        if args.dry {
            self.upload.dry_run = true;
        }
        if !args.shards.is_empty() {
            self.shards = args
                .shards
                .iter()
                .map(|value| parse_shard_mapping(value))
                .collect::<Result<_, _>>()?;
        }
        if let Some(rate) = args.max_error_rate {
            self.completion.max_error_rate = rate;
        }
        if args.keep_failed {
            self.completion.mark_failed_done = false;
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.pattern.trim().is_empty() {
            return Err(ConfigError::EmptyPattern);
        }
        if self.shards.is_empty() {
            return Err(ConfigError::NoShards);
        }
        for (category, address) in &self.shards {
            if !is_host_port(address) {
                return Err(ConfigError::InvalidShardAddress {
                    category: category.clone(),
                    address: address.clone(),
                });
            }
        }

        let sizes = [
            ("source.chunk_lines", self.source.chunk_lines),
            ("source.workers", self.source.workers),
            ("upload.batch_size", self.upload.batch_size),
            ("upload.queue_capacity", self.upload.queue_capacity),
        ];
        if let Some((field, _)) = sizes.into_iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::ZeroValue { field });
        }
        if self.upload.timeout_ms == 0 {
            return Err(ConfigError::ZeroValue {
                field: "upload.timeout_ms",
            });
        }

        let rate = self.completion.max_error_rate;
        if !(rate > 0.0 && rate <= 1.0) {
            return Err(ConfigError::ErrorRateOutOfRange { value: rate });
        }
        Ok(())
    }
}

fn parse_shard_mapping(value: &str) -> Result<(String, String), ConfigError> {
    match value.split_once('=') {
        Some((category, address)) if !category.trim().is_empty() => {
            Ok((category.trim().to_string(), address.trim().to_string()))
        }
        _ => Err(ConfigError::InvalidShardMapping {
            value: value.to_string(),
        }),
    }
}

fn is_host_port(address: &str) -> bool {
    match address.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok_and(|p| p > 0),
        None => false,
    }
}
