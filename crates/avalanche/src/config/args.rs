use std::path::PathBuf;

use clap::Parser;

/// Load gzip TSV app-install logs into sharded key-value stores.
#[derive(Parser, Debug, Default)]
#[command(version)]
pub struct CliArgs {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Input file glob, e.g. /data/appsinstalled/*.tsv.gz
    #[arg(long)]
    pub pattern: Option<String>,

    /// Number of chunks parsed in parallel
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Parse and log without writing to any store (enables debug logging)
    #[arg(long)]
    pub dry: bool,

    /// Shard mapping; repeat for each category. Replaces the configured table
    #[arg(long = "shard", value_name = "CATEGORY=HOST:PORT")]
    pub shards: Vec<String>,

    /// Append logs to this file instead of stderr
    #[arg(short, long, value_name = "PATH")]
    pub log: Option<PathBuf>,

    /// Highest acceptable per-file error rate
    #[arg(long)]
    pub max_error_rate: Option<f64>,

    /// Leave files over the error threshold in place instead of marking them done
    #[arg(long)]
    pub keep_failed: bool,
}
