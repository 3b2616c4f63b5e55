//! Avalanche CLI: load app-install dumps into sharded key-value stores.

use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use avalanche::{
    CliArgs, Config, FileLoader, LoadSummary, LoaderError, LogOptions, cancel_on_signal,
    init_metrics, init_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    match run(args).await {
        Ok(summary) if summary.interrupted => {
            info!("Avalanche stopped before all files were loaded");
            ExitCode::from(130)
        }
        Ok(_) => {
            info!("Avalanche finished");
            ExitCode::SUCCESS
        }
        Err(e @ LoaderError::Tracing { .. }) => {
            eprintln!("Failed to initialize logging: {e}");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Avalanche failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: CliArgs) -> Result<LoadSummary, LoaderError> {
    init_tracing(&LogOptions {
        default_level: if args.dry { "debug" } else { "info" },
        file: args.log.clone(),
    })?;

    let config = Config::load(&args)?;

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());

    // Stops the metrics endpoint once the run returns.
    let metrics_stop = shutdown.child_token();
    let _metrics_guard = metrics_stop.clone().drop_guard();
    if config.metrics.enabled {
        init_metrics(&config.metrics.address, metrics_stop)?;
    }

    info!(options = ?args, "Avalanche started");

    FileLoader::connect(config, shutdown)?.run().await
}
