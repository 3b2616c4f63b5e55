//! Shutdown signal handling.
//!
//! A signal only requests a stop; the loader decides how far to drain before
//! exiting.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Resolve on the first SIGINT, SIGTERM or SIGQUIT.
///
/// Falls back to Ctrl-C alone if the Unix handlers cannot be installed.
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let handlers = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
        signal(SignalKind::quit()),
    );
    let (Ok(mut sigint), Ok(mut sigterm), Ok(mut sigquit)) = handlers else {
        warn!("Failed to install signal handlers, listening for ctrl-c only");
        wait_for_ctrl_c().await;
        return;
    };

    let name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    };
    info!(signal = name, "Shutdown signal received");
}

/// Resolve on Ctrl-C.
#[cfg(not(unix))]
pub async fn shutdown_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!(signal = "ctrl-c", "Shutdown signal received"),
        // Never resolve rather than trigger a spurious shutdown.
        Err(e) => {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    }
}

/// Cancel `token` when a shutdown signal arrives.
pub fn cancel_on_signal(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => token.cancel(),
            _ = token.cancelled() => {}
        }
    })
}
