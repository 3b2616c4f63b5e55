//! Prometheus recorder installation and the `/metrics` endpoint.
//!
//! The recorder is process-global, so it is installed at most once and kept in
//! a `OnceLock`. Without a recorder every `emit!` is a cheap no-op, which is what
//! tests and runs with metrics disabled get. The HTTP endpoint lives only as
//! long as the run that started it.

use std::net::SocketAddr;
use std::sync::OnceLock;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use snafu::prelude::*;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::{
    AddressParseSnafu, AlreadyInitializedSnafu, MetricsError, NotInitializedSnafu,
    PrometheusInitSnafu,
};

/// Default metrics address.
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9090";

/// Histogram buckets (seconds) sized for store round trips and whole files.
const DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0,
];

static CONTROLLER: OnceLock<MetricsController> = OnceLock::new();

/// Handle to the installed recorder.
pub struct MetricsController {
    handle: PrometheusHandle,
}

impl MetricsController {
    /// Get the global controller.
    pub fn get() -> Result<&'static Self, MetricsError> {
        CONTROLLER.get().context(NotInitializedSnafu)
    }

    /// Render metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

fn install() -> Result<(), MetricsError> {
    let handle = PrometheusBuilder::new()
        .set_buckets(DURATION_BUCKETS)
        .context(PrometheusInitSnafu)?
        .install_recorder()
        .context(PrometheusInitSnafu)?;

    CONTROLLER
        .set(MetricsController { handle })
        .map_err(|_| AlreadyInitializedSnafu.build())
}

/// Install the recorder and serve `/metrics` and `/health` on `address` until
/// `stop` is cancelled.
///
/// Must be called from within a tokio runtime.
pub fn init_global(address: &str, stop: CancellationToken) -> Result<(), MetricsError> {
    let addr: SocketAddr = address.parse().context(AddressParseSnafu)?;
    install()?;
    let state = ServerState {
        handle: CONTROLLER.get().context(NotInitializedSnafu)?.handle.clone(),
        stop,
    };
    tokio::spawn(serve(addr, state));
    Ok(())
}

/// Install the recorder without an HTTP endpoint. Safe to call repeatedly
/// and from concurrent test threads.
pub fn init_test() {
    if install().is_err() {
        while CONTROLLER.get().is_none() {
            std::hint::spin_loop();
        }
    }
}

#[derive(Clone)]
struct ServerState {
    handle: PrometheusHandle,
    stop: CancellationToken,
}

fn router(state: ServerState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn serve(addr: SocketAddr, state: ServerState) {
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, error = %e, "Failed to bind metrics endpoint");
            return;
        }
    };
    info!(%addr, "Metrics endpoint listening");

    let stop = state.stop.clone();
    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(stop.cancelled_owned())
        .await;
    if let Err(e) = result {
        error!(%addr, error = %e, "Metrics endpoint failed");
    }
}

async fn metrics_handler(State(state): State<ServerState>) -> String {
    state.handle.render()
}

/// 200 while loading, 503 once the endpoint has been told to stop.
async fn health_handler(State(state): State<ServerState>) -> (StatusCode, &'static str) {
    if state.stop.is_cancelled() {
        (StatusCode::SERVICE_UNAVAILABLE, "stopping\n")
    } else {
        (StatusCode::OK, "ok\n")
    }
}
