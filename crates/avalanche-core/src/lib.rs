//! avalanche-core: runtime plumbing shared by the avalanche loader.
//!
//! - `config` - environment variable interpolation for YAML config files
//! - `error` - error types for configuration, metrics and logging setup
//! - `metrics` - internal events, the `emit!` macro and the Prometheus endpoint
//! - `signal` - shutdown signal handling
//! - `tracing` - subscriber initialization

pub mod config;
pub mod error;
pub mod metrics;
pub mod signal;
pub mod tracing;

pub use config::{InterpolationResult, interpolate};
pub use error::{ConfigError, MetricsError, TracingError};
pub use metrics::{DEFAULT_METRICS_ADDR, MetricsController, init_global as init_metrics};
pub use signal::{cancel_on_signal, shutdown_signal};
pub use tracing::{LogOptions, init_tracing};
