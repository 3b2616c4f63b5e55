//! Metrics and observability infrastructure.
//!
//! - `events`: internal event types and the `InternalEvent` trait
//! - `server`: Prometheus recorder and the optional HTTP endpoint

pub mod events;
pub mod server;

pub use server::{DEFAULT_METRICS_ADDR, MetricsController, init_global, init_test};

/// Emit an internal event as its metric.
///
/// ```ignore
/// use avalanche_core::emit;
/// use avalanche_core::metrics::events::LinesRead;
///
/// emit!(LinesRead { count: 10_000 });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}

pub use emit;
