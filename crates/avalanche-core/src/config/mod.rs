//! Configuration helpers shared by avalanche binaries.

mod vars;

pub use vars::{InterpolationResult, interpolate};
