//! Global configuration, loaded once from `tilecast.toml` with environment
//! overrides.

mod base;

/// Logger sink configuration shared by the profiling output.
pub mod logger;

pub use base::*;
