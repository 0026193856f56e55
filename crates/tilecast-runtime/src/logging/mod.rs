//! Per-run profiling output.
//!
//! The server charges every modeled cost (broadcasts, compute steps, the
//! epilogue, host streaming) to a [RunLogger], which renders a summary table
//! through the configured sinks when the run retires.

mod profile;
mod run;

pub use run::RunLogger;
