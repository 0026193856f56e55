//! Run orchestration: entry points, step lifecycle and the pipeline driver.

mod base;
mod pipeline;

pub use base::*;
pub use pipeline::*;
