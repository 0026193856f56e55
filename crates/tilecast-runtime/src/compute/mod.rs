//! Local tile kernels and the per-node workers that run them.

mod base;
mod executor;

pub use base::*;
pub(crate) use executor::*;
