//! Tile buffers and their ownership through the transfer/compute cycle.

mod base;
mod slots;
mod store;

pub use base::*;
pub use slots::*;
pub use store::*;
