//! Broadcast operations and the backends that move them.

mod backend;
mod base;

pub use backend::*;
pub use base::*;
