//! Host-side streaming: stream bookkeeping and host/tile layout.

mod base;
mod layout;

pub use base::*;
pub use layout::*;
