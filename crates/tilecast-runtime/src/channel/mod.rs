//! Static allocation of broadcast channels into parity classes.

mod base;

pub use base::*;
