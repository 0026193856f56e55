#![warn(missing_docs)]

//! Shared utilities for the tilecast grid runtime.

/// Future helpers for bridging sync and async call sites.
pub mod future;
/// Synchronous readers over async results.
pub mod reader;
/// Small numeric helpers used by the performance predictor.
pub mod stats;
/// Element-wise tolerance checks for dense results.
pub mod tolerance;
