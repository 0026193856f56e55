//! A pipelined tile matrix-multiply runtime over a square grid of nodes.
//!
//! Host matrices stream into per-node resident tiles; a run walks the
//! classic outer-product schedule, broadcasting one A tile per row and one
//! B tile per column each step over statically colored channel pairs. Two
//! parity classes double-buffer the receive side, so the broadcast of step
//! `s + 1` overlaps the update of step `s`. Every transfer and update books
//! its modeled cost into a cycle ledger, and an analytic predictor (refit
//! from measured runs by least squares) reproduces the same walls without
//! executing anything.

#[macro_use]
extern crate derive_new;

pub mod channel;
pub mod client;
pub mod compute;
pub mod config;
pub mod error;
pub mod grid;
pub mod id;
pub mod ingest;
pub mod metrics;
pub mod predict;
pub mod scheduler;
pub mod tile;
pub mod transfer;

mod logging;
mod server;

pub use client::GridClient;
pub use error::{ConfigurationError, RunError};
pub use grid::{GridDescriptor, GridDim, MatrixId, NodeId, TileDims};
pub use id::RunId;
pub use metrics::RunMetrics;
pub use predict::{CalibrationReport, CalibrationSweep, CostModel, RunPrediction};
pub use scheduler::EntryPoint;
pub use transfer::{FabricBackend, ManualBackend, TransferBackend};
