use crate::channel::ChannelId;
use crate::grid::{MatrixId, NodeId};
use thiserror::Error;

/// Invalid grid, tile, channel, or call combination.
///
/// Always detected eagerly, before any worker thread or buffer is allocated
/// for the offending operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// The channel budget cannot cover the requested parity classes.
    #[error(
        "Channel budget exhausted.\nCaused by:\n  {parity_classes} parity classes need {needed} channels but only {available} are available"
    )]
    ChannelExhausted {
        /// Parity classes requested.
        parity_classes: usize,
        /// Channels those classes require.
        needed: usize,
        /// Channels the configuration makes available.
        available: usize,
    },

    /// Zero parity classes were requested.
    #[error("Invalid parity class count.\nCaused by:\n  at least one parity class is required")]
    InvalidParity,

    /// Runs only execute on square grids.
    #[error(
        "Unsupported grid shape.\nCaused by:\n  runs require a square grid, got {rows}x{cols}"
    )]
    NonSquareGrid {
        /// Requested rows.
        rows: usize,
        /// Requested columns.
        cols: usize,
    },

    /// A grid or tile dimension is zero.
    #[error("Invalid dimension.\nCaused by:\n  {what} must be non-zero")]
    ZeroDimension {
        /// Which dimension was zero.
        what: &'static str,
    },

    /// The per-node working set does not fit in node memory.
    #[error(
        "Tile shape exceeds node memory.\nCaused by:\n  {needed} bytes needed but nodes hold {capacity}"
    )]
    TileTooLarge {
        /// Bytes the tile shape requires per node.
        needed: usize,
        /// Configured per-node capacity in bytes.
        capacity: usize,
    },

    /// A streamed host slice has the wrong length.
    #[error(
        "Host data has the wrong length.\nCaused by:\n  matrix {matrix} expects {expected} elements, got {actual}"
    )]
    DimensionMismatch {
        /// The matrix being streamed.
        matrix: MatrixId,
        /// Expected element count.
        expected: usize,
        /// Provided element count.
        actual: usize,
    },

    /// The launch entry point is not registered.
    #[error(
        "Unknown entry point `{name}`.\nCaused by:\n  valid entry points are `main` and `main_bias`"
    )]
    UnknownEntryPoint {
        /// The rejected name.
        name: String,
    },

    /// The matrix was already streamed into this grid.
    #[error(
        "Matrix {matrix} is already streaming.\nCaused by:\n  each input may be streamed once per grid"
    )]
    StreamAlreadyActive {
        /// The matrix with an active or finished stream.
        matrix: MatrixId,
    },

    /// Only input matrices can be streamed.
    #[error("Matrix {matrix} cannot be streamed in.\nCaused by:\n  only A, B and the bias are inputs")]
    NotAnInput {
        /// The rejected matrix.
        matrix: MatrixId,
    },

    /// `main_bias` was launched without a bias stream.
    #[error(
        "Entry point `main_bias` needs a bias.\nCaused by:\n  no bias stream was started before launch"
    )]
    MissingBiasStream,

    /// An input matrix was read back before it was ever streamed.
    #[error(
        "Matrix {matrix} was never streamed.\nCaused by:\n  reading an input back needs a stream first"
    )]
    StreamNotStarted {
        /// The matrix that was requested.
        matrix: MatrixId,
    },

    /// Only one run may be in flight per grid.
    #[error(
        "A run is already in flight.\nCaused by:\n  wait for read_back or abort before launching again"
    )]
    RunInFlight,
}

/// Failure of a launched run or of a blocking grid operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    /// The call was rejected before touching the grid.
    #[error(transparent)]
    Config(#[from] ConfigurationError),

    /// A broadcast missed its wall-clock deadline. Fatal to the run;
    /// in-flight buffers are drained back to their stores first.
    #[error(
        "Transfer timed out.\nCaused by:\n  step {step} on channel {channel} exceeded the {timeout_ms} ms deadline"
    )]
    TransferTimeout {
        /// Channel carrying the late broadcast.
        channel: ChannelId,
        /// Pipeline step of the late broadcast.
        step: usize,
        /// The configured deadline.
        timeout_ms: u64,
    },

    /// A compute task was activated before its inputs finished streaming.
    /// This is an internal invariant violation, not a recoverable state.
    #[error(
        "Compute activated on an incomplete stream.\nCaused by:\n  node {node} holds {received}/{expected} elements of {matrix}"
    )]
    IncompleteStream {
        /// Node whose task was activated.
        node: NodeId,
        /// The incomplete input.
        matrix: MatrixId,
        /// Elements received so far.
        received: usize,
        /// Elements the node expects.
        expected: usize,
    },

    /// The run was cancelled by [crate::client::GridClient::abort].
    #[error("Run aborted.\nCaused by:\n  abort() was requested while the run was in flight")]
    Aborted,

    /// Metrics were requested before any run finished.
    #[error("No completed run.\nCaused by:\n  metrics are available after the first run finishes")]
    NoCompletedRun,
}
