use serde::{Deserialize, Serialize};

use crate::channel::ParityClass;
use crate::error::ConfigurationError;
use crate::grid::{GridDim, MatrixId, NodeId};

/// Grid program selected at launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPoint {
    /// Plain `C = A * B`.
    Main,
    /// `C = A * B + bias`, with the bias column added once after the last
    /// step.
    MainBias,
}

impl EntryPoint {
    pub fn parse(name: &str) -> Result<Self, ConfigurationError> {
        match name {
            "main" => Ok(Self::Main),
            "main_bias" => Ok(Self::MainBias),
            _ => Err(ConfigurationError::UnknownEntryPoint {
                name: name.to_string(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::MainBias => "main_bias",
        }
    }

    /// Whether the run ends with a bias epilogue.
    pub fn needs_bias(&self) -> bool {
        matches!(self, Self::MainBias)
    }
}

impl core::fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// One grid-wide broadcast lane: a row of the grid fanning out an A tile,
/// or a column fanning out a B tile.
///
/// Lanes of the same kind never contend with each other. The channel of a
/// step is shared grid-wide, but each row (or column) runs on its own
/// physical links, so `(channel, lane)` is the unit of serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BroadcastAxis {
    /// A tile of `(row, step)` fanned out across `row`.
    ARow(usize),
    /// B tile of `(step, col)` fanned out across `col`.
    BCol(usize),
}

impl BroadcastAxis {
    /// Matrix this lane carries.
    pub fn matrix(&self) -> MatrixId {
        match self {
            Self::ARow(_) => MatrixId::A,
            Self::BCol(_) => MatrixId::B,
        }
    }

    /// Row or column index of the lane.
    pub fn lane(&self) -> usize {
        match self {
            Self::ARow(row) => *row,
            Self::BCol(col) => *col,
        }
    }

    /// Node whose resident tile feeds the broadcast of `step`.
    pub fn source(&self, step: usize) -> NodeId {
        match self {
            Self::ARow(row) => NodeId::new(*row, step),
            Self::BCol(col) => NodeId::new(step, *col),
        }
    }

    /// Every node the broadcast lands on, the source included.
    pub fn dest_nodes(&self, grid: GridDim) -> Vec<NodeId> {
        match self {
            Self::ARow(row) => grid.row_nodes(*row).collect(),
            Self::BCol(col) => grid.col_nodes(*col).collect(),
        }
    }

    /// Hop count of the lane, the distance term of the transfer model.
    pub fn span(&self, grid: GridDim) -> usize {
        match self {
            Self::ARow(_) => grid.cols,
            Self::BCol(_) => grid.rows,
        }
    }
}

impl core::fmt::Display for BroadcastAxis {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::ARow(row) => write!(f, "A row {row}"),
            Self::BCol(col) => write!(f, "B col {col}"),
        }
    }
}

/// Where a step's operand tiles come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSelect {
    /// Receive slots of the given parity class.
    Staged(ParityClass),
    /// The node's own resident tiles (single-node grids).
    Resident,
}

/// Completion notices fed into the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A run started with the given entry point.
    Launched { entry: EntryPoint },
    /// A node's resident tile finished streaming in.
    HomeReady { matrix: MatrixId, node: NodeId },
    /// A broadcast delivered `step`'s tile to every node of its lane.
    BroadcastDone { axis: BroadcastAxis, step: usize },
    /// A node finished the update of `step`.
    ComputeDone { node: NodeId, step: usize },
    /// A node finished its bias epilogue.
    EpilogueDone { node: NodeId },
}

/// Work a completion unlocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerAction {
    /// Stage and submit the broadcast of `(axis, step)`.
    IssueBroadcast {
        axis: BroadcastAxis,
        step: usize,
        class: ParityClass,
    },
    /// Dispatch the update of `step` on `node`.
    StartCompute {
        node: NodeId,
        step: usize,
        inputs: InputSelect,
    },
    /// Dispatch the bias epilogue on `node`.
    StartEpilogue { node: NodeId },
    /// Every node finished every step (and epilogue, when one runs).
    RunComplete,
}

/// Progress of one `(node, step)` cell, derived from the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    /// Operand tiles not yet requested or only partially staged.
    WaitingInput,
    /// A broadcast covering the step has been issued and not yet landed.
    TransferInFlight,
    /// Both operand tiles installed, update not yet dispatched.
    ComputeReady,
    /// Update running on the node.
    Computing,
    /// Update finished, accumulator carries the step's contribution.
    StepDone,
}
