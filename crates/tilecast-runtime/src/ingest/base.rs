use crate::error::ConfigurationError;
use crate::grid::{GridDescriptor, MatrixId};

#[derive(Debug, Default, Clone, Copy)]
struct StreamState {
    registered: bool,
    ready_nodes: usize,
    complete: bool,
}

/// Stream bookkeeping for one grid: which input matrices were registered,
/// and how far each has landed.
///
/// Registration is validated eagerly, before any element moves, so a
/// rejected stream leaves the grid untouched. Chunks may then arrive
/// interleaved across matrices; per-node progress lives in the node
/// stores, the ledger only counts sealed tiles.
#[derive(Debug)]
pub struct IngestLedger {
    desc: GridDescriptor,
    a: StreamState,
    b: StreamState,
    bias: StreamState,
}

impl IngestLedger {
    pub fn new(desc: GridDescriptor) -> Self {
        Self {
            desc,
            a: StreamState::default(),
            b: StreamState::default(),
            bias: StreamState::default(),
        }
    }

    fn state(&self, matrix: MatrixId) -> Option<&StreamState> {
        match matrix {
            MatrixId::A => Some(&self.a),
            MatrixId::B => Some(&self.b),
            MatrixId::Bias => Some(&self.bias),
            MatrixId::C => None,
        }
    }

    /// Opens a stream, checking the matrix and its host length.
    pub fn register(
        &mut self,
        matrix: MatrixId,
        provided: usize,
    ) -> Result<(), ConfigurationError> {
        if !matrix.is_input() {
            return Err(ConfigurationError::NotAnInput { matrix });
        }
        let expected = self.desc.input_len(matrix);
        if provided != expected {
            return Err(ConfigurationError::DimensionMismatch {
                matrix,
                expected,
                actual: provided,
            });
        }
        let state = match matrix {
            MatrixId::A => &mut self.a,
            MatrixId::B => &mut self.b,
            MatrixId::Bias => &mut self.bias,
            MatrixId::C => unreachable!(),
        };
        if state.registered {
            return Err(ConfigurationError::StreamAlreadyActive { matrix });
        }
        state.registered = true;
        Ok(())
    }

    /// Counts one sealed node tile. Returns `true` when this was the last
    /// node, completing the matrix.
    pub fn note_node_ready(&mut self, matrix: MatrixId) -> bool {
        let nodes = self.desc.grid.node_count();
        let state = match matrix {
            MatrixId::A => &mut self.a,
            MatrixId::B => &mut self.b,
            MatrixId::Bias => &mut self.bias,
            MatrixId::C => panic!("the output matrix is not streamed in"),
        };
        debug_assert!(state.registered);
        state.ready_nodes += 1;
        debug_assert!(state.ready_nodes <= nodes);
        if state.ready_nodes == nodes {
            state.complete = true;
            true
        } else {
            false
        }
    }

    pub fn is_registered(&self, matrix: MatrixId) -> bool {
        self.state(matrix).is_some_and(|s| s.registered)
    }

    pub fn is_complete(&self, matrix: MatrixId) -> bool {
        self.state(matrix).is_some_and(|s| s.complete)
    }

    /// Whether every registered stream has fully landed.
    pub fn all_landed(&self) -> bool {
        [&self.a, &self.b, &self.bias]
            .into_iter()
            .all(|s| !s.registered || s.complete)
    }
}
