use std::sync::Arc;

use crate::channel::ParityClass;
use crate::grid::{NodeId, TileDims};
use crate::tile::Tile;

/// Rank-`kt` update of one accumulator tile: `c += a * b`.
///
/// Accumulation order is fixed (rows outer, reduction middle, columns
/// inner), so repeated runs of the same schedule produce bit-identical
/// output. Returns the number of fused multiply-add groups the update
/// issued, one group of `mt` lanes per `(k, j)` pair.
pub fn gemm_step(c: &mut [f32], a: &[f32], b: &[f32], dims: TileDims) -> u64 {
    let TileDims { mt, kt, nt } = dims;
    debug_assert_eq!(a.len(), mt * kt);
    debug_assert_eq!(b.len(), kt * nt);
    debug_assert_eq!(c.len(), mt * nt);

    for i in 0..mt {
        let c_row = &mut c[i * nt..(i + 1) * nt];
        for k in 0..kt {
            let scale = a[i * kt + k];
            let b_row = &b[k * nt..(k + 1) * nt];
            for (acc, &rhs) in c_row.iter_mut().zip(b_row) {
                *acc += scale * rhs;
            }
        }
    }
    (kt * nt) as u64
}

/// Adds the node's bias column to every output column: `c[i][j] += bias[i]`.
pub fn add_bias(c: &mut [f32], bias: &[f32], dims: TileDims) {
    let TileDims { mt, nt, .. } = dims;
    debug_assert_eq!(bias.len(), mt);
    debug_assert_eq!(c.len(), mt * nt);

    for i in 0..mt {
        let v = bias[i];
        for acc in &mut c[i * nt..(i + 1) * nt] {
            *acc += v;
        }
    }
}

/// Operand tiles of one step update.
#[derive(Debug)]
pub enum StepInputs {
    /// Buffers staged through the fabric; the task owns them until the
    /// outcome hands them back to their receive slots.
    Staged { class: ParityClass, a: Tile, b: Tile },
    /// The node's own resident tiles, read shared. Single-node grids take
    /// this path and never touch the fabric.
    Resident { a: Arc<Tile>, b: Arc<Tile> },
}

impl StepInputs {
    fn slices(&self) -> (&[f32], &[f32]) {
        match self {
            Self::Staged { a, b, .. } => (a.as_slice(), b.as_slice()),
            Self::Resident { a, b } => (a.as_slice(), b.as_slice()),
        }
    }
}

/// One `c += a * b` update, shipped to the owning node's worker.
#[derive(Debug)]
pub struct ComputeTask {
    pub node: NodeId,
    pub step: usize,
    pub inputs: StepInputs,
    pub c: Tile,
    pub dims: TileDims,
}

impl ComputeTask {
    pub fn execute(mut self) -> ComputeOutcome {
        let (a, b) = self.inputs.slices();
        let fma_groups = gemm_step(self.c.as_mut_slice(), a, b, self.dims);
        ComputeOutcome {
            node: self.node,
            step: self.step,
            inputs: self.inputs,
            c: self.c,
            fma_groups,
        }
    }
}

/// Result of a step update, carrying every buffer back to the server.
#[derive(Debug)]
pub struct ComputeOutcome {
    pub node: NodeId,
    pub step: usize,
    pub inputs: StepInputs,
    pub c: Tile,
    pub fma_groups: u64,
}

/// Bias addition over a finished accumulator tile.
#[derive(Debug)]
pub struct EpilogueTask {
    pub node: NodeId,
    pub bias: Arc<Tile>,
    pub c: Tile,
    pub dims: TileDims,
}

impl EpilogueTask {
    pub fn execute(mut self) -> EpilogueOutcome {
        add_bias(self.c.as_mut_slice(), self.bias.as_slice(), self.dims);
        EpilogueOutcome {
            node: self.node,
            c: self.c,
        }
    }
}

#[derive(Debug)]
pub struct EpilogueOutcome {
    pub node: NodeId,
    pub c: Tile,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gemm_step_matches_hand_product() {
        // [1 2] [5 6]   [19 22]
        // [3 4] [7 8] = [43 50]
        let dims = TileDims::new(2, 2, 2);
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [5.0, 6.0, 7.0, 8.0];
        let mut c = [0.0; 4];
        let groups = gemm_step(&mut c, &a, &b, dims);
        assert_eq!(c, [19.0, 22.0, 43.0, 50.0]);
        assert_eq!(groups, 4);
    }

    #[test]
    fn two_partial_updates_accumulate() {
        // Splitting the reduction over two steps must land on the same
        // values as one full-width update.
        let dims = TileDims::new(2, 1, 2);
        let mut c = [0.5, 0.0, 0.0, -0.5];
        gemm_step(&mut c, &[2.0, 3.0], &[1.0, 4.0], dims);
        gemm_step(&mut c, &[-1.0, 0.5], &[2.0, 2.0], dims);
        assert_eq!(c, [0.5 + 2.0 - 2.0, 8.0 - 2.0, 3.0 + 1.0, -0.5 + 12.0 + 1.0]);
    }

    #[test]
    fn bias_adds_per_row() {
        let dims = TileDims::new(2, 1, 3);
        let mut c = [0.0, 1.0, 2.0, 10.0, 11.0, 12.0];
        add_bias(&mut c, &[100.0, -1.0], dims);
        assert_eq!(c, [100.0, 101.0, 102.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn task_round_trips_staged_buffers() {
        let dims = TileDims::new(1, 2, 1);
        let task = ComputeTask {
            node: NodeId::new(0, 0),
            step: 3,
            inputs: StepInputs::Staged {
                class: ParityClass::new(1),
                a: Tile::from_vec(1, 2, vec![1.0, 2.0]),
                b: Tile::from_vec(2, 1, vec![3.0, 4.0]),
            },
            c: Tile::zeroed(1, 1),
            dims,
        };
        let outcome = task.execute();
        assert_eq!(outcome.c.as_slice(), &[11.0]);
        assert_eq!(outcome.step, 3);
        assert_eq!(outcome.fma_groups, 2);
        match outcome.inputs {
            StepInputs::Staged { class, a, b } => {
                assert_eq!(class, ParityClass::new(1));
                assert_eq!(a.as_slice(), &[1.0, 2.0]);
                assert_eq!(b.as_slice(), &[3.0, 4.0]);
            }
            StepInputs::Resident { .. } => panic!("staged inputs expected"),
        }
    }

    #[test]
    fn epilogue_applies_shared_bias() {
        let dims = TileDims::new(2, 1, 2);
        let task = EpilogueTask {
            node: NodeId::new(1, 1),
            bias: Arc::new(Tile::from_vec(2, 1, vec![5.0, -5.0])),
            c: Tile::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0]),
            dims,
        };
        let outcome = task.execute();
        assert_eq!(outcome.c.as_slice(), &[6.0, 7.0, -2.0, -1.0]);
    }
}
