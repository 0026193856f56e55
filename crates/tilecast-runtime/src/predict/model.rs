use serde::{Deserialize, Serialize};

use crate::config::{ComputeCostConfig, CostConfig, TransferCostConfig};
use crate::grid::{GridDescriptor, MatrixId, TileDims};
use crate::metrics::{Direction, PhaseCycles, PipelineComparison};
use crate::scheduler::EntryPoint;

/// Analytic cost surfaces of the fabric and the node kernels.
///
/// Transfers are affine in payload and distance,
/// `cycles = alpha * words + beta * span + gamma`. The same surfaces drive
/// the live metrics ledger and the offline predictor, so a measured run
/// and its prediction agree exactly whenever the coefficients do.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    pub h2d: TransferCostConfig,
    pub d2h: TransferCostConfig,
    pub bcast: TransferCostConfig,
    pub compute: ComputeCostConfig,
}

impl CostModel {
    pub fn from_config(cost: &CostConfig) -> Self {
        Self {
            h2d: cost.h2d,
            d2h: cost.d2h,
            bcast: cost.bcast,
            compute: cost.compute,
        }
    }

    pub fn coeffs(&self, direction: Direction) -> &TransferCostConfig {
        match direction {
            Direction::HostToGrid => &self.h2d,
            Direction::GridToHost => &self.d2h,
            Direction::Broadcast => &self.bcast,
        }
    }

    pub fn coeffs_mut(&mut self, direction: Direction) -> &mut TransferCostConfig {
        match direction {
            Direction::HostToGrid => &mut self.h2d,
            Direction::GridToHost => &mut self.d2h,
            Direction::Broadcast => &mut self.bcast,
        }
    }

    /// Modeled cycles of one transfer.
    pub fn transfer_cycles(&self, direction: Direction, words: f64, span: f64) -> f64 {
        let c = self.coeffs(direction);
        c.alpha * words + c.beta * span + c.gamma
    }

    /// Modeled cycles of one step update on one node: `kt * nt` FMA groups
    /// of `mt` lanes each, behind a fixed issue ramp.
    pub fn compute_step_cycles(&self, tile: TileDims) -> f64 {
        let groups = (tile.kt * tile.nt) as f64;
        self.compute.setup + groups * (1.0 + tile.mt as f64) * self.compute.overhead_factor
    }

    /// Modeled cycles of the whole step phase run back to back.
    pub fn compute_cycles(&self, steps: usize, tile: TileDims) -> f64 {
        steps as f64 * self.compute_step_cycles(tile)
    }

    /// Modeled cycles of the bias epilogue, one vector add per output
    /// column.
    pub fn epilogue_cycles(&self, tile: TileDims) -> f64 {
        self.compute.setup
            + tile.nt as f64 * (1.0 + tile.mt as f64) * self.compute.overhead_factor
    }

    /// Predicts a run's phase walls without executing it.
    ///
    /// The step phase replays the recurrence the metrics ledger applies to
    /// real completions. Under uniform coefficients every lane and node
    /// behaves identically, so one representative chain suffices.
    pub fn predict_run(
        &self,
        desc: &GridDescriptor,
        entry: EntryPoint,
        parity_classes: usize,
    ) -> RunPrediction {
        let grid = desc.grid;
        let steps = grid.steps();
        let g = self.compute_step_cycles(desc.tile);

        let mut comp_end = vec![0.0f64; steps];
        if grid.node_count() == 1 {
            comp_end[0] = g;
        } else {
            let b_a = self.transfer_cycles(
                Direction::Broadcast,
                desc.tile.a_elems() as f64,
                grid.cols as f64,
            );
            let b_b = self.transfer_cycles(
                Direction::Broadcast,
                desc.tile.b_elems() as f64,
                grid.rows as f64,
            );
            let mut a_lane_free = vec![0.0f64; parity_classes];
            let mut b_lane_free = vec![0.0f64; parity_classes];
            for s in 0..steps {
                let class = s % parity_classes;
                let gate = if s < parity_classes {
                    0.0
                } else {
                    comp_end[s - parity_classes]
                };
                let a_end = gate.max(a_lane_free[class]) + b_a;
                let b_end = gate.max(b_lane_free[class]) + b_b;
                a_lane_free[class] = a_end;
                b_lane_free[class] = b_end;
                let prev = if s == 0 { 0.0 } else { comp_end[s - 1] };
                comp_end[s] = a_end.max(b_end).max(prev) + g;
            }
        }
        let mut steps_wall = comp_end[steps - 1];
        if entry.needs_bias() {
            steps_wall += self.epilogue_cycles(desc.tile);
        }

        let perimeter = grid.perimeter() as f64;
        let transfer_in = [MatrixId::A, MatrixId::B]
            .into_iter()
            .chain(entry.needs_bias().then_some(MatrixId::Bias))
            .map(|matrix| {
                self.transfer_cycles(
                    Direction::HostToGrid,
                    desc.streamed_words(matrix) as f64,
                    perimeter,
                )
            })
            .fold(0.0, f64::max);
        let transfer_out = self.transfer_cycles(
            Direction::GridToHost,
            desc.streamed_words(MatrixId::C) as f64,
            perimeter,
        );

        let phases = PhaseCycles {
            transfer_in: transfer_in.round() as u64,
            steps_total: steps_wall.round() as u64,
            transfer_out: transfer_out.round() as u64,
        };
        RunPrediction {
            total_cycles: phases.total(),
            phases,
            pipeline: self.sequential_comparison(desc, entry, phases.steps_total),
        }
    }

    /// The same schedule with every broadcast strictly before its update,
    /// the baseline the pipeline is measured against.
    pub fn sequential_comparison(
        &self,
        desc: &GridDescriptor,
        entry: EntryPoint,
        pipelined_steps_total: u64,
    ) -> PipelineComparison {
        let grid = desc.grid;
        let g = self.compute_step_cycles(desc.tile);
        let b = if grid.node_count() == 1 {
            0.0
        } else {
            let b_a = self.transfer_cycles(
                Direction::Broadcast,
                desc.tile.a_elems() as f64,
                grid.cols as f64,
            );
            let b_b = self.transfer_cycles(
                Direction::Broadcast,
                desc.tile.b_elems() as f64,
                grid.rows as f64,
            );
            b_a.max(b_b)
        };
        let mut wall = grid.steps() as f64 * (b + g);
        if entry.needs_bias() {
            wall += self.epilogue_cycles(desc.tile);
        }
        PipelineComparison {
            pipelined_cycles: pipelined_steps_total,
            sequential_cycles: wall.round() as u64,
        }
    }
}

/// Phase walls of a predicted run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunPrediction {
    pub total_cycles: u64,
    pub phases: PhaseCycles,
    pub pipeline: PipelineComparison,
}
