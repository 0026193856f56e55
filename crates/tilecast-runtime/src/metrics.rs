//! Modeled-cycle accounting.
//!
//! The runtime does not report wall time. Every transfer and kernel is
//! charged its analytic cost in fabric cycles, and the ledger replays the
//! run's real event order through the cost recurrences. The totals are
//! therefore deterministic for a given schedule, directly comparable to
//! [`CostModel::predict_run`](crate::predict::CostModel::predict_run), and
//! usable as regression samples for refitting the model.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::channel::ChannelId;
use crate::grid::{GridDescriptor, MatrixId, NodeId};
use crate::predict::CostModel;
use crate::scheduler::{BroadcastAxis, EntryPoint};

/// Traffic kind of a modeled transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Host streaming into resident tiles.
    HostToGrid,
    /// Output drain back to the host.
    GridToHost,
    /// Row or column broadcast inside the grid.
    Broadcast,
}

impl core::fmt::Display for Direction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Direction::HostToGrid => "h2d",
            Direction::GridToHost => "d2h",
            Direction::Broadcast => "bcast",
        };
        f.write_str(name)
    }
}

/// One modeled transfer: a regression sample relating size and distance to
/// cycles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransferSample {
    pub direction: Direction,
    /// Words moved along the lane.
    pub words: f64,
    /// Hop count of the lane.
    pub span: f64,
    pub cycles: f64,
}

/// Cycle walls of the three run phases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseCycles {
    /// Host streams landing, overlapped across matrices.
    pub transfer_in: u64,
    /// First issue to last retirement, epilogue included.
    pub steps_total: u64,
    /// Output drain. Zero until the first read back of C.
    pub transfer_out: u64,
}

impl PhaseCycles {
    pub fn total(&self) -> u64 {
        self.transfer_in + self.steps_total + self.transfer_out
    }
}

/// Traffic carried by one broadcast channel over a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelUsage {
    pub channel: ChannelId,
    /// Words summed over the channel's lanes.
    pub words: u64,
    /// Cycles any lane of the channel was carrying a broadcast.
    pub busy_cycles: u64,
    /// `busy_cycles` over the step-phase wall.
    pub utilization: f64,
}

/// The pipelined step phase against the same schedule run one step at a
/// time, every broadcast strictly before its compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineComparison {
    pub pipelined_cycles: u64,
    pub sequential_cycles: u64,
}

impl PipelineComparison {
    /// Cycles the overlap saved. Small grids can go negative, the fill of
    /// the pipeline is not free.
    pub fn savings(&self) -> i64 {
        self.sequential_cycles as i64 - self.pipelined_cycles as i64
    }

    pub fn speedup(&self) -> f64 {
        self.sequential_cycles as f64 / self.pipelined_cycles as f64
    }
}

/// Everything a finished run reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetrics {
    pub descriptor: GridDescriptor,
    pub entry: EntryPoint,
    /// Sum of the three phase walls.
    pub total_cycles: u64,
    pub phases: PhaseCycles,
    /// Ingest cost per streamed matrix.
    pub ingest_cycles: Vec<(MatrixId, u64)>,
    pub channels: Vec<ChannelUsage>,
    /// Fused multiply-add groups issued grid-wide.
    pub fma_groups: u64,
    /// The same, per node in row-major order.
    pub fma_groups_per_node: Vec<u64>,
    pub pipeline: PipelineComparison,
    /// Every modeled transfer of the run, fit input for the predictor.
    pub samples: Vec<TransferSample>,
}

impl RunMetrics {
    /// Folds the output drain into a finished account. Only the first
    /// drain counts, re-reading C moves no new data.
    pub(crate) fn record_drain(&mut self, model: &CostModel) {
        if self.phases.transfer_out != 0 {
            return;
        }
        let words = self.descriptor.streamed_words(MatrixId::C) as f64;
        let span = self.descriptor.grid.perimeter() as f64;
        let cycles = model.transfer_cycles(Direction::GridToHost, words, span);
        self.phases.transfer_out = cycles.round() as u64;
        self.total_cycles = self.phases.total();
        self.samples.push(TransferSample {
            direction: Direction::GridToHost,
            words,
            span,
            cycles,
        });
    }
}

/// Replays a run's completion order through the cost recurrences.
///
/// A broadcast starts when its lane is free and its issue gate has passed;
/// an update starts when both operand broadcasts have landed and the
/// node's previous update retired. Lanes of one channel are independent:
/// each grid row (or column) has its own physical links, the channel only
/// names the parity pair.
pub struct CycleLedger {
    model: CostModel,
    desc: GridDescriptor,
    parity: usize,
    channels: Vec<ChannelId>,
    lane_free: HashMap<(ChannelId, usize), f64>,
    channel_words: HashMap<ChannelId, u64>,
    channel_busy: HashMap<ChannelId, f64>,
    a_ends: HashMap<(usize, usize), f64>,
    b_ends: HashMap<(usize, usize), f64>,
    comp_ends: Vec<Vec<f64>>,
    epilogue_ends: Vec<f64>,
    fma_node: Vec<u64>,
    samples: Vec<TransferSample>,
}

impl CycleLedger {
    pub fn new(
        model: CostModel,
        desc: GridDescriptor,
        parity: usize,
        channels: Vec<ChannelId>,
    ) -> Self {
        let nodes = desc.grid.node_count();
        Self {
            model,
            desc,
            parity,
            channels,
            lane_free: HashMap::new(),
            channel_words: HashMap::new(),
            channel_busy: HashMap::new(),
            a_ends: HashMap::new(),
            b_ends: HashMap::new(),
            comp_ends: vec![Vec::new(); nodes],
            epilogue_ends: vec![0.0; nodes],
            fma_node: vec![0; nodes],
            samples: Vec::new(),
        }
    }

    /// Model time at which the broadcast of `(axis, step)` may start: the
    /// retirement of the update that freed its staging buffers. The first
    /// `k` steps start unconditionally.
    fn issue_ready(&self, axis: BroadcastAxis, step: usize) -> f64 {
        if step < self.parity {
            return 0.0;
        }
        let gate_step = step - self.parity;
        axis.dest_nodes(self.desc.grid)
            .into_iter()
            .map(|node| {
                let ends = &self.comp_ends[node.flat(self.desc.grid)];
                ends.get(gate_step).copied().unwrap_or(0.0)
            })
            .fold(0.0, f64::max)
    }

    /// Accounts one landed broadcast, returning its modeled duration.
    pub fn broadcast_done(
        &mut self,
        axis: BroadcastAxis,
        step: usize,
        channel: ChannelId,
        words: u64,
    ) -> f64 {
        let span = axis.span(self.desc.grid) as f64;
        let duration = self
            .model
            .transfer_cycles(Direction::Broadcast, words as f64, span);
        let lane = (channel, axis.lane());
        let free = self.lane_free.get(&lane).copied().unwrap_or(0.0);
        let start = self.issue_ready(axis, step).max(free);
        let end = start + duration;
        self.lane_free.insert(lane, end);
        *self.channel_words.entry(channel).or_insert(0) += words;
        *self.channel_busy.entry(channel).or_insert(0.0) += duration;
        match axis {
            BroadcastAxis::ARow(row) => self.a_ends.insert((row, step), end),
            BroadcastAxis::BCol(col) => self.b_ends.insert((col, step), end),
        };
        self.samples.push(TransferSample {
            direction: Direction::Broadcast,
            words: words as f64,
            span,
            cycles: duration,
        });
        duration
    }

    /// Accounts one retired update, returning its modeled duration.
    pub fn compute_done(&mut self, node: NodeId, step: usize, fma_groups: u64) -> f64 {
        let n = node.flat(self.desc.grid);
        let operands_in = if self.desc.grid.node_count() == 1 {
            0.0
        } else {
            let a = self.a_ends[&(node.row, step)];
            let b = self.b_ends[&(node.col, step)];
            a.max(b)
        };
        let prev = self.comp_ends[n].last().copied().unwrap_or(0.0);
        let duration = self.model.compute_step_cycles(self.desc.tile);
        let end = operands_in.max(prev) + duration;
        self.comp_ends[n].push(end);
        self.fma_node[n] += fma_groups;
        duration
    }

    /// Accounts one bias epilogue.
    pub fn epilogue_done(&mut self, node: NodeId) -> f64 {
        let n = node.flat(self.desc.grid);
        let prev = self.comp_ends[n].last().copied().unwrap_or(0.0);
        let duration = self.model.epilogue_cycles(self.desc.tile);
        self.epilogue_ends[n] = prev + duration;
        duration
    }

    /// Closes the account of a completed run.
    pub fn finish(
        &self,
        entry: EntryPoint,
        ingest_cycles: &[(MatrixId, u64)],
        ingest_samples: &[TransferSample],
    ) -> RunMetrics {
        let grid = self.desc.grid;
        let steps_wall = (0..grid.node_count())
            .map(|n| {
                let computed = self.comp_ends[n].last().copied().unwrap_or(0.0);
                computed.max(self.epilogue_ends[n])
            })
            .fold(0.0, f64::max);
        let steps_total = steps_wall.round() as u64;

        // Streams land concurrently, the phase wall is the slowest one.
        let transfer_in = ingest_cycles
            .iter()
            .map(|&(_, cycles)| cycles)
            .max()
            .unwrap_or(0);

        let phases = PhaseCycles {
            transfer_in,
            steps_total,
            transfer_out: 0,
        };

        let channels = self
            .channels
            .iter()
            .map(|&channel| {
                let busy = self.channel_busy.get(&channel).copied().unwrap_or(0.0);
                ChannelUsage {
                    channel,
                    words: self.channel_words.get(&channel).copied().unwrap_or(0),
                    busy_cycles: busy.round() as u64,
                    utilization: if steps_wall > 0.0 { busy / steps_wall } else { 0.0 },
                }
            })
            .collect();

        let mut samples = ingest_samples.to_vec();
        samples.extend_from_slice(&self.samples);

        RunMetrics {
            descriptor: self.desc,
            entry,
            total_cycles: phases.total(),
            phases,
            ingest_cycles: ingest_cycles.to_vec(),
            channels,
            fma_groups: self.fma_node.iter().sum(),
            fma_groups_per_node: self.fma_node.clone(),
            pipeline: self
                .model
                .sequential_comparison(&self.desc, entry, steps_total),
            samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelBook;
    use crate::config::CostConfig;
    use crate::grid::GridDescriptor;

    fn ledger(desc: GridDescriptor) -> CycleLedger {
        let book = ChannelBook::allocate(desc.channel_count, 2, 24).unwrap();
        CycleLedger::new(
            CostModel::from_config(&CostConfig::default()),
            desc,
            2,
            book.channel_ids().collect(),
        )
    }

    #[test]
    fn first_update_starts_after_the_slower_operand() {
        let desc = GridDescriptor::square(2, 4, 4, 4);
        let mut ledger = ledger(desc);
        let model = CostModel::from_config(&CostConfig::default());
        let book = ChannelBook::allocate(4, 2, 24).unwrap();

        let a_dur = ledger.broadcast_done(
            BroadcastAxis::ARow(0),
            0,
            book.pair_for(0).row,
            desc.tile.a_elems() as u64,
        );
        let b_dur = ledger.broadcast_done(
            BroadcastAxis::BCol(0),
            0,
            book.pair_for(0).col,
            desc.tile.b_elems() as u64,
        );
        assert_eq!(
            a_dur,
            model.transfer_cycles(Direction::Broadcast, 16.0, 2.0)
        );

        ledger.compute_done(NodeId::new(0, 0), 0, 16);
        let metrics = ledger.finish(EntryPoint::Main, &[], &[]);
        // steps wall = slower broadcast + one kernel, nothing else ran.
        let expected = a_dur.max(b_dur) + model.compute_step_cycles(desc.tile);
        assert_eq!(metrics.phases.steps_total, expected.round() as u64);
        assert_eq!(metrics.fma_groups, 16);
    }

    #[test]
    fn one_lane_serializes_same_class_broadcasts() {
        let desc = GridDescriptor::square(2, 4, 4, 4);
        let mut ledger = ledger(desc);
        let ch = ChannelBook::allocate(4, 2, 24).unwrap().pair_for(0).row;

        // Same lane, same channel: the second starts where the first ends,
        // regardless of its own issue gate.
        let d0 = ledger.broadcast_done(BroadcastAxis::ARow(1), 0, ch, 16);
        ledger.broadcast_done(BroadcastAxis::ARow(1), 2, ch, 16);
        let end = ledger.a_ends[&(1usize, 2usize)];
        assert_eq!(end, d0 * 2.0);

        // A different lane of the same channel does not contend.
        ledger.broadcast_done(BroadcastAxis::ARow(0), 0, ch, 16);
        assert_eq!(ledger.a_ends[&(0usize, 0usize)], d0);
    }

    #[test]
    fn issue_gate_delays_the_next_class_reuse() {
        let desc = GridDescriptor::square(2, 2, 2, 2);
        let mut ledger = ledger(desc);
        let book = ChannelBook::allocate(4, 2, 24).unwrap();

        // Land steps 0 and 1 and retire them on both nodes of row 0.
        for step in 0..2 {
            ledger.broadcast_done(BroadcastAxis::ARow(0), step, book.pair_for(step).row, 4);
            ledger.broadcast_done(BroadcastAxis::BCol(0), step, book.pair_for(step).col, 4);
            ledger.broadcast_done(BroadcastAxis::BCol(1), step, book.pair_for(step).col, 4);
        }
        for step in 0..2 {
            ledger.compute_done(NodeId::new(0, 0), step, 4);
            ledger.compute_done(NodeId::new(0, 1), step, 4);
        }

        // Step 2 reuses class 0; its gate is the slower step-0 retirement.
        let gate = ledger.comp_ends[0][0].max(ledger.comp_ends[1][0]);
        let d = ledger.broadcast_done(BroadcastAxis::ARow(0), 2, book.pair_for(2).row, 4);
        assert_eq!(ledger.a_ends[&(0usize, 2usize)], gate + d);
    }

    #[test]
    fn drain_is_recorded_once() {
        let desc = GridDescriptor::square(1, 2, 2, 2);
        let mut ledger = ledger(desc);
        ledger.compute_done(NodeId::new(0, 0), 0, 4);
        let mut metrics = ledger.finish(EntryPoint::Main, &[], &[]);
        assert_eq!(metrics.phases.transfer_out, 0);

        let model = CostModel::from_config(&CostConfig::default());
        metrics.record_drain(&model);
        let first = metrics.phases.transfer_out;
        assert!(first > 0);
        assert_eq!(metrics.total_cycles, metrics.phases.total());

        metrics.record_drain(&model);
        assert_eq!(metrics.phases.transfer_out, first);
        assert_eq!(
            metrics
                .samples
                .iter()
                .filter(|s| s.direction == Direction::GridToHost)
                .count(),
            1
        );
    }
}
