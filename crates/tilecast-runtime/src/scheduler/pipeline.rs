use crate::channel::ParityClass;
use crate::grid::{GridDim, MatrixId, NodeId};

use super::{
    BroadcastAxis, EntryPoint, InputSelect, SchedulerAction, SchedulerEvent, StepPhase,
};

/// Sans-IO driver of the broadcast/compute pipeline.
///
/// The driver holds nothing but progress counters: which steps each lane
/// has issued, which staged tiles each node holds, how many updates each
/// node has retired. It consumes completion events and returns the actions
/// those completions unlock, scanning lanes and nodes in a fixed order so
/// the action stream of a given event sequence is deterministic. All tile
/// movement, waiting and I/O stays with the caller.
///
/// Issue gating keeps one broadcast per `(lane, class)` outstanding: the
/// broadcast of step `t` goes out only once every destination node has
/// retired step `t - k` (`k` parity classes), which is exactly when the
/// staging buffer of class `t mod k` is free again on all of them. The
/// first `k` steps have no predecessor in their class and issue at launch,
/// which is what fills the pipeline.
pub struct PipelineScheduler {
    grid: GridDim,
    parity: usize,
    entry: Option<EntryPoint>,
    finished: bool,
    a_home: Vec<bool>,
    b_home: Vec<bool>,
    bias_home: Vec<bool>,
    a_issued: Vec<usize>,
    b_issued: Vec<usize>,
    a_staged: Vec<Option<usize>>,
    b_staged: Vec<Option<usize>>,
    completed: Vec<usize>,
    computing: Vec<bool>,
    epilogue_running: Vec<bool>,
    epilogue_done: Vec<bool>,
}

impl PipelineScheduler {
    pub fn new(grid: GridDim, parity_classes: usize) -> Self {
        let nodes = grid.node_count();
        Self {
            grid,
            parity: parity_classes,
            entry: None,
            finished: false,
            a_home: vec![false; nodes],
            b_home: vec![false; nodes],
            bias_home: vec![false; nodes],
            a_issued: vec![0; grid.rows],
            b_issued: vec![0; grid.cols],
            a_staged: vec![None; nodes * parity_classes],
            b_staged: vec![None; nodes * parity_classes],
            completed: vec![0; nodes],
            computing: vec![false; nodes],
            epilogue_running: vec![false; nodes],
            epilogue_done: vec![false; nodes],
        }
    }

    /// Clears all run progress. Resident-tile readiness survives, so a
    /// relaunch reuses the streamed inputs.
    pub fn reset(&mut self) {
        self.entry = None;
        self.finished = false;
        self.a_issued.fill(0);
        self.b_issued.fill(0);
        self.a_staged.fill(None);
        self.b_staged.fill(None);
        self.completed.fill(0);
        self.computing.fill(false);
        self.epilogue_running.fill(false);
        self.epilogue_done.fill(false);
    }

    pub fn entry(&self) -> Option<EntryPoint> {
        self.entry
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Applies one completion event and returns the actions it unlocked.
    pub fn on(&mut self, event: SchedulerEvent) -> Vec<SchedulerAction> {
        match event {
            SchedulerEvent::Launched { entry } => {
                self.entry = Some(entry);
            }
            SchedulerEvent::HomeReady { matrix, node } => {
                let n = node.flat(self.grid);
                match matrix {
                    MatrixId::A => self.a_home[n] = true,
                    MatrixId::B => self.b_home[n] = true,
                    MatrixId::Bias => self.bias_home[n] = true,
                    MatrixId::C => {}
                }
            }
            SchedulerEvent::BroadcastDone { axis, step } => {
                let class = step % self.parity;
                for node in axis.dest_nodes(self.grid) {
                    let idx = node.flat(self.grid) * self.parity + class;
                    let staged = match axis {
                        BroadcastAxis::ARow(_) => &mut self.a_staged[idx],
                        BroadcastAxis::BCol(_) => &mut self.b_staged[idx],
                    };
                    debug_assert!(staged.is_none(), "staging slot overwritten");
                    *staged = Some(step);
                }
            }
            SchedulerEvent::ComputeDone { node, step } => {
                let n = node.flat(self.grid);
                debug_assert!(self.computing[n]);
                debug_assert_eq!(self.completed[n], step);
                self.computing[n] = false;
                self.completed[n] = step + 1;
            }
            SchedulerEvent::EpilogueDone { node } => {
                let n = node.flat(self.grid);
                self.epilogue_running[n] = false;
                self.epilogue_done[n] = true;
            }
        }
        self.advance()
    }

    /// Progress of one `(node, step)` cell.
    pub fn step_phase(&self, node: NodeId, step: usize) -> StepPhase {
        let n = node.flat(self.grid);
        if self.completed[n] > step {
            return StepPhase::StepDone;
        }
        if self.computing[n] && self.completed[n] == step {
            return StepPhase::Computing;
        }
        if self.grid.node_count() == 1 {
            return if self.a_home[n] && self.b_home[n] {
                StepPhase::ComputeReady
            } else {
                StepPhase::WaitingInput
            };
        }
        let idx = n * self.parity + step % self.parity;
        if self.a_staged[idx] == Some(step) && self.b_staged[idx] == Some(step) {
            return StepPhase::ComputeReady;
        }
        if self.a_issued[node.row] > step || self.b_issued[node.col] > step {
            return StepPhase::TransferInFlight;
        }
        StepPhase::WaitingInput
    }

    fn advance(&mut self) -> Vec<SchedulerAction> {
        let mut actions = Vec::new();
        let Some(entry) = self.entry else {
            return actions;
        };
        if self.finished {
            return actions;
        }
        let steps = self.grid.steps();
        let single = self.grid.node_count() == 1;

        if !single {
            for row in 0..self.grid.rows {
                while self.can_issue(BroadcastAxis::ARow(row)) {
                    let step = self.a_issued[row];
                    self.a_issued[row] = step + 1;
                    actions.push(SchedulerAction::IssueBroadcast {
                        axis: BroadcastAxis::ARow(row),
                        step,
                        class: ParityClass::of_step(step, self.parity),
                    });
                }
            }
            for col in 0..self.grid.cols {
                while self.can_issue(BroadcastAxis::BCol(col)) {
                    let step = self.b_issued[col];
                    self.b_issued[col] = step + 1;
                    actions.push(SchedulerAction::IssueBroadcast {
                        axis: BroadcastAxis::BCol(col),
                        step,
                        class: ParityClass::of_step(step, self.parity),
                    });
                }
            }
        }

        for node in self.grid.nodes() {
            let n = node.flat(self.grid);
            if self.computing[n] || self.completed[n] >= steps {
                continue;
            }
            let step = self.completed[n];
            let inputs = if single {
                (self.a_home[n] && self.b_home[n]).then_some(InputSelect::Resident)
            } else {
                let idx = n * self.parity + step % self.parity;
                if self.a_staged[idx] == Some(step) && self.b_staged[idx] == Some(step) {
                    self.a_staged[idx] = None;
                    self.b_staged[idx] = None;
                    Some(InputSelect::Staged(ParityClass::of_step(step, self.parity)))
                } else {
                    None
                }
            };
            if let Some(inputs) = inputs {
                self.computing[n] = true;
                actions.push(SchedulerAction::StartCompute { node, step, inputs });
            }
        }

        if entry.needs_bias() {
            for node in self.grid.nodes() {
                let n = node.flat(self.grid);
                if self.completed[n] == steps
                    && self.bias_home[n]
                    && !self.epilogue_running[n]
                    && !self.epilogue_done[n]
                {
                    self.epilogue_running[n] = true;
                    actions.push(SchedulerAction::StartEpilogue { node });
                }
            }
        }

        if self.run_done(entry) {
            self.finished = true;
            actions.push(SchedulerAction::RunComplete);
        }
        actions
    }

    fn can_issue(&self, axis: BroadcastAxis) -> bool {
        let step = match axis {
            BroadcastAxis::ARow(row) => self.a_issued[row],
            BroadcastAxis::BCol(col) => self.b_issued[col],
        };
        if step >= self.grid.steps() {
            return false;
        }
        let src = axis.source(step).flat(self.grid);
        let src_ready = match axis {
            BroadcastAxis::ARow(_) => self.a_home[src],
            BroadcastAxis::BCol(_) => self.b_home[src],
        };
        if !src_ready {
            return false;
        }
        if step < self.parity {
            return true;
        }
        // The class' staging buffer is free on a node once the compute
        // that consumed its previous payload retired.
        let gate = step + 1 - self.parity;
        axis.dest_nodes(self.grid)
            .into_iter()
            .all(|node| self.completed[node.flat(self.grid)] >= gate)
    }

    fn run_done(&self, entry: EntryPoint) -> bool {
        let steps = self.grid.steps();
        let all_computed = self.completed.iter().all(|&done| done == steps);
        if !all_computed {
            return false;
        }
        !entry.needs_bias() || self.epilogue_done.iter().all(|&done| done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_homes(driver: &mut PipelineScheduler, grid: GridDim, matrix: MatrixId) {
        for node in grid.nodes() {
            let actions = driver.on(SchedulerEvent::HomeReady { matrix, node });
            assert!(actions.is_empty(), "no actions before launch");
        }
    }

    fn issues_of(actions: &[SchedulerAction]) -> Vec<(BroadcastAxis, usize)> {
        actions
            .iter()
            .filter_map(|action| match action {
                SchedulerAction::IssueBroadcast { axis, step, .. } => Some((*axis, *step)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn launch_preloads_one_step_per_parity_class() {
        let grid = GridDim::new(3, 3);
        let mut driver = PipelineScheduler::new(grid, 2);
        feed_homes(&mut driver, grid, MatrixId::A);
        feed_homes(&mut driver, grid, MatrixId::B);

        let actions = driver.on(SchedulerEvent::Launched {
            entry: EntryPoint::Main,
        });
        let issues = issues_of(&actions);
        // Steps 0 and 1 on every lane, step 2 gated behind retirements.
        assert_eq!(issues.len(), 12);
        assert!(issues.iter().all(|&(_, step)| step < 2));
        for row in 0..3 {
            assert!(issues.contains(&(BroadcastAxis::ARow(row), 0)));
            assert!(issues.contains(&(BroadcastAxis::ARow(row), 1)));
        }
        for col in 0..3 {
            assert!(issues.contains(&(BroadcastAxis::BCol(col), 0)));
            assert!(issues.contains(&(BroadcastAxis::BCol(col), 1)));
        }
    }

    #[test]
    fn compute_starts_when_both_operands_staged() {
        let grid = GridDim::new(3, 3);
        let mut driver = PipelineScheduler::new(grid, 2);
        feed_homes(&mut driver, grid, MatrixId::A);
        feed_homes(&mut driver, grid, MatrixId::B);
        driver.on(SchedulerEvent::Launched {
            entry: EntryPoint::Main,
        });

        let actions = driver.on(SchedulerEvent::BroadcastDone {
            axis: BroadcastAxis::ARow(0),
            step: 0,
        });
        assert!(actions.is_empty(), "A alone does not start an update");
        assert_eq!(
            driver.step_phase(NodeId::new(0, 0), 0),
            StepPhase::TransferInFlight
        );

        let actions = driver.on(SchedulerEvent::BroadcastDone {
            axis: BroadcastAxis::BCol(0),
            step: 0,
        });
        assert_eq!(
            actions,
            vec![SchedulerAction::StartCompute {
                node: NodeId::new(0, 0),
                step: 0,
                inputs: InputSelect::Staged(ParityClass::new(0)),
            }]
        );
        assert_eq!(driver.step_phase(NodeId::new(0, 0), 0), StepPhase::Computing);
    }

    #[test]
    fn next_class_stages_while_a_node_computes() {
        let grid = GridDim::new(3, 3);
        let mut driver = PipelineScheduler::new(grid, 2);
        feed_homes(&mut driver, grid, MatrixId::A);
        feed_homes(&mut driver, grid, MatrixId::B);
        driver.on(SchedulerEvent::Launched {
            entry: EntryPoint::Main,
        });
        driver.on(SchedulerEvent::BroadcastDone {
            axis: BroadcastAxis::ARow(0),
            step: 0,
        });
        driver.on(SchedulerEvent::BroadcastDone {
            axis: BroadcastAxis::BCol(0),
            step: 0,
        });

        // Step 1 tiles land while (0, 0) is still computing step 0: the
        // node holds them staged but starts nothing.
        driver.on(SchedulerEvent::BroadcastDone {
            axis: BroadcastAxis::ARow(0),
            step: 1,
        });
        let actions = driver.on(SchedulerEvent::BroadcastDone {
            axis: BroadcastAxis::BCol(0),
            step: 1,
        });
        assert!(actions.is_empty(), "one update per node at a time");
        assert_eq!(
            driver.step_phase(NodeId::new(0, 0), 1),
            StepPhase::ComputeReady
        );

        let actions = driver.on(SchedulerEvent::ComputeDone {
            node: NodeId::new(0, 0),
            step: 0,
        });
        assert_eq!(
            actions,
            vec![SchedulerAction::StartCompute {
                node: NodeId::new(0, 0),
                step: 1,
                inputs: InputSelect::Staged(ParityClass::new(1)),
            }]
        );
    }

    #[test]
    fn third_step_issues_once_a_lane_retired_its_class_predecessor() {
        let grid = GridDim::new(3, 3);
        let mut driver = PipelineScheduler::new(grid, 2);
        feed_homes(&mut driver, grid, MatrixId::A);
        feed_homes(&mut driver, grid, MatrixId::B);
        driver.on(SchedulerEvent::Launched {
            entry: EntryPoint::Main,
        });

        // Land step 0 everywhere, then retire it on the nodes of row 0.
        for row in 0..3 {
            driver.on(SchedulerEvent::BroadcastDone {
                axis: BroadcastAxis::ARow(row),
                step: 0,
            });
        }
        for col in 0..3 {
            driver.on(SchedulerEvent::BroadcastDone {
                axis: BroadcastAxis::BCol(col),
                step: 0,
            });
        }
        let mut issued = Vec::new();
        for col in 0..3 {
            let node = NodeId::new(0, col);
            let actions = driver.on(SchedulerEvent::ComputeDone { node, step: 0 });
            issued.extend(issues_of(&actions));
        }
        // Row 0 retired step 0 on all of its nodes, so its class-0 buffer
        // is free and A step 2 goes out. No column has, so B step 2 waits.
        assert_eq!(issued, vec![(BroadcastAxis::ARow(0), 2)]);
    }

    #[test]
    fn single_node_runs_from_resident_tiles() {
        let grid = GridDim::new(1, 1);
        let mut driver = PipelineScheduler::new(grid, 2);
        let node = NodeId::new(0, 0);
        driver.on(SchedulerEvent::HomeReady {
            matrix: MatrixId::A,
            node,
        });
        driver.on(SchedulerEvent::HomeReady {
            matrix: MatrixId::B,
            node,
        });
        let actions = driver.on(SchedulerEvent::Launched {
            entry: EntryPoint::Main,
        });
        assert_eq!(
            actions,
            vec![SchedulerAction::StartCompute {
                node,
                step: 0,
                inputs: InputSelect::Resident,
            }]
        );
        let actions = driver.on(SchedulerEvent::ComputeDone { node, step: 0 });
        assert_eq!(actions, vec![SchedulerAction::RunComplete]);
        assert!(driver.is_finished());
    }

    #[test]
    fn epilogue_waits_for_the_bias_stream() {
        let grid = GridDim::new(1, 1);
        let mut driver = PipelineScheduler::new(grid, 2);
        let node = NodeId::new(0, 0);
        driver.on(SchedulerEvent::HomeReady {
            matrix: MatrixId::A,
            node,
        });
        driver.on(SchedulerEvent::HomeReady {
            matrix: MatrixId::B,
            node,
        });
        driver.on(SchedulerEvent::Launched {
            entry: EntryPoint::MainBias,
        });
        let actions = driver.on(SchedulerEvent::ComputeDone { node, step: 0 });
        assert!(actions.is_empty(), "bias still streaming");
        assert!(!driver.is_finished());

        let actions = driver.on(SchedulerEvent::HomeReady {
            matrix: MatrixId::Bias,
            node,
        });
        assert_eq!(actions, vec![SchedulerAction::StartEpilogue { node }]);
        let actions = driver.on(SchedulerEvent::EpilogueDone { node });
        assert_eq!(actions, vec![SchedulerAction::RunComplete]);
    }

    #[test]
    fn reset_keeps_resident_tiles_and_replays_the_run() {
        let grid = GridDim::new(1, 1);
        let mut driver = PipelineScheduler::new(grid, 2);
        let node = NodeId::new(0, 0);
        driver.on(SchedulerEvent::HomeReady {
            matrix: MatrixId::A,
            node,
        });
        driver.on(SchedulerEvent::HomeReady {
            matrix: MatrixId::B,
            node,
        });
        driver.on(SchedulerEvent::Launched {
            entry: EntryPoint::Main,
        });
        driver.on(SchedulerEvent::ComputeDone { node, step: 0 });
        assert!(driver.is_finished());

        driver.reset();
        assert!(!driver.is_finished());
        let actions = driver.on(SchedulerEvent::Launched {
            entry: EntryPoint::Main,
        });
        assert_eq!(
            actions,
            vec![SchedulerAction::StartCompute {
                node,
                step: 0,
                inputs: InputSelect::Resident,
            }]
        );
    }

    #[test]
    fn full_pipelined_run_retires_every_step() {
        // Drive a 2x2 grid to completion, completing whatever the driver
        // asks for, and check the bookkeeping never wedges.
        let grid = GridDim::new(2, 2);
        let mut driver = PipelineScheduler::new(grid, 2);
        feed_homes(&mut driver, grid, MatrixId::A);
        feed_homes(&mut driver, grid, MatrixId::B);

        let mut queue = driver.on(SchedulerEvent::Launched {
            entry: EntryPoint::Main,
        });
        let mut computed = 0;
        while let Some(action) = queue.pop() {
            let follow = match action {
                SchedulerAction::IssueBroadcast { axis, step, .. } => {
                    driver.on(SchedulerEvent::BroadcastDone { axis, step })
                }
                SchedulerAction::StartCompute { node, step, .. } => {
                    computed += 1;
                    driver.on(SchedulerEvent::ComputeDone { node, step })
                }
                SchedulerAction::StartEpilogue { .. } => unreachable!("main has no epilogue"),
                SchedulerAction::RunComplete => Vec::new(),
            };
            queue.extend(follow);
        }
        assert!(driver.is_finished());
        assert_eq!(computed, grid.node_count() * grid.steps());
        for node in grid.nodes() {
            for step in 0..grid.steps() {
                assert_eq!(driver.step_phase(node, step), StepPhase::StepDone);
            }
        }
    }
}
