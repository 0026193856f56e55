//! The grid server: one thread owning every piece of run state.
//!
//! Clients, transfer workers and compute workers all talk to the same inbox.
//! Requests carry a callback channel for their response; completions carry
//! the buffers they borrowed. The server never blocks on work, it reacts to
//! messages and lets the scheduler decide what each completion unlocked.

use std::sync::Arc;
use std::time::{Duration, Instant};

use hashbrown::HashMap;

use crate::channel::{ChannelBook, ChannelId, ParityClass};
use crate::compute::{
    ComputeJob, ComputeOutcome, ComputeTask, EpilogueOutcome, EpilogueTask, StepInputs,
    spawn_compute_workers,
};
use crate::config::GlobalConfig;
use crate::error::{ConfigurationError, RunError};
use crate::grid::{GridDescriptor, MatrixId, NodeId};
use crate::id::{RunId, TransferId};
use crate::ingest::{IngestLedger, gather};
use crate::logging::RunLogger;
use crate::metrics::{CycleLedger, Direction, RunMetrics, TransferSample};
use crate::predict::{CostModel, RunPrediction};
use crate::scheduler::{
    BroadcastAxis, EntryPoint, InputSelect, PipelineScheduler, SchedulerAction, SchedulerEvent,
};
use crate::tile::{NodeStore, Tile};
use crate::transfer::{BroadcastCompletion, BroadcastOp, CompletionSink, TransferBackend};

pub(crate) type Callback<Response> = async_channel::Sender<Response>;

/// Everything the server reacts to.
pub(crate) enum Message {
    StreamBegin {
        matrix: MatrixId,
        provided_len: usize,
        callback: Callback<Result<(), ConfigurationError>>,
    },
    StreamChunk {
        matrix: MatrixId,
        node: NodeId,
        values: Vec<f32>,
    },
    WaitReady {
        matrix: MatrixId,
        callback: Callback<Result<(), RunError>>,
    },
    Launch {
        entry: String,
        callback: Callback<Result<RunId, ConfigurationError>>,
    },
    WaitRun {
        callback: Callback<Result<(), RunError>>,
    },
    ReadBack {
        matrix: MatrixId,
        callback: Callback<Result<Vec<f32>, RunError>>,
    },
    Metrics {
        callback: Callback<Result<RunMetrics, RunError>>,
    },
    Predict {
        desc: GridDescriptor,
        entry: EntryPoint,
        callback: Callback<RunPrediction>,
    },
    Abort {
        callback: Callback<()>,
    },
    TransferDone(BroadcastCompletion),
    ComputeDone(ComputeOutcome),
    EpilogueDone(EpilogueOutcome),
    Tick,
    Shutdown,
}

/// Lifecycle of the (single) run slot.
enum RunState {
    Idle,
    Running { id: RunId, entry: EntryPoint },
    /// The run failed, in-flight work is still coming home.
    Draining { error: RunError },
    /// The failed run's error, replayed to every barrier until relaunch.
    Poisoned(RunError),
}

struct InFlightTransfer {
    channel: ChannelId,
    step: usize,
    issued_at: Instant,
}

/// Owns the stores, the scheduler and the workers of one grid.
pub(crate) struct GridServer<B: TransferBackend> {
    desc: GridDescriptor,
    parity: usize,
    timeout_ms: u64,
    model: CostModel,
    channels: ChannelBook,
    backend: B,
    stores: Vec<NodeStore>,
    scheduler: PipelineScheduler,
    ingest: IngestLedger,
    compute_queues: Vec<async_channel::Sender<ComputeJob>>,
    in_flight: HashMap<TransferId, InFlightTransfer>,
    active_computes: usize,
    run: RunState,
    ledger: CycleLedger,
    last_metrics: Option<RunMetrics>,
    // Ingest costs are grid-scoped: a relaunch reuses the streamed tiles.
    ingest_cycles: Vec<(MatrixId, u64)>,
    ingest_samples: Vec<TransferSample>,
    c_waiters: Vec<Callback<Result<Vec<f32>, RunError>>>,
    run_waiters: Vec<Callback<Result<(), RunError>>>,
    ready_waiters: Vec<(MatrixId, Callback<Result<(), RunError>>)>,
    input_waiters: Vec<(MatrixId, Callback<Result<Vec<f32>, RunError>>)>,
    abort_waiters: Vec<Callback<()>>,
    logger: RunLogger,
}

impl<B: TransferBackend> GridServer<B> {
    /// Validates the descriptor, spawns the workers and the server thread,
    /// and returns the inbox clients talk to.
    pub(crate) fn start(
        desc: GridDescriptor,
        config: Arc<GlobalConfig>,
        mut backend: B,
    ) -> Result<async_channel::Sender<Message>, ConfigurationError> {
        let channels = validate(&desc, &config)?;
        log::info!(
            "Grid {desc} online: {} nodes, {} fabric channels",
            desc.grid.node_count(),
            channels.channels_used()
        );
        let (sender, receiver) = async_channel::unbounded();
        backend.bind(CompletionSink::new(sender.clone()), channels.channels_used());
        let compute_queues = spawn_compute_workers(desc.grid.node_count(), sender.clone());
        spawn_ticker(sender.clone(), config.fabric.transfer_timeout_ms);

        let model = CostModel::from_config(&config.cost);
        let parity = config.pipeline.parity_classes;
        let stores = desc
            .grid
            .nodes()
            .map(|node| NodeStore::new(node, desc.tile, parity))
            .collect();
        let server = Self {
            parity,
            timeout_ms: config.fabric.transfer_timeout_ms,
            model,
            backend,
            stores,
            scheduler: PipelineScheduler::new(desc.grid, parity),
            ingest: IngestLedger::new(desc),
            compute_queues,
            in_flight: HashMap::new(),
            active_computes: 0,
            run: RunState::Idle,
            ledger: CycleLedger::new(model, desc, parity, channels.channel_ids().collect()),
            last_metrics: None,
            ingest_cycles: Vec::new(),
            ingest_samples: Vec::new(),
            c_waiters: Vec::new(),
            run_waiters: Vec::new(),
            ready_waiters: Vec::new(),
            input_waiters: Vec::new(),
            abort_waiters: Vec::new(),
            logger: RunLogger::new(&config.profiling),
            channels,
            desc,
        };
        let _ = std::thread::Builder::new()
            .name("tilecast-server".into())
            .spawn(move || tilecast_common::future::block_on(server.run(receiver)));
        Ok(sender)
    }

    async fn run(mut self, receiver: async_channel::Receiver<Message>) {
        while let Ok(message) = receiver.recv().await {
            match message {
                Message::StreamBegin {
                    matrix,
                    provided_len,
                    callback,
                } => {
                    let result = self.ingest.register(matrix, provided_len);
                    callback.send(result).await.unwrap();
                }
                Message::StreamChunk {
                    matrix,
                    node,
                    values,
                } => {
                    self.accept_chunk(matrix, node, &values).await;
                }
                Message::WaitReady { matrix, callback } => {
                    self.wait_ready(matrix, callback).await;
                }
                Message::Launch { entry, callback } => {
                    let result = self.launch(&entry).await;
                    callback.send(result).await.unwrap();
                }
                Message::WaitRun { callback } => {
                    self.wait_run(callback).await;
                }
                Message::ReadBack { matrix, callback } => {
                    self.read_back(matrix, callback).await;
                }
                Message::Metrics { callback } => {
                    let result = match &self.run {
                        RunState::Poisoned(error) => Err(error.clone()),
                        _ => self.last_metrics.clone().ok_or(RunError::NoCompletedRun),
                    };
                    callback.send(result).await.unwrap();
                }
                Message::Predict {
                    desc,
                    entry,
                    callback,
                } => {
                    let prediction = self.model.predict_run(&desc, entry, self.parity);
                    callback.send(prediction).await.unwrap();
                }
                Message::Abort { callback } => {
                    self.abort(callback).await;
                }
                Message::TransferDone(completion) => {
                    self.transfer_done(completion).await;
                }
                Message::ComputeDone(outcome) => {
                    self.compute_done(outcome).await;
                }
                Message::EpilogueDone(outcome) => {
                    self.epilogue_done(outcome).await;
                }
                Message::Tick => {
                    self.tick().await;
                }
                Message::Shutdown => break,
            }
        }
    }

    // Streaming.

    async fn accept_chunk(&mut self, matrix: MatrixId, node: NodeId, values: &[f32]) {
        let n = node.flat(self.desc.grid);
        if !self.stores[n].push_elements(matrix, values) {
            return;
        }
        if self.ingest.note_node_ready(matrix) {
            self.charge_ingest(matrix);
            self.flush_ready(matrix).await;
        }
        self.dispatch(SchedulerEvent::HomeReady { matrix, node }).await;
    }

    /// Books the modeled host-link cost of one fully landed stream.
    fn charge_ingest(&mut self, matrix: MatrixId) {
        let words = self.desc.streamed_words(matrix) as f64;
        let span = self.desc.grid.perimeter() as f64;
        let cycles = self.model.transfer_cycles(Direction::HostToGrid, words, span);
        log::debug!("{matrix} landed on every node, {cycles:.0} modeled ingest cycles");
        self.ingest_cycles.push((matrix, cycles.round() as u64));
        self.ingest_samples.push(TransferSample {
            direction: Direction::HostToGrid,
            words,
            span,
            cycles,
        });
        if self.logger.is_active() {
            self.logger.register(format!("ingest {matrix}"), cycles);
        }
    }

    async fn wait_ready(&mut self, matrix: MatrixId, callback: Callback<Result<(), RunError>>) {
        if !matrix.is_input() {
            let error = ConfigurationError::NotAnInput { matrix };
            callback.send(Err(error.into())).await.unwrap();
        } else if !self.ingest.is_registered(matrix) {
            let error = ConfigurationError::StreamNotStarted { matrix };
            callback.send(Err(error.into())).await.unwrap();
        } else if self.ingest.is_complete(matrix) {
            callback.send(Ok(())).await.unwrap();
        } else {
            self.ready_waiters.push((matrix, callback));
        }
    }

    async fn flush_ready(&mut self, matrix: MatrixId) {
        let pending = core::mem::take(&mut self.ready_waiters);
        for (wanted, callback) in pending {
            if wanted == matrix {
                callback.send(Ok(())).await.unwrap();
            } else {
                self.ready_waiters.push((wanted, callback));
            }
        }
        let pending = core::mem::take(&mut self.input_waiters);
        for (wanted, callback) in pending {
            if wanted == matrix {
                let data = self.gather_input(matrix);
                callback.send(data).await.unwrap();
            } else {
                self.input_waiters.push((wanted, callback));
            }
        }
    }

    // Launch and completion.

    async fn launch(&mut self, entry: &str) -> Result<RunId, ConfigurationError> {
        let entry = EntryPoint::parse(entry)?;
        if matches!(
            self.run,
            RunState::Running { .. } | RunState::Draining { .. }
        ) {
            return Err(ConfigurationError::RunInFlight);
        }
        if entry.needs_bias() && !self.ingest.is_registered(MatrixId::Bias) {
            return Err(ConfigurationError::MissingBiasStream);
        }

        // A launch clears any previous run, poison included. Resident
        // tiles and ingest progress carry over.
        for store in &mut self.stores {
            store.reset_for_run();
        }
        self.scheduler.reset();
        self.ledger = CycleLedger::new(
            self.model,
            self.desc,
            self.parity,
            self.channels.channel_ids().collect(),
        );
        let id = RunId::new();
        self.run = RunState::Running { id, entry };
        if self.logger.is_active() {
            self.logger
                .log(&format!("{id}: `{}` on {}", entry.name(), self.desc));
        }
        let actions = self.scheduler.on(SchedulerEvent::Launched { entry });
        self.apply_actions(actions).await;
        Ok(id)
    }

    /// Feeds one event to the scheduler. Actions only materialize while the
    /// run is healthy; the event itself always lands so home-readiness
    /// survives drains and idles.
    async fn dispatch(&mut self, event: SchedulerEvent) {
        let actions = self.scheduler.on(event);
        if matches!(self.run, RunState::Running { .. }) {
            self.apply_actions(actions).await;
        }
    }

    async fn apply_actions(&mut self, actions: Vec<SchedulerAction>) {
        for action in actions {
            if !matches!(self.run, RunState::Running { .. }) {
                return;
            }
            log::trace!("Scheduler action {action:?}");
            match action {
                SchedulerAction::IssueBroadcast { axis, step, class } => {
                    self.issue_broadcast(axis, step, class).await;
                }
                SchedulerAction::StartCompute { node, step, inputs } => {
                    self.start_compute(node, step, inputs).await;
                }
                SchedulerAction::StartEpilogue { node } => {
                    self.start_epilogue(node).await;
                }
                SchedulerAction::RunComplete => {
                    self.finish_run().await;
                }
            }
        }
    }

    async fn home_or_fail(&mut self, node: NodeId, matrix: MatrixId) -> Option<Arc<Tile>> {
        match self.stores[node.flat(self.desc.grid)].home(matrix) {
            Ok(tile) => Some(tile),
            Err(error) => {
                self.initiate_failure(error).await;
                None
            }
        }
    }

    async fn issue_broadcast(&mut self, axis: BroadcastAxis, step: usize, class: ParityClass) {
        let grid = self.desc.grid;
        let Some(source) = self.home_or_fail(axis.source(step), axis.matrix()).await else {
            return;
        };
        let matrix = axis.matrix();
        let mut dests = Vec::new();
        for node in axis.dest_nodes(grid) {
            let staging = self.stores[node.flat(grid)].begin_recv(matrix, class);
            dests.push((node, staging));
        }
        let pair = self.channels.pair(class);
        let channel = match axis {
            BroadcastAxis::ARow(_) => pair.row,
            BroadcastAxis::BCol(_) => pair.col,
        };
        let id = TransferId::new();
        self.in_flight.insert(
            id,
            InFlightTransfer {
                channel,
                step,
                issued_at: Instant::now(),
            },
        );
        self.backend.submit(BroadcastOp {
            id,
            axis,
            step,
            class,
            channel,
            source,
            dests,
        });
    }

    async fn start_compute(&mut self, node: NodeId, step: usize, select: InputSelect) {
        let n = node.flat(self.desc.grid);
        let inputs = match select {
            InputSelect::Staged(class) => {
                let a = self.stores[n].take_recv_for_compute(MatrixId::A, class);
                let b = self.stores[n].take_recv_for_compute(MatrixId::B, class);
                StepInputs::Staged { class, a, b }
            }
            InputSelect::Resident => {
                let Some(a) = self.home_or_fail(node, MatrixId::A).await else {
                    return;
                };
                let Some(b) = self.home_or_fail(node, MatrixId::B).await else {
                    return;
                };
                StepInputs::Resident { a, b }
            }
        };
        let c = self.stores[n].take_c();
        self.active_computes += 1;
        let task = ComputeTask {
            node,
            step,
            inputs,
            c,
            dims: self.desc.tile,
        };
        self.compute_queues[n].send(ComputeJob::Step(task)).await.unwrap();
    }

    async fn start_epilogue(&mut self, node: NodeId) {
        let Some(bias) = self.home_or_fail(node, MatrixId::Bias).await else {
            return;
        };
        let n = node.flat(self.desc.grid);
        let c = self.stores[n].take_c();
        self.active_computes += 1;
        let task = EpilogueTask {
            node,
            bias,
            c,
            dims: self.desc.tile,
        };
        self.compute_queues[n]
            .send(ComputeJob::Epilogue(task))
            .await
            .unwrap();
    }

    async fn finish_run(&mut self) {
        let (id, entry) = match &self.run {
            RunState::Running { id, entry } => (*id, *entry),
            _ => return,
        };
        let metrics = self
            .ledger
            .finish(entry, &self.ingest_cycles, &self.ingest_samples);
        log::info!(
            "{id}: `{}` done in {} modeled cycles, overlap saved {} over sequential",
            entry.name(),
            metrics.total_cycles,
            metrics.pipeline.savings()
        );
        if self.logger.is_active() {
            self.logger.log(&format!(
                "{id}: `{}` finished in {} modeled cycles",
                entry.name(),
                metrics.total_cycles
            ));
            self.logger.summary();
        }
        self.last_metrics = Some(metrics);
        self.run = RunState::Idle;

        for callback in core::mem::take(&mut self.run_waiters) {
            callback.send(Ok(())).await.unwrap();
        }
        let waiters = core::mem::take(&mut self.c_waiters);
        if !waiters.is_empty() {
            let data = self.gather_output();
            for callback in waiters {
                callback.send(Ok(data.clone())).await.unwrap();
            }
        }
    }

    // Completions.

    async fn transfer_done(&mut self, completion: BroadcastCompletion) {
        self.in_flight.remove(&completion.id);
        let matrix = completion.axis.matrix();
        if matches!(self.run, RunState::Running { .. }) {
            for (node, tile) in completion.filled {
                self.stores[node.flat(self.desc.grid)].finish_recv(matrix, completion.class, tile);
            }
            let duration = self.ledger.broadcast_done(
                completion.axis,
                completion.step,
                completion.channel,
                completion.words,
            );
            if self.logger.is_active() {
                self.logger.register(format!("broadcast {matrix}"), duration);
            }
            self.dispatch(SchedulerEvent::BroadcastDone {
                axis: completion.axis,
                step: completion.step,
            })
            .await;
        } else {
            // Late arrival of a failed run, the payload is dead weight.
            for (node, tile) in completion.filled {
                self.stores[node.flat(self.desc.grid)].abort_recv(matrix, completion.class, tile);
            }
            self.try_finish_drain().await;
        }
    }

    async fn compute_done(&mut self, outcome: ComputeOutcome) {
        self.active_computes -= 1;
        let n = outcome.node.flat(self.desc.grid);
        match outcome.inputs {
            StepInputs::Staged { class, a, b } => {
                self.stores[n].return_recv_from_compute(MatrixId::A, class, a);
                self.stores[n].return_recv_from_compute(MatrixId::B, class, b);
            }
            StepInputs::Resident { .. } => {}
        }
        self.stores[n].put_c(outcome.c);
        if matches!(self.run, RunState::Running { .. }) {
            let duration = self
                .ledger
                .compute_done(outcome.node, outcome.step, outcome.fma_groups);
            if self.logger.is_active() {
                self.logger.register("compute", duration);
            }
            self.dispatch(SchedulerEvent::ComputeDone {
                node: outcome.node,
                step: outcome.step,
            })
            .await;
        } else {
            self.try_finish_drain().await;
        }
    }

    async fn epilogue_done(&mut self, outcome: EpilogueOutcome) {
        self.active_computes -= 1;
        let n = outcome.node.flat(self.desc.grid);
        self.stores[n].put_c(outcome.c);
        if matches!(self.run, RunState::Running { .. }) {
            let duration = self.ledger.epilogue_done(outcome.node);
            if self.logger.is_active() {
                self.logger.register("epilogue", duration);
            }
            self.dispatch(SchedulerEvent::EpilogueDone { node: outcome.node })
                .await;
        } else {
            self.try_finish_drain().await;
        }
    }

    // Failure and drain.

    /// Fails the running run. Broadcasts the backend never started are
    /// recovered here; started ones drain through their completions.
    async fn initiate_failure(&mut self, error: RunError) {
        if !matches!(self.run, RunState::Running { .. }) {
            return;
        }
        for op in self.backend.drain() {
            self.in_flight.remove(&op.id);
            let matrix = op.axis.matrix();
            for (node, tile) in op.dests {
                self.stores[node.flat(self.desc.grid)].abort_recv(matrix, op.class, tile);
            }
        }
        if self.logger.is_active() {
            self.logger.log(&format!("run failed: {error}"));
        }
        self.run = RunState::Draining { error };
        self.try_finish_drain().await;
    }

    async fn try_finish_drain(&mut self) {
        let error = match &self.run {
            RunState::Draining { error } => error.clone(),
            _ => return,
        };
        if !self.in_flight.is_empty() || self.active_computes > 0 {
            return;
        }
        self.run = RunState::Poisoned(error.clone());
        for callback in core::mem::take(&mut self.run_waiters) {
            callback.send(Err(error.clone())).await.unwrap();
        }
        for callback in core::mem::take(&mut self.c_waiters) {
            callback.send(Err(error.clone())).await.unwrap();
        }
        for callback in core::mem::take(&mut self.abort_waiters) {
            callback.send(()).await.unwrap();
        }
    }

    async fn abort(&mut self, callback: Callback<()>) {
        self.initiate_failure(RunError::Aborted).await;
        if matches!(self.run, RunState::Draining { .. }) {
            self.abort_waiters.push(callback);
        } else {
            callback.send(()).await.unwrap();
        }
    }

    async fn wait_run(&mut self, callback: Callback<Result<(), RunError>>) {
        match &self.run {
            RunState::Running { .. } | RunState::Draining { .. } => {
                self.run_waiters.push(callback);
            }
            RunState::Poisoned(error) => {
                let error = error.clone();
                callback.send(Err(error)).await.unwrap();
            }
            RunState::Idle => callback.send(Ok(())).await.unwrap(),
        }
    }

    async fn tick(&mut self) {
        if !matches!(self.run, RunState::Running { .. }) {
            return;
        }
        let deadline = Duration::from_millis(self.timeout_ms);
        let late = self
            .in_flight
            .values()
            .filter(|transfer| transfer.issued_at.elapsed() >= deadline)
            .map(|transfer| (transfer.channel, transfer.step))
            .min_by_key(|&(_, step)| step);
        if let Some((channel, step)) = late {
            self.initiate_failure(RunError::TransferTimeout {
                channel,
                step,
                timeout_ms: self.timeout_ms,
            })
            .await;
        }
    }

    // Read back.

    async fn read_back(&mut self, matrix: MatrixId, callback: Callback<Result<Vec<f32>, RunError>>) {
        if matrix == MatrixId::C {
            match &self.run {
                RunState::Running { .. } | RunState::Draining { .. } => {
                    self.c_waiters.push(callback);
                }
                RunState::Poisoned(error) => {
                    let error = error.clone();
                    callback.send(Err(error)).await.unwrap();
                }
                RunState::Idle => {
                    let data = self.gather_output();
                    callback.send(Ok(data)).await.unwrap();
                }
            }
            return;
        }
        if !self.ingest.is_registered(matrix) {
            let error = ConfigurationError::StreamNotStarted { matrix };
            callback.send(Err(error.into())).await.unwrap();
        } else if !self.ingest.is_complete(matrix) {
            self.input_waiters.push((matrix, callback));
        } else {
            let data = self.gather_input(matrix);
            callback.send(data).await.unwrap();
        }
    }

    fn gather_input(&self, matrix: MatrixId) -> Result<Vec<f32>, RunError> {
        let tiles = self
            .stores
            .iter()
            .map(|store| store.home(matrix))
            .collect::<Result<Vec<_>, _>>()?;
        let views: Vec<&[f32]> = tiles.iter().map(|tile| tile.as_slice()).collect();
        Ok(gather(&self.desc, matrix, &views))
    }

    fn gather_output(&mut self) -> Vec<f32> {
        if let Some(metrics) = self.last_metrics.as_mut() {
            metrics.record_drain(&self.model);
        }
        let views: Vec<&[f32]> = self.stores.iter().map(|store| store.c_data()).collect();
        gather(&self.desc, MatrixId::C, &views)
    }
}

/// Everything that can be rejected before a worker thread exists.
fn validate(
    desc: &GridDescriptor,
    config: &GlobalConfig,
) -> Result<ChannelBook, ConfigurationError> {
    let dims = [
        (desc.grid.rows, "grid rows"),
        (desc.grid.cols, "grid cols"),
        (desc.tile.mt, "tile mt"),
        (desc.tile.kt, "tile kt"),
        (desc.tile.nt, "tile nt"),
    ];
    for (value, what) in dims {
        if value == 0 {
            return Err(ConfigurationError::ZeroDimension { what });
        }
    }
    if !desc.grid.is_square() {
        return Err(ConfigurationError::NonSquareGrid {
            rows: desc.grid.rows,
            cols: desc.grid.cols,
        });
    }
    let book = ChannelBook::allocate(
        desc.channel_count,
        config.pipeline.parity_classes,
        config.fabric.max_channels,
    )?;
    let needed = desc.footprint_bytes(config.pipeline.parity_classes);
    if needed > config.fabric.node_memory_bytes {
        return Err(ConfigurationError::TileTooLarge {
            needed,
            capacity: config.fabric.node_memory_bytes,
        });
    }
    Ok(book)
}

fn spawn_ticker(sender: async_channel::Sender<Message>, timeout_ms: u64) {
    let period = Duration::from_millis((timeout_ms / 10).clamp(5, 100));
    let _ = std::thread::Builder::new()
        .name("tilecast-ticker".into())
        .spawn(move || {
            loop {
                std::thread::sleep(period);
                if sender.send_blocking(Message::Tick).is_err() {
                    break;
                }
            }
        });
}
