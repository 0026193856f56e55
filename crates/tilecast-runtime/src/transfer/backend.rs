use std::collections::VecDeque;
use std::sync::Arc;

use crate::scheduler::BroadcastAxis;
use crate::server::Message;

use super::{BroadcastCompletion, BroadcastOp};

/// Where a backend reports finished broadcasts.
///
/// Handed to the backend once, before any submission. Completions may be
/// reported from any thread.
#[derive(Clone)]
pub struct CompletionSink {
    inbox: async_channel::Sender<Message>,
}

impl CompletionSink {
    pub(crate) fn new(inbox: async_channel::Sender<Message>) -> Self {
        Self { inbox }
    }

    /// Reports one finished broadcast. Returns `false` once the grid has
    /// shut down, at which point the backend should stop.
    pub fn complete(&self, completion: BroadcastCompletion) -> bool {
        self.inbox
            .send_blocking(Message::TransferDone(completion))
            .is_ok()
    }
}

/// Moves staged broadcasts across the grid.
///
/// Submissions on one channel must execute in submission order; different
/// channels are free to interleave. Lanes of one channel never carry more
/// than one operation at a time, the scheduler's issue gating guarantees
/// that before a submit ever reaches the backend.
pub trait TransferBackend: Send + 'static {
    /// Receives the completion sink and the number of allocated channels.
    /// Called once, before any submit.
    fn bind(&mut self, sink: CompletionSink, channels: usize);

    /// Accepts one staged broadcast for execution.
    fn submit(&mut self, op: BroadcastOp);

    /// Hands back accepted operations that have not started executing, so
    /// their staging buffers can be recovered on abort or timeout.
    fn drain(&mut self) -> Vec<BroadcastOp>;
}

/// The in-memory fabric: one worker thread per channel, copying tiles and
/// reporting each completion as it happens.
#[derive(Default)]
pub struct FabricBackend {
    queues: Vec<async_channel::Sender<BroadcastOp>>,
}

impl FabricBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransferBackend for FabricBackend {
    fn bind(&mut self, sink: CompletionSink, channels: usize) {
        for index in 0..channels {
            let sink = sink.clone();
            let (sender, receiver) = async_channel::unbounded::<BroadcastOp>();
            let _ = std::thread::Builder::new()
                .name(format!("tilecast-ch{index}"))
                .spawn(move || {
                    tilecast_common::future::block_on(async move {
                        while let Ok(op) = receiver.recv().await {
                            if !sink.complete(op.execute()) {
                                break;
                            }
                        }
                    });
                });
            self.queues.push(sender);
        }
    }

    fn submit(&mut self, op: BroadcastOp) {
        self.queues[op.channel.index()]
            .send_blocking(op)
            .unwrap();
    }

    fn drain(&mut self) -> Vec<BroadcastOp> {
        // Workers never stall, anything submitted will complete on its own.
        Vec::new()
    }
}

/// A backend that executes nothing until told to.
///
/// Tests drive it from the outside to pin down exact interleavings: submit
/// order is observable through [`ManualBackend::pending_ops`], and each
/// [`ManualBackend::complete_next`] executes exactly one broadcast. Clones
/// share state, so keep one handle and pass the other to the grid.
#[derive(Clone, Default)]
pub struct ManualBackend {
    state: Arc<spin::Mutex<ManualState>>,
}

#[derive(Default)]
struct ManualState {
    pending: VecDeque<BroadcastOp>,
    sink: Option<CompletionSink>,
}

impl ManualBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of submitted, not yet executed broadcasts.
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// `(axis, step)` of every pending broadcast, oldest first.
    pub fn pending_ops(&self) -> Vec<(BroadcastAxis, usize)> {
        self.state
            .lock()
            .pending
            .iter()
            .map(|op| (op.axis, op.step))
            .collect()
    }

    /// Executes the oldest pending broadcast. Returns `false` when none is
    /// waiting.
    pub fn complete_next(&self) -> bool {
        let (op, sink) = {
            let mut state = self.state.lock();
            (state.pending.pop_front(), state.sink.clone())
        };
        match op {
            Some(op) => {
                let sink = match sink {
                    Some(sink) => sink,
                    None => panic!("manual backend is not bound to a grid"),
                };
                sink.complete(op.execute());
                true
            }
            None => false,
        }
    }

    /// Executes every pending broadcast in submission order, returning how
    /// many ran.
    pub fn complete_all(&self) -> usize {
        let mut ran = 0;
        while self.complete_next() {
            ran += 1;
        }
        ran
    }
}

impl TransferBackend for ManualBackend {
    fn bind(&mut self, sink: CompletionSink, _channels: usize) {
        self.state.lock().sink = Some(sink);
    }

    fn submit(&mut self, op: BroadcastOp) {
        self.state.lock().pending.push_back(op);
    }

    fn drain(&mut self) -> Vec<BroadcastOp> {
        self.state.lock().pending.drain(..).collect()
    }
}
