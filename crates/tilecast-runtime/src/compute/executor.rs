use async_channel::Sender;

use crate::server::Message;

use super::{ComputeTask, EpilogueTask};

/// Work shipped to a node's compute worker.
#[derive(Debug)]
pub(crate) enum ComputeJob {
    Step(ComputeTask),
    Epilogue(EpilogueTask),
}

/// Spawns one worker thread per node, each draining its own job queue and
/// reporting outcomes into the server inbox.
///
/// A queue depth of one is enforced upstream: the scheduler never starts a
/// second task on a node before the first outcome came back, so a worker
/// is either idle or running exactly one kernel.
pub(crate) fn spawn_compute_workers(
    nodes: usize,
    inbox: Sender<Message>,
) -> Vec<Sender<ComputeJob>> {
    (0..nodes)
        .map(|index| {
            let inbox = inbox.clone();
            let (sender, receiver) = async_channel::unbounded::<ComputeJob>();
            let _ = std::thread::Builder::new()
                .name(format!("tilecast-node-{index}"))
                .spawn(move || {
                    tilecast_common::future::block_on(async move {
                        while let Ok(job) = receiver.recv().await {
                            let message = match job {
                                ComputeJob::Step(task) => Message::ComputeDone(task.execute()),
                                ComputeJob::Epilogue(task) => {
                                    Message::EpilogueDone(task.execute())
                                }
                            };
                            if inbox.send(message).await.is_err() {
                                break;
                            }
                        }
                    });
                });
            sender
        })
        .collect()
}
