//! The client handle: thin channel plumbing in front of the grid server.

use std::sync::Arc;

use tilecast_common::future::DynFut;

use crate::config::GlobalConfig;
use crate::error::{ConfigurationError, RunError};
use crate::grid::{GridDescriptor, MatrixId};
use crate::id::RunId;
use crate::ingest::scatter;
use crate::metrics::RunMetrics;
use crate::predict::RunPrediction;
use crate::scheduler::EntryPoint;
use crate::server::{GridServer, Message};
use crate::transfer::{FabricBackend, TransferBackend};

/// Handle to one grid.
///
/// Cheap to clone; every clone talks to the same server thread, so streams,
/// launches and read backs may come from different host threads. The grid
/// and its workers shut down when the last clone drops.
#[derive(Debug)]
pub struct GridClient {
    state: Arc<ClientState>,
}

#[derive(Debug)]
struct ClientState {
    sender: async_channel::Sender<Message>,
    desc: GridDescriptor,
    burst: usize,
}

impl Clone for GridClient {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl Drop for ClientState {
    fn drop(&mut self) {
        let _ = self.sender.send_blocking(Message::Shutdown);
    }
}

impl GridClient {
    /// Brings up a grid under the global configuration.
    ///
    /// Everything that can be rejected is rejected here, before any worker
    /// thread exists: grid shape, tile footprint, channel budget.
    pub fn init(desc: GridDescriptor) -> Result<Self, ConfigurationError> {
        Self::init_with_config(desc, GlobalConfig::get())
    }

    /// Brings up a grid under an explicit configuration.
    pub fn init_with_config(
        desc: GridDescriptor,
        config: Arc<GlobalConfig>,
    ) -> Result<Self, ConfigurationError> {
        Self::init_with_backend(desc, config, FabricBackend::new())
    }

    /// Brings up a grid on a caller-supplied transfer backend. Tests use
    /// this with [crate::transfer::ManualBackend] to pin down interleavings.
    pub fn init_with_backend<B: TransferBackend>(
        desc: GridDescriptor,
        config: Arc<GlobalConfig>,
        backend: B,
    ) -> Result<Self, ConfigurationError> {
        let burst = config.fabric.ingest_burst.max(1);
        let sender = GridServer::start(desc, config, backend)?;
        Ok(Self {
            state: Arc::new(ClientState {
                sender,
                desc,
                burst,
            }),
        })
    }

    /// The descriptor this grid was brought up with.
    pub fn descriptor(&self) -> GridDescriptor {
        self.state.desc
    }

    /// Streams a host matrix into its resident tiles.
    ///
    /// Length and double-stream checks happen before this returns, in both
    /// modes. With `blocking` the call also waits until every node sealed
    /// its tile; without it the payload feeds from a background thread in
    /// `ingest_burst` slices and [GridClient::wait_ready] (or the next read
    /// back) is the barrier. A, B and the bias may feed concurrently.
    pub fn stream_in(
        &self,
        matrix: MatrixId,
        data: Vec<f32>,
        blocking: bool,
    ) -> Result<(), RunError> {
        let (callback, response) = async_channel::unbounded();
        self.state
            .sender
            .send_blocking(Message::StreamBegin {
                matrix,
                provided_len: data.len(),
                callback,
            })
            .unwrap();
        handle_response(response.recv_blocking())?;

        let state = self.state.clone();
        let feed = move || {
            let tiles = scatter(&state.desc, matrix, &data);
            for (node, tile) in state.desc.grid.nodes().zip(tiles) {
                for chunk in tile.chunks(state.burst) {
                    let message = Message::StreamChunk {
                        matrix,
                        node,
                        values: chunk.to_vec(),
                    };
                    if state.sender.send_blocking(message).is_err() {
                        return;
                    }
                }
            }
        };
        if blocking {
            feed();
            self.wait_ready(matrix)
        } else {
            let _ = std::thread::Builder::new()
                .name(format!("tilecast-feed-{matrix}"))
                .spawn(feed);
            Ok(())
        }
    }

    /// Byte-slice variant of [GridClient::stream_in] for hosts holding raw
    /// row-major `f32` buffers. A byte length that does not divide into
    /// whole elements is a length mismatch.
    pub fn stream_in_bytes(
        &self,
        matrix: MatrixId,
        data: &[u8],
        blocking: bool,
    ) -> Result<(), RunError> {
        let word = core::mem::size_of::<f32>();
        if data.len() % word != 0 {
            let error = ConfigurationError::DimensionMismatch {
                matrix,
                expected: self.state.desc.input_len(matrix),
                actual: data.len() / word,
            };
            return Err(error.into());
        }
        self.stream_in(matrix, bytemuck::pod_collect_to_vec(data), blocking)
    }

    /// Blocks until every node sealed its tile of `matrix`.
    pub fn wait_ready(&self, matrix: MatrixId) -> Result<(), RunError> {
        let (callback, response) = async_channel::unbounded();
        self.state
            .sender
            .send_blocking(Message::WaitReady { matrix, callback })
            .unwrap();
        handle_response(response.recv_blocking())
    }

    /// Arms the scheduler for one run of `entry` ("main" or "main_bias").
    ///
    /// Returns as soon as the run is in flight; [GridClient::read_back] of C
    /// is the completion barrier. One run at a time per grid.
    pub fn launch(&self, entry: &str) -> Result<RunId, ConfigurationError> {
        let (callback, response) = async_channel::unbounded();
        self.state
            .sender
            .send_blocking(Message::Launch {
                entry: entry.to_string(),
                callback,
            })
            .unwrap();
        handle_response(response.recv_blocking())
    }

    /// [GridClient::launch], then blocks until the run retires.
    ///
    /// A failed run surfaces its error here instead of at read back.
    pub fn launch_blocking(&self, entry: &str) -> Result<RunId, RunError> {
        let id = self.launch(entry)?;
        let (callback, response) = async_channel::unbounded();
        self.state
            .sender
            .send_blocking(Message::WaitRun { callback })
            .unwrap();
        handle_response(response.recv_blocking())?;
        Ok(id)
    }

    /// Gathers a matrix back into host row-major order.
    ///
    /// For C this waits for the in-flight run (and surfaces its error if it
    /// failed); for inputs it waits for the stream to land.
    pub fn read_back(&self, matrix: MatrixId) -> Result<Vec<f32>, RunError> {
        tilecast_common::reader::read_sync(self.read_back_async(matrix))
    }

    /// [GridClient::read_back] as a future.
    pub fn read_back_async(&self, matrix: MatrixId) -> DynFut<Result<Vec<f32>, RunError>> {
        let sender = self.state.sender.clone();
        Box::pin(async move {
            let (callback, response) = async_channel::unbounded();
            sender
                .send(Message::ReadBack { matrix, callback })
                .await
                .unwrap();
            handle_response(response.recv().await)
        })
    }

    /// [GridClient::read_back], returning the raw little-endian bytes.
    pub fn read_back_bytes(&self, matrix: MatrixId) -> Result<Vec<u8>, RunError> {
        let values = self.read_back(matrix)?;
        Ok(bytemuck::cast_slice(&values).to_vec())
    }

    /// Metrics of the last completed run.
    pub fn metrics(&self) -> Result<RunMetrics, RunError> {
        let (callback, response) = async_channel::unbounded();
        self.state
            .sender
            .send_blocking(Message::Metrics { callback })
            .unwrap();
        handle_response(response.recv_blocking())
    }

    /// Predicted phase walls for `desc` under this grid's cost model, for
    /// the plain `main` entry. Nothing executes.
    pub fn predict(&self, desc: &GridDescriptor) -> RunPrediction {
        let (callback, response) = async_channel::unbounded();
        self.state
            .sender
            .send_blocking(Message::Predict {
                desc: *desc,
                entry: EntryPoint::Main,
                callback,
            })
            .unwrap();
        handle_response(response.recv_blocking())
    }

    /// Cancels the in-flight run, if any.
    ///
    /// Returns once every in-flight transfer and task drained back home.
    /// The failed run reports [RunError::Aborted] at its barriers; streamed
    /// inputs survive and the grid is ready to relaunch.
    pub fn abort(&self) {
        let (callback, response) = async_channel::unbounded();
        self.state
            .sender
            .send_blocking(Message::Abort { callback })
            .unwrap();
        handle_response(response.recv_blocking())
    }
}

fn handle_response<Response, Err: core::fmt::Debug>(response: Result<Response, Err>) -> Response {
    match response {
        Ok(val) => val,
        Err(err) => panic!("Can't connect to the server correctly {err:?}"),
    }
}
