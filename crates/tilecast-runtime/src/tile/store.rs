use std::sync::Arc;

use crate::channel::ParityClass;
use crate::error::RunError;
use crate::grid::{MatrixId, NodeId, TileDims};

use super::{RecvSlots, SlotPhase, Tile};

/// A resident input tile while its stream is still arriving, then sealed
/// into shared immutable storage once every element landed.
#[derive(Debug)]
enum HomeTile {
    Filling { tile: Tile, received: usize },
    Ready(Arc<Tile>),
}

impl HomeTile {
    fn new(rows: usize, cols: usize) -> Self {
        Self::Filling {
            tile: Tile::zeroed(rows, cols),
            received: 0,
        }
    }

    fn received(&self, expected: usize) -> usize {
        match self {
            Self::Filling { received, .. } => *received,
            Self::Ready(_) => expected,
        }
    }
}

/// Everything one node owns: resident input tiles, the receive staging
/// slots of both operands and the output accumulator.
///
/// The accumulator leaves the store while a compute task runs, which keeps
/// at most one compute in flight per node by construction.
#[derive(Debug)]
pub struct NodeStore {
    node: NodeId,
    tile: TileDims,
    a_home: HomeTile,
    b_home: HomeTile,
    bias_home: HomeTile,
    a_recv: RecvSlots,
    b_recv: RecvSlots,
    c: Option<Tile>,
}

impl NodeStore {
    pub fn new(node: NodeId, tile: TileDims, parity_classes: usize) -> Self {
        Self {
            node,
            tile,
            a_home: HomeTile::new(tile.mt, tile.kt),
            b_home: HomeTile::new(tile.kt, tile.nt),
            bias_home: HomeTile::new(tile.mt, 1),
            a_recv: RecvSlots::new(parity_classes, tile.mt, tile.kt),
            b_recv: RecvSlots::new(parity_classes, tile.kt, tile.nt),
            c: Some(Tile::zeroed(tile.mt, tile.nt)),
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Elements this node expects for `matrix`.
    pub fn expected(&self, matrix: MatrixId) -> usize {
        match matrix {
            MatrixId::A => self.tile.a_elems(),
            MatrixId::B => self.tile.b_elems(),
            MatrixId::Bias => self.tile.mt,
            MatrixId::C => self.tile.c_elems(),
        }
    }

    fn home_slot(&mut self, matrix: MatrixId) -> &mut HomeTile {
        match matrix {
            MatrixId::A => &mut self.a_home,
            MatrixId::B => &mut self.b_home,
            MatrixId::Bias => &mut self.bias_home,
            MatrixId::C => panic!("the output matrix has no home tile"),
        }
    }

    fn home_ref(&self, matrix: MatrixId) -> &HomeTile {
        match matrix {
            MatrixId::A => &self.a_home,
            MatrixId::B => &self.b_home,
            MatrixId::Bias => &self.bias_home,
            MatrixId::C => panic!("the output matrix has no home tile"),
        }
    }

    /// Appends a burst of streamed elements, sealing the tile into shared
    /// storage once full. Returns `true` on the sealing append.
    ///
    /// # Panics
    ///
    /// Panics if the burst overflows the tile or the tile is already
    /// sealed. Stream lengths are validated before any chunk is routed, so
    /// either is a routing bug.
    pub fn push_elements(&mut self, matrix: MatrixId, values: &[f32]) -> bool {
        let expected = self.expected(matrix);
        let home = self.home_slot(matrix);
        match home {
            HomeTile::Filling { tile, received } => {
                let end = *received + values.len();
                assert!(
                    end <= expected,
                    "stream overflows {matrix} tile: {end} > {expected}"
                );
                tile.as_mut_slice()[*received..end].copy_from_slice(values);
                *received = end;
                if end == expected {
                    let sealed = core::mem::replace(tile, Tile::zeroed(0, 0));
                    *home = HomeTile::Ready(Arc::new(sealed));
                    true
                } else {
                    false
                }
            }
            HomeTile::Ready(_) => panic!("stream chunk for sealed {matrix} tile"),
        }
    }

    pub fn is_ready(&self, matrix: MatrixId) -> bool {
        matches!(self.home_ref(matrix), HomeTile::Ready(_))
    }

    pub fn received(&self, matrix: MatrixId) -> usize {
        self.home_ref(matrix).received(self.expected(matrix))
    }

    /// Shared handle to a sealed input tile.
    ///
    /// Reaching for a tile that is still filling means a transfer or
    /// compute was scheduled against an incomplete stream.
    pub fn home(&self, matrix: MatrixId) -> Result<Arc<Tile>, RunError> {
        match self.home_ref(matrix) {
            HomeTile::Ready(tile) => Ok(tile.clone()),
            HomeTile::Filling { received, .. } => Err(RunError::IncompleteStream {
                node: self.node,
                matrix,
                received: *received,
                expected: self.expected(matrix),
            }),
        }
    }

    fn recv_slots(&mut self, matrix: MatrixId) -> &mut RecvSlots {
        match matrix {
            MatrixId::A => &mut self.a_recv,
            MatrixId::B => &mut self.b_recv,
            other => panic!("{other} has no receive slots"),
        }
    }

    pub fn recv_phase(&self, matrix: MatrixId, class: ParityClass) -> SlotPhase {
        match matrix {
            MatrixId::A => self.a_recv.phase(class),
            MatrixId::B => self.b_recv.phase(class),
            other => panic!("{other} has no receive slots"),
        }
    }

    /// Stages the receive buffer of (`matrix`, `class`) for a broadcast.
    pub fn begin_recv(&mut self, matrix: MatrixId, class: ParityClass) -> Tile {
        self.recv_slots(matrix).begin_transfer(class)
    }

    /// Installs a broadcast-filled buffer.
    pub fn finish_recv(&mut self, matrix: MatrixId, class: ParityClass, tile: Tile) {
        self.recv_slots(matrix).finish_transfer(class, tile);
    }

    /// Returns an unfilled buffer to its slot on abort or timeout drain.
    pub fn abort_recv(&mut self, matrix: MatrixId, class: ParityClass, tile: Tile) {
        self.recv_slots(matrix).abort_transfer(class, tile);
    }

    /// Takes the received buffer of (`matrix`, `class`) for a compute task.
    pub fn take_recv_for_compute(&mut self, matrix: MatrixId, class: ParityClass) -> Tile {
        self.recv_slots(matrix).begin_compute(class)
    }

    /// Returns a consumed receive buffer, freeing its slot.
    pub fn return_recv_from_compute(&mut self, matrix: MatrixId, class: ParityClass, tile: Tile) {
        self.recv_slots(matrix).finish_compute(class, tile);
    }

    /// Takes the accumulator for a compute or epilogue task.
    pub fn take_c(&mut self) -> Tile {
        match self.c.take() {
            Some(tile) => tile,
            None => panic!("accumulator of node {} is already in compute", self.node),
        }
    }

    pub fn put_c(&mut self, tile: Tile) {
        debug_assert!(self.c.is_none(), "accumulator returned twice");
        self.c = Some(tile);
    }

    /// Zeroes the accumulator at the start of a run.
    pub fn reset_c(&mut self) {
        match &mut self.c {
            Some(tile) => tile.fill_zero(),
            None => panic!("accumulator of node {} is in compute", self.node),
        }
    }

    /// Clears run-scoped state before a launch: zeroes the accumulator and
    /// frees any receive payload a drained run left installed. Resident
    /// input tiles stay sealed.
    pub fn reset_for_run(&mut self) {
        self.a_recv.reset();
        self.b_recv.reset();
        self.reset_c();
    }

    /// Read access to the accumulated output.
    pub fn c_data(&self) -> &[f32] {
        match &self.c {
            Some(tile) => tile.as_slice(),
            None => panic!("accumulator of node {} is in compute", self.node),
        }
    }
}
