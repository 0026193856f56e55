use serde::{Deserialize, Serialize};

/// Coordinates of one compute node on the grid.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    /// Row index, `0..rows`.
    pub row: usize,
    /// Column index, `0..cols`.
    pub col: usize,
}

impl NodeId {
    /// Row-major flat index of this node.
    pub fn flat(&self, grid: GridDim) -> usize {
        self.row * grid.cols + self.col
    }
}

impl core::fmt::Display for NodeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Shape of the node grid.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridDim {
    /// Number of node rows.
    pub rows: usize,
    /// Number of node columns.
    pub cols: usize,
}

impl GridDim {
    /// Total number of nodes.
    pub fn node_count(&self) -> usize {
        self.rows * self.cols
    }

    /// Whether the grid is square. Only square grids can execute runs; the
    /// predictor also accepts rectangles.
    pub fn is_square(&self) -> bool {
        self.rows == self.cols
    }

    /// Number of pipeline steps of a run, defined for square grids.
    pub fn steps(&self) -> usize {
        self.rows
    }

    /// Edge length of the grid in nodes, the `perimeter` term of the
    /// transfer cost model for host-side transfers.
    pub fn perimeter(&self) -> usize {
        2 * (self.rows + self.cols)
    }

    /// All nodes in row-major order.
    pub fn nodes(self) -> impl Iterator<Item = NodeId> {
        let cols = self.cols;
        (0..self.node_count()).map(move |i| NodeId::new(i / cols, i % cols))
    }

    /// Nodes of one row, left to right.
    pub fn row_nodes(self, row: usize) -> impl Iterator<Item = NodeId> {
        (0..self.cols).map(move |col| NodeId::new(row, col))
    }

    /// Nodes of one column, top to bottom.
    pub fn col_nodes(self, col: usize) -> impl Iterator<Item = NodeId> {
        (0..self.rows).map(move |row| NodeId::new(row, col))
    }
}

impl core::fmt::Display for GridDim {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

/// Per-node tile shape: A tiles are `mt x kt`, B tiles `kt x nt`, C tiles
/// `mt x nt`.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileDims {
    /// Rows of the A and C tiles.
    pub mt: usize,
    /// Columns of the A tile, rows of the B tile.
    pub kt: usize,
    /// Columns of the B and C tiles.
    pub nt: usize,
}

impl TileDims {
    /// Elements of one A tile.
    pub fn a_elems(&self) -> usize {
        self.mt * self.kt
    }

    /// Elements of one B tile.
    pub fn b_elems(&self) -> usize {
        self.kt * self.nt
    }

    /// Elements of one C tile.
    pub fn c_elems(&self) -> usize {
        self.mt * self.nt
    }
}

impl core::fmt::Display for TileDims {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}x{}x{}", self.mt, self.kt, self.nt)
    }
}

/// The matrices a grid works with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatrixId {
    /// Left operand, `M x K`.
    A,
    /// Right operand, `K x N`.
    B,
    /// Optional per-row bias vector, length `M`.
    Bias,
    /// Result accumulator, `M x N`.
    C,
}

impl MatrixId {
    /// Whether the host may stream this matrix into the grid.
    pub fn is_input(&self) -> bool {
        !matches!(self, MatrixId::C)
    }
}

impl core::fmt::Display for MatrixId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            MatrixId::A => "A",
            MatrixId::B => "B",
            MatrixId::Bias => "bias",
            MatrixId::C => "C",
        };
        f.write_str(name)
    }
}

/// Everything needed to bring up a grid: node layout, tile shape, and the
/// fabric channel budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridDescriptor {
    /// Node grid shape.
    pub grid: GridDim,
    /// Tile shape owned by every node.
    pub tile: TileDims,
    /// Fabric channels this grid may claim for broadcasts.
    pub channel_count: usize,
}

impl GridDescriptor {
    /// Descriptor for a square `p x p` grid with the given tile shape and
    /// four broadcast channels, enough for the default two parity classes.
    pub fn square(p: usize, mt: usize, kt: usize, nt: usize) -> Self {
        Self {
            grid: GridDim::new(p, p),
            tile: TileDims::new(mt, kt, nt),
            channel_count: 4,
        }
    }

    /// Replace the channel budget.
    pub fn with_channel_count(mut self, channel_count: usize) -> Self {
        self.channel_count = channel_count;
        self
    }

    /// Elements of the given matrix resident on one node.
    pub fn node_elems(&self, matrix: MatrixId) -> usize {
        match matrix {
            MatrixId::A => self.tile.a_elems(),
            MatrixId::B => self.tile.b_elems(),
            MatrixId::Bias => self.tile.mt,
            MatrixId::C => self.tile.c_elems(),
        }
    }

    /// Length of the dense host-side slice for the given matrix.
    ///
    /// The bias is a single length-`M` vector even though every node of a row
    /// band holds a copy of its slice.
    pub fn input_len(&self, matrix: MatrixId) -> usize {
        match matrix {
            MatrixId::Bias => self.grid.rows * self.tile.mt,
            _ => self.node_elems(matrix) * self.grid.node_count(),
        }
    }

    /// Dense host-side dims `(rows, cols)` of the given matrix, for a square
    /// grid.
    pub fn host_dims(&self, matrix: MatrixId) -> (usize, usize) {
        let p = self.grid.rows;
        match matrix {
            MatrixId::A => (p * self.tile.mt, p * self.tile.kt),
            MatrixId::B => (p * self.tile.kt, p * self.tile.nt),
            MatrixId::Bias => (p * self.tile.mt, 1),
            MatrixId::C => (p * self.tile.mt, p * self.tile.nt),
        }
    }

    /// Words that streaming the given matrix moves over the host link.
    ///
    /// For the bias this exceeds [Self::input_len] because each slice lands
    /// on every node of its row band.
    pub fn streamed_words(&self, matrix: MatrixId) -> usize {
        self.node_elems(matrix) * self.grid.node_count()
    }

    /// Resident bytes per node: home tiles, the C accumulator, the bias
    /// slice, and one receive slot per parity class for each operand.
    pub fn footprint_bytes(&self, parity_classes: usize) -> usize {
        let elems = self.tile.a_elems()
            + self.tile.b_elems()
            + self.tile.c_elems()
            + self.tile.mt
            + parity_classes * (self.tile.a_elems() + self.tile.b_elems());
        elems * core::mem::size_of::<f32>()
    }
}

impl core::fmt::Display for GridDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{} grid, tiles {}, {} channels",
            self.grid, self.tile, self.channel_count
        )
    }
}
