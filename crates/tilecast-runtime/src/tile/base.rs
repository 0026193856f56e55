/// A dense row-major `f32` buffer held by one node.
///
/// Tiles are plain owned storage. Sharing across threads happens either by
/// moving the tile (staging buffers travel inside broadcast operations and
/// compute tasks) or by wrapping a sealed tile in an `Arc` once it becomes
/// immutable.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Tile {
    /// Allocates a zero-filled tile.
    pub fn zeroed(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Wraps an existing row-major buffer.
    ///
    /// # Panics
    ///
    /// Panics if `data.len() != rows * cols`.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Self {
        assert_eq!(
            data.len(),
            rows * cols,
            "tile data length {} does not match {rows}x{cols}",
            data.len()
        );
        Self { rows, cols, data }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Number of `f32` elements.
    pub fn elems(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Overwrites the whole tile from `src`.
    ///
    /// # Panics
    ///
    /// Panics if `src.len() != self.elems()`.
    pub fn copy_from_slice(&mut self, src: &[f32]) {
        self.data.copy_from_slice(src);
    }

    /// Resets every element to zero, keeping the allocation.
    pub fn fill_zero(&mut self) {
        self.data.fill(0.0);
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Element at `(row, col)`.
    pub fn at(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.cols + col]
    }
}
