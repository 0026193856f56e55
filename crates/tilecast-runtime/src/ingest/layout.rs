use crate::grid::{GridDescriptor, MatrixId, NodeId};

fn block_dims(desc: &GridDescriptor, matrix: MatrixId) -> (usize, usize) {
    let tile = desc.tile;
    match matrix {
        MatrixId::A => (tile.mt, tile.kt),
        MatrixId::B => (tile.kt, tile.nt),
        MatrixId::C => (tile.mt, tile.nt),
        MatrixId::Bias => panic!("the bias column has its own layout"),
    }
}

/// Splits a row-major host matrix into per-node tile payloads, nodes in
/// row-major order.
///
/// Block `(r, c)` of the host matrix lands on node `(r, c)`. The bias
/// column is banded by node row instead: every node of row `r` receives
/// the same `mt` elements, so the epilogue needs no extra traffic.
pub fn scatter(desc: &GridDescriptor, matrix: MatrixId, data: &[f32]) -> Vec<Vec<f32>> {
    debug_assert_eq!(data.len(), desc.input_len(matrix));
    let grid = desc.grid;
    if matrix == MatrixId::Bias {
        let mt = desc.tile.mt;
        return grid
            .nodes()
            .map(|node| data[node.row * mt..(node.row + 1) * mt].to_vec())
            .collect();
    }
    let (rows, cols) = block_dims(desc, matrix);
    let host_cols = grid.cols * cols;
    grid.nodes()
        .map(|node| {
            let mut tile = Vec::with_capacity(rows * cols);
            for i in 0..rows {
                let start = (node.row * rows + i) * host_cols + node.col * cols;
                tile.extend_from_slice(&data[start..start + cols]);
            }
            tile
        })
        .collect()
}

/// Reassembles a host matrix from per-node tiles, the inverse of
/// [`scatter`]. Tiles come in node row-major order.
///
/// For the bias column the replicas are collapsed: only the first column
/// of nodes contributes.
pub fn gather(desc: &GridDescriptor, matrix: MatrixId, tiles: &[&[f32]]) -> Vec<f32> {
    let grid = desc.grid;
    debug_assert_eq!(tiles.len(), grid.node_count());
    if matrix == MatrixId::Bias {
        let mt = desc.tile.mt;
        let mut out = vec![0.0; grid.rows * mt];
        for row in 0..grid.rows {
            let tile = tiles[NodeId::new(row, 0).flat(grid)];
            out[row * mt..(row + 1) * mt].copy_from_slice(&tile[..mt]);
        }
        return out;
    }
    let (rows, cols) = block_dims(desc, matrix);
    let host_cols = grid.cols * cols;
    let mut out = vec![0.0; grid.rows * rows * host_cols];
    for node in grid.nodes() {
        let tile = tiles[node.flat(grid)];
        for i in 0..rows {
            let start = (node.row * rows + i) * host_cols + node.col * cols;
            out[start..start + cols].copy_from_slice(&tile[i * cols..(i + 1) * cols]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridDescriptor;

    #[test]
    fn scatter_blocks_a_host_matrix() {
        // A is 4x2 over a 2x2 grid of 2x1 tiles:
        //
        //   0 1        node (0,0): [0, 2]   node (0,1): [1, 3]
        //   2 3   ->   node (1,0): [4, 6]   node (1,1): [5, 7]
        //   4 5
        //   6 7
        let desc = GridDescriptor::square(2, 2, 1, 1);
        let data: Vec<f32> = (0..8).map(|v| v as f32).collect();
        let tiles = scatter(&desc, MatrixId::A, &data);
        assert_eq!(tiles.len(), 4);
        assert_eq!(tiles[0], vec![0.0, 2.0]);
        assert_eq!(tiles[1], vec![1.0, 3.0]);
        assert_eq!(tiles[2], vec![4.0, 6.0]);
        assert_eq!(tiles[3], vec![5.0, 7.0]);
    }

    #[test]
    fn gather_inverts_scatter() {
        let desc = GridDescriptor::square(2, 2, 3, 2);
        let data: Vec<f32> = (0..desc.input_len(MatrixId::B)).map(|v| v as f32).collect();
        let tiles = scatter(&desc, MatrixId::B, &data);
        let views: Vec<&[f32]> = tiles.iter().map(|t| t.as_slice()).collect();
        assert_eq!(gather(&desc, MatrixId::B, &views), data);
    }

    #[test]
    fn bias_bands_replicate_across_a_row() {
        let desc = GridDescriptor::square(2, 3, 1, 1);
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let tiles = scatter(&desc, MatrixId::Bias, &data);
        assert_eq!(tiles[0], vec![1.0, 2.0, 3.0]);
        assert_eq!(tiles[1], vec![1.0, 2.0, 3.0]);
        assert_eq!(tiles[2], vec![4.0, 5.0, 6.0]);
        assert_eq!(tiles[3], vec![4.0, 5.0, 6.0]);

        let views: Vec<&[f32]> = tiles.iter().map(|t| t.as_slice()).collect();
        assert_eq!(gather(&desc, MatrixId::Bias, &views), data);
    }
}
