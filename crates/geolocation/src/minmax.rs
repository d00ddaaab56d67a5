//! The min/max KD-tree pyramid over a DEM tile (Duvenhage's augmentation).
//!
//! Level 0 is the whole tile (a single block); each deeper level halves the
//! block count along whichever axis (rows or columns) currently spans the
//! larger extent, alternating as needed, until the deepest level has one
//! block per base-grid cell. The halving direction at each transition is
//! recorded so callers can enumerate which grid lines a path crosses between
//! two cells (`get_crossed_boundary_rows` / `_columns`).
use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::tile::Tile;

#[derive(Debug, Clone, Copy)]
struct LevelShape {
    rows: usize,
    cols: usize,
}

/// A `Tile` augmented with a min/max pyramid for Duvenhage-style traversal pruning.
#[derive(Debug)]
pub struct MinMaxTile {
    tile: Tile,
    shapes: Vec<LevelShape>,
    /// `level_axis_idx[l] = (ri, ci)`: position into the row/column coarsening
    /// sequences reached by level `l`.
    level_axis_idx: Vec<(usize, usize)>,
    /// `column_merging[l]`: whether the transition from level `l` to `l+1` splits
    /// along columns (`true`) or rows (`false`).
    column_merging: Vec<bool>,
    /// `row_block_index[ri][i]`: block row index of finest-grid row `i` at the
    /// row-coarsening step `ri`.
    row_block_index: Vec<Vec<usize>>,
    col_block_index: Vec<Vec<usize>>,
    mins: Vec<Vec<f64>>,
    maxs: Vec<Vec<f64>>,
}

/// Coarse-to-fine block counts for one axis: `seq[0] == 1`, `seq.last() == n`,
/// and `seq[k] == ceil(seq[k+1] / 2)` for every step — which makes the child-to-parent
/// block mapping `parent_index = child_index / 2` exact at every transition.
fn coarsening_sequence(n: usize) -> Vec<usize> {
    let mut seq = vec![n];
    let mut cur = n;
    while cur > 1 {
        cur = cur.div_ceil(2);
        seq.push(cur);
    }
    seq.reverse();
    seq
}

fn block_index_tables(seq: &[usize], n: usize) -> Vec<Vec<usize>> {
    let mut tables = vec![Vec::new(); seq.len()];
    let finest = seq.len() - 1;
    tables[finest] = (0..n).collect();
    for k in (0..finest).rev() {
        tables[k] = tables[k + 1].iter().map(|&idx| idx / 2).collect();
    }
    tables
}

impl MinMaxTile {
    pub fn build(tile: Tile) -> Result<Self> {
        if !tile.is_completed() {
            return Err(Error::Internal("MinMaxTile::build called on an incomplete tile".into()));
        }

        let n_rows = tile.n_lat_rows();
        let n_cols = tile.n_lon_cols();
        let row_seq = coarsening_sequence(n_rows);
        let col_seq = coarsening_sequence(n_cols);
        let row_block_index = block_index_tables(&row_seq, n_rows);
        let col_block_index = block_index_tables(&col_seq, n_cols);

        let mut shapes = vec![LevelShape {
            rows: row_seq[0],
            cols: col_seq[0],
        }];
        let mut level_axis_idx = vec![(0usize, 0usize)];
        let mut column_merging = Vec::new();

        let (mut ri, mut ci) = (0usize, 0usize);
        while ri < row_seq.len() - 1 || ci < col_seq.len() - 1 {
            let row_extent = (n_rows as f64 / row_seq[ri] as f64).ceil();
            let col_extent = (n_cols as f64 / col_seq[ci] as f64).ceil();
            let advance_col = if ri >= row_seq.len() - 1 {
                true
            } else if ci >= col_seq.len() - 1 {
                false
            } else {
                col_extent >= row_extent
            };

            if advance_col {
                ci += 1;
                column_merging.push(true);
            } else {
                ri += 1;
                column_merging.push(false);
            }
            shapes.push(LevelShape {
                rows: row_seq[ri],
                cols: col_seq[ci],
            });
            level_axis_idx.push((ri, ci));
        }

        let n_levels = shapes.len();
        let mut mins = vec![Vec::new(); n_levels];
        let mut maxs = vec![Vec::new(); n_levels];

        let finest = n_levels - 1;
        let shape = shapes[finest];
        debug_assert_eq!(shape.rows, n_rows);
        debug_assert_eq!(shape.cols, n_cols);
        let mut fmin = vec![0.0; n_rows * n_cols];
        let mut fmax = vec![0.0; n_rows * n_cols];
        for i in 0..n_rows {
            for j in 0..n_cols {
                let h = tile.elevation(i, j);
                fmin[i * n_cols + j] = h;
                fmax[i * n_cols + j] = h;
            }
        }
        mins[finest] = fmin;
        maxs[finest] = fmax;

        for l in (0..finest).rev() {
            let parent_shape = shapes[l];
            let child_shape = shapes[l + 1];
            let mut pmin = vec![f64::INFINITY; parent_shape.rows * parent_shape.cols];
            let mut pmax = vec![f64::NEG_INFINITY; parent_shape.rows * parent_shape.cols];
            let merging_cols = column_merging[l];

            for ci in 0..child_shape.rows {
                for cj in 0..child_shape.cols {
                    let (pi, pj) = if merging_cols { (ci, cj / 2) } else { (ci / 2, cj) };
                    let child_idx = ci * child_shape.cols + cj;
                    let parent_idx = pi * parent_shape.cols + pj;
                    pmin[parent_idx] = pmin[parent_idx].min(mins[l + 1][child_idx]);
                    pmax[parent_idx] = pmax[parent_idx].max(maxs[l + 1][child_idx]);
                }
            }
            mins[l] = pmin;
            maxs[l] = pmax;
        }

        Ok(MinMaxTile {
            tile,
            shapes,
            level_axis_idx,
            column_merging,
            row_block_index,
            col_block_index,
            mins,
            maxs,
        })
    }

    pub fn tile(&self) -> &Tile {
        &self.tile
    }

    pub fn max_level(&self) -> usize {
        self.shapes.len() - 1
    }

    pub fn is_column_merging(&self, level: usize) -> bool {
        self.column_merging[level]
    }

    fn block_of(&self, i: usize, j: usize, level: usize) -> (usize, usize) {
        let (ri, ci) = self.level_axis_idx[level];
        (self.row_block_index[ri][i], self.col_block_index[ci][j])
    }

    pub fn max_elevation(&self, i: usize, j: usize, level: usize) -> f64 {
        let (bi, bj) = self.block_of(i, j, level);
        self.maxs[level][bi * self.shapes[level].cols + bj]
    }

    pub fn min_elevation(&self, i: usize, j: usize, level: usize) -> f64 {
        let (bi, bj) = self.block_of(i, j, level);
        self.mins[level][bi * self.shapes[level].cols + bj]
    }

    /// Deepest level at which cells `(i0,j0)` and `(i1,j1)` fall in the same block,
    /// or `-1` if they never share a block (which, for a valid tile, only happens
    /// when an index is out of range).
    pub fn get_merge_level(&self, i0: usize, j0: usize, i1: usize, j1: usize) -> i64 {
        for level in (0..self.shapes.len()).rev() {
            let (bi0, bj0) = self.block_of(i0, j0, level);
            let (bi1, bj1) = self.block_of(i1, j1, level);
            if bi0 == bi1 && bj0 == bj1 {
                return level as i64;
            }
        }
        -1
    }

    /// Row grid-line indices of the sub-tile boundary, at `level+1`, crossed between
    /// cells `a` and `b`. Empty when the split at `level+1` is along columns, or
    /// when `a`/`b` already share their level-`level+1` block.
    pub fn get_crossed_boundary_rows(&self, a: (usize, usize), b: (usize, usize), level: usize) -> SmallVec<[usize; 2]> {
        let mut result = SmallVec::new();
        if level + 1 > self.max_level() || self.column_merging[level] {
            return result;
        }
        let (ri, _) = self.level_axis_idx[level + 1];
        let block_a = self.row_block_index[ri][a.0];
        let block_b = self.row_block_index[ri][b.0];
        if block_a == block_b {
            return result;
        }
        let upper = block_a.max(block_b);
        if let Some(boundary_row) = (0..self.tile.n_lat_rows()).find(|&i| self.row_block_index[ri][i] == upper) {
            result.push(boundary_row);
        }
        result
    }

    /// Column grid-line indices of the sub-tile boundary, at `level+1`, crossed
    /// between cells `a` and `b`.
    pub fn get_crossed_boundary_columns(&self, a: (usize, usize), b: (usize, usize), level: usize) -> SmallVec<[usize; 2]> {
        let mut result = SmallVec::new();
        if level + 1 > self.max_level() || !self.column_merging[level] {
            return result;
        }
        let (_, ci) = self.level_axis_idx[level + 1];
        let block_a = self.col_block_index[ci][a.1];
        let block_b = self.col_block_index[ci][b.1];
        if block_a == block_b {
            return result;
        }
        let upper = block_a.max(block_b);
        if let Some(boundary_col) = (0..self.tile.n_lon_cols()).find(|&j| self.col_block_index[ci][j] == upper) {
            result.push(boundary_col);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkerboard(rows: usize, cols: usize) -> Tile {
        let mut t = Tile::new();
        t.set_geometry(0.0, 0.0, 1.0, 1.0, rows, cols).unwrap();
        for i in 0..rows {
            for j in 0..cols {
                let h = if (i + j) % 2 == 0 { 10.0 } else { 20.0 };
                t.set_elevation(i, j, h).unwrap();
            }
        }
        t.tile_update_completed().unwrap();
        t
    }

    #[test]
    fn root_level_spans_whole_tile() {
        let tile = checkerboard(11, 11);
        let minmax = MinMaxTile::build(tile).unwrap();
        assert_eq!(minmax.min_elevation(0, 0, 0), 10.0);
        assert_eq!(minmax.max_elevation(0, 0, 0), 20.0);
    }

    #[test]
    fn finest_level_matches_base_cells() {
        let tile = checkerboard(9, 13);
        let minmax = MinMaxTile::build(tile).unwrap();
        let finest = minmax.max_level();
        for i in 0..9 {
            for j in 0..13 {
                let h = if (i + j) % 2 == 0 { 10.0 } else { 20.0 };
                assert_eq!(minmax.min_elevation(i, j, finest), h);
                assert_eq!(minmax.max_elevation(i, j, finest), h);
            }
        }
    }

    #[test]
    fn nested_levels_bound_each_other() {
        let tile = checkerboard(17, 5);
        let minmax = MinMaxTile::build(tile).unwrap();
        for level in 0..minmax.max_level() {
            for i in 0..17 {
                for j in 0..5 {
                    let inner_min = minmax.min_elevation(i, j, level + 1);
                    let inner_max = minmax.max_elevation(i, j, level + 1);
                    let outer_min = minmax.min_elevation(i, j, level);
                    let outer_max = minmax.max_elevation(i, j, level);
                    assert!(outer_min <= inner_min);
                    assert!(outer_max >= inner_max);
                }
            }
        }
    }

    #[test]
    fn merge_level_of_identical_cell_is_finest() {
        let tile = checkerboard(8, 8);
        let minmax = MinMaxTile::build(tile).unwrap();
        assert_eq!(minmax.get_merge_level(3, 3, 3, 3), minmax.max_level() as i64);
    }

    #[test]
    fn crossed_boundary_is_between_the_two_cells() {
        let tile = checkerboard(8, 8);
        let minmax = MinMaxTile::build(tile).unwrap();
        let level = minmax.get_merge_level(0, 0, 0, 7);
        assert!(level >= 0);
        let cols = minmax.get_crossed_boundary_columns((0, 0), (0, 7), level as usize);
        let rows = minmax.get_crossed_boundary_rows((0, 0), (0, 7), level as usize);
        assert!(!cols.is_empty() || !rows.is_empty());
        for &c in &cols {
            assert!(c > 0 && c < 8);
        }
    }
}
