//! Execution substrates for elementwise kernels over a `(batch, state_size)` grid.
//!
//! A kernel is a function `(row, column) -> [T; K]` producing `K` values for
//! one position; each value lands in the matching position of one of `K`
//! row-major `(batch, state_size)` output buffers. Two strategies run it:
//!
//! - [`Strategy::Sequential`] walks positions in row-major order on the
//!   calling thread.
//! - [`Strategy::Parallel`] partitions the index space into
//!   `ceil(state_size / tile_width)` column tiles times `batch` rows. Every
//!   `(row, tile)` block is an independent rayon task writing to its own
//!   disjoint slices of the outputs; lanes past `state_size` are masked.
//!   The launch returns once every block has finished.
//!
//! Both strategies call the same kernel for every position, so their results
//! are bit-identical.

use rayon::prelude::*;
use tracing::trace;

use crate::tensor::Device;

/// How a kernel invocation is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Sequential,
    Parallel,
}

impl Strategy {
    /// Host tensors run sequentially, accelerator tensors on the grid.
    #[must_use]
    pub const fn for_device(device: Device) -> Self {
        match device {
            Device::Host => Self::Sequential,
            Device::Accelerator => Self::Parallel,
        }
    }
}

/// Shape of a parallel launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    /// Column tiles per row.
    pub tiles: usize,
    /// One row of blocks per batch element.
    pub rows: usize,
    pub tile_width: usize,
}

impl Grid {
    /// # Panics
    /// Panics if `tile_width` is zero.
    #[must_use]
    pub fn new(batch: usize, state_size: usize, tile_width: usize) -> Self {
        assert!(tile_width > 0, "tile width must be at least 1");
        Self {
            tiles: state_size.div_ceil(tile_width),
            rows: batch,
            tile_width,
        }
    }

    #[must_use]
    pub const fn blocks(&self) -> usize {
        self.tiles * self.rows
    }
}

/// One block of the grid with its slices of every output.
struct Block<'a, T, const K: usize> {
    row: usize,
    tile: usize,
    lanes: [&'a mut [T]; K],
}

/// Runs `kernel` over every `(row, column)` of a `batch × state_size` grid.
///
/// # Panics
/// Panics if an output buffer does not hold `batch * state_size` elements,
/// or if `tile_width` is zero on the parallel strategy.
pub fn launch<T, const K: usize, F>(
    op: &'static str,
    strategy: Strategy,
    tile_width: usize,
    batch: usize,
    state_size: usize,
    outputs: [&mut [T]; K],
    kernel: F,
) where
    T: Send,
    F: Fn(usize, usize) -> [T; K] + Sync,
{
    for out in &outputs {
        assert_eq!(out.len(), batch * state_size, "{op}: output buffer has the wrong length");
    }
    match strategy {
        Strategy::Sequential => {
            trace!(op, batch, state_size, "sequential launch");
            run_sequential(batch, state_size, outputs, &kernel);
        }
        Strategy::Parallel => {
            let grid = Grid::new(batch, state_size, tile_width);
            trace!(op, rows = grid.rows, tiles = grid.tiles, tile_width, "grid launch");
            run_grid(grid, state_size, outputs, &kernel);
        }
    }
}

fn run_sequential<T, const K: usize, F>(
    batch: usize,
    state_size: usize,
    mut outputs: [&mut [T]; K],
    kernel: &F,
) where
    F: Fn(usize, usize) -> [T; K],
{
    for row in 0..batch {
        for column in 0..state_size {
            let position = row * state_size + column;
            for (out, value) in outputs.iter_mut().zip(kernel(row, column)) {
                out[position] = value;
            }
        }
    }
}

fn run_grid<T, const K: usize, F>(grid: Grid, state_size: usize, outputs: [&mut [T]; K], kernel: &F)
where
    T: Send,
    F: Fn(usize, usize) -> [T; K] + Sync,
{
    // carve the outputs into per-block slices in row-major block order
    let mut rest = outputs;
    let mut blocks = Vec::with_capacity(grid.blocks());
    for row in 0..grid.rows {
        for tile in 0..grid.tiles {
            let width = grid.tile_width.min(state_size - tile * grid.tile_width);
            blocks.push(Block {
                row,
                tile,
                lanes: split_front(&mut rest, width),
            });
        }
    }

    blocks.into_par_iter().for_each(|mut block| {
        let base = block.tile * grid.tile_width;
        for lane in 0..grid.tile_width {
            let column = base + lane;
            if column >= state_size {
                break;
            }
            for (out, value) in block.lanes.iter_mut().zip(kernel(block.row, column)) {
                out[lane] = value;
            }
        }
    });
}

/// Detaches the first `len` elements of every buffer.
fn split_front<'a, T, const K: usize>(rest: &mut [&'a mut [T]; K], len: usize) -> [&'a mut [T]; K] {
    core::array::from_fn(|k| {
        let (head, tail) = core::mem::take(&mut rest[k]).split_at_mut(len);
        rest[k] = tail;
        head
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(strategy: Strategy, tile_width: usize, batch: usize, state: usize) -> [Vec<usize>; 2] {
        let mut a = vec![0; batch * state];
        let mut b = vec![0; batch * state];
        launch("test", strategy, tile_width, batch, state, [&mut a[..], &mut b[..]], |n, c| {
            [n * 1000 + c, c]
        });
        [a, b]
    }

    #[test]
    fn grid_covers_every_position_once() {
        let expected = run(Strategy::Sequential, 1, 3, 7);
        for tile_width in [1, 2, 3, 7, 8, 1024] {
            assert_eq!(run(Strategy::Parallel, tile_width, 3, 7), expected, "tile {tile_width}");
        }
        assert_eq!(expected[0][7 + 3], 1003);
    }

    #[test]
    fn grid_masks_the_last_tile() {
        let grid = Grid::new(2, 5, 4);
        assert_eq!(grid.tiles, 2);
        assert_eq!(grid.blocks(), 4);
    }

    #[test]
    fn empty_grids_launch_nothing() {
        assert_eq!(run(Strategy::Parallel, 4, 0, 5), [vec![], vec![]]);
        assert_eq!(run(Strategy::Parallel, 4, 3, 0), [vec![], vec![]]);
        assert_eq!(run(Strategy::Sequential, 4, 3, 0), [vec![], vec![]]);
    }
}
