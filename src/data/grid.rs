use std::ops::{Index, IndexMut};

use crate::{data::motion::MotionVector, refs::RefType};

pub const BLOCK_SIZE_LOG2: usize = 2;
/// Edge of one coded block in output pixels.
pub const BLOCK_SIZE: usize = 1 << BLOCK_SIZE_LOG2;

/// Row-major 2-D array, indexed `grid[row][col]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Grid<T> {
    cells: Box<[T]>,
    /// Number of columns
    pub cols: usize,
    /// Number of rows
    pub rows: usize,
}

/// One motion vector per coded block.
pub type BlockMotionGrid = Grid<MotionVector>;
/// One reference slot per coded block.
pub type ProvenanceMap = Grid<RefType>;
/// One motion vector per output pixel.
pub type MotionField = Grid<MotionVector>;

impl<T: Copy + Default> Grid<T> {
    /// A grid filled with `T::default()`.
    #[inline]
    pub fn new(cols: usize, rows: usize) -> Self {
        Self::filled(cols, rows, T::default())
    }

    /// A grid filled with `value`.
    #[inline]
    pub fn filled(cols: usize, rows: usize, value: T) -> Self {
        Self {
            // dynamic allocation: once per frame
            cells: vec![value; cols * rows].into_boxed_slice(),
            cols,
            rows,
        }
    }
}

impl<T> Grid<T> {
    /// Wraps row-major cells.
    ///
    /// Returns `None` if `cells` does not hold exactly `cols * rows` entries.
    #[inline]
    pub fn from_cells(cols: usize, rows: usize, cells: Vec<T>) -> Option<Self> {
        (cells.len() == cols * rows).then(|| Self {
            cells: cells.into_boxed_slice(),
            cols,
            rows,
        })
    }

    /// All cells in row-major order.
    #[inline]
    pub fn cells(&self) -> &[T] {
        &self.cells
    }

    /// All cells in row-major order, mutably.
    #[inline]
    pub fn cells_mut(&mut self) -> &mut [T] {
        &mut self.cells
    }

    /// Whether both grids have the same dimensions.
    #[inline]
    pub fn same_shape<U>(&self, other: &Grid<U>) -> bool {
        self.cols == other.cols && self.rows == other.rows
    }

    /// Rows, top to bottom.
    #[inline]
    pub fn rows_iter(&self) -> impl Iterator<Item = &[T]> {
        self.cells.chunks(self.cols.max(1))
    }
}

impl<T: Copy> Grid<T> {
    /// Cell at `(row, col)` with both coordinates clamped into the grid.
    ///
    /// # Panics
    ///
    /// - If the grid is empty.
    #[inline]
    pub fn clamped(&self, row: isize, col: isize) -> T {
        let row = row.clamp(0, self.rows as isize - 1) as usize;
        let col = col.clamp(0, self.cols as isize - 1) as usize;
        self[row][col]
    }

    /// Nearest-neighbour upsample by [`BLOCK_SIZE`], cropped to
    /// `width` x `height`.
    ///
    /// Output pixel `(y, x)` takes the value of block `(y / 4, x / 4)`.
    /// The caller guarantees the crop fits inside the upsampled extent.
    #[inline]
    pub fn upsample_blocks(&self, width: usize, height: usize) -> Grid<T> {
        debug_assert!(width <= self.cols * BLOCK_SIZE);
        debug_assert!(height <= self.rows * BLOCK_SIZE);

        let cells = (0..height)
            .flat_map(|y| {
                let blocks = &self[y >> BLOCK_SIZE_LOG2];
                (0..width).map(move |x| blocks[x >> BLOCK_SIZE_LOG2])
            })
            .collect::<Vec<_>>();

        Grid {
            cells: cells.into_boxed_slice(),
            cols: width,
            rows: height,
        }
    }
}

impl<T> Index<usize> for Grid<T> {
    type Output = [T];

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.cells[index * self.cols..(index + 1) * self.cols]
    }
}

impl<T> IndexMut<usize> for Grid<T> {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.cells[index * self.cols..(index + 1) * self.cols]
    }
}
