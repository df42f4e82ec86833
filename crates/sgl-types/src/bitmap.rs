//! One bit per subgrid cell.

use serde::{Deserialize, Serialize};

use crate::SUBGRID_DIMENSION;

/// 32×32 bitmap; word `x` holds the column, bit `y` the row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubGridBitmap {
    columns: [u32; SUBGRID_DIMENSION],
}

impl SubGridBitmap {
    pub const EMPTY: Self = Self {
        columns: [0; SUBGRID_DIMENSION],
    };

    #[must_use]
    pub const fn from_columns(columns: [u32; SUBGRID_DIMENSION]) -> Self {
        Self { columns }
    }

    #[must_use]
    pub const fn columns(&self) -> &[u32; SUBGRID_DIMENSION] {
        &self.columns
    }

    /// Read the bit for `(x, y)`. Both must be below 32.
    #[must_use]
    pub const fn get(&self, x: usize, y: usize) -> bool {
        self.columns[x] & (1 << y) != 0
    }

    pub fn set(&mut self, x: usize, y: usize) {
        self.columns[x] |= 1 << y;
    }

    pub fn clear(&mut self, x: usize, y: usize) {
        self.columns[x] &= !(1 << y);
    }

    pub fn assign(&mut self, x: usize, y: usize, value: bool) {
        if value {
            self.set(x, y);
        } else {
            self.clear(x, y);
        }
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.columns.iter().map(|column| column.count_ones()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.iter().all(|&column| column == 0)
    }

    /// Set cells in column-major order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.columns.iter().enumerate().flat_map(|(x, &column)| {
            (0..SUBGRID_DIMENSION).filter_map(move |y| (column & (1 << y) != 0).then_some((x, y)))
        })
    }
}
