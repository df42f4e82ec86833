//! Core type definitions for subgrid leaf storage.
//!
//! Everything here is plain data: cell passes and their null sentinels, the
//! tick-based [`Timestamp`], the 32×32 [`SubGridBitmap`], and the small ids
//! that address persisted granules.

pub mod bitmap;
pub mod cell_pass;
pub mod flags;
pub mod grid_data_type;
pub mod ids;
pub mod time;

pub use bitmap::SubGridBitmap;
pub use cell_pass::{
    CellPass, GpsMode, MachineId, NULL_AMPLITUDE, NULL_CCA, NULL_CCV, NULL_FREQUENCY,
    NULL_HEIGHT, NULL_MACHINE_SPEED, NULL_MATERIAL_TEMPERATURE, NULL_MDP, NULL_RADIO_LATENCY,
    NULL_RMV, PassType,
};
pub use flags::StreamFlags;
pub use grid_data_type::GridDataType;
pub use ids::{DatasetId, GranuleRef};
pub use time::Timestamp;

use sgl_error::{Result, SubgridError};

/// Number of cells along each side of a subgrid.
pub const SUBGRID_DIMENSION: usize = 32;
/// Number of cells in a subgrid.
pub const SUBGRID_CELL_COUNT: usize = SUBGRID_DIMENSION * SUBGRID_DIMENSION;

/// Validate a cell coordinate pair inside a subgrid.
pub fn check_cell(x: usize, y: usize) -> Result<()> {
    if x >= SUBGRID_DIMENSION {
        return Err(SubgridError::out_of_range("cell x", x));
    }
    if y >= SUBGRID_DIMENSION {
        return Err(SubgridError::out_of_range("cell y", y));
    }
    Ok(())
}

/// Iterate every `(x, y)` cell of a subgrid in column-major order.
///
/// This is the order the compressed codec flattens cells in and the order
/// persisted latest-value records are written in.
pub fn cells_column_major() -> impl Iterator<Item = (usize, usize)> {
    (0..SUBGRID_DIMENSION).flat_map(|x| (0..SUBGRID_DIMENSION).map(move |y| (x, y)))
}
