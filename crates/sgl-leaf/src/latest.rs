//! Latest known value per cell, with null-skip over the pass history.
//!
//! For every cell the summary holds one [`CellPass`] whose `time`,
//! `machine_id` and `machine_speed` come from the chronologically last pass,
//! whose `height` and `radio_latency` come from the last pass when it has
//! them, and whose eight [`GridDataType`] attributes each come from the most
//! recent pass where that attribute is not null. A per-attribute bitmap
//! records whether that pass was the last one.
//!
//! Summaries are computed per segment and seeded with the summary of the
//! preceding segment, so the last segment's summary describes the whole
//! history.

use std::borrow::Cow;

use sgl_codec::wire::{append_u32_le, read_u32_le};
use sgl_codec::{CELL_PASS_RECORD_BYTES, read_cell_pass, write_cell_pass};
use sgl_error::{Result, SubgridError};
use sgl_types::{
    CellPass, GridDataType, SUBGRID_CELL_COUNT, SUBGRID_DIMENSION, SubGridBitmap,
    cells_column_major,
};

const ATTRIBUTE_COUNT: usize = GridDataType::ALL.len();

/// One cell's latest values and where they came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatestCell {
    pub pass: CellPass,
    from_last_pass: [bool; ATTRIBUTE_COUNT],
}

impl LatestCell {
    /// Whether `kind` was read from the cell's last pass.
    #[must_use]
    pub const fn from_last_pass(&self, kind: GridDataType) -> bool {
        self.from_last_pass[kind.index()]
    }
}

/// Compute one cell's latest values from its time-ordered `stack`, starting
/// from `inherited`.
///
/// Attributes the stack never supplies keep their inherited value with the
/// from-last-pass flag cleared.
pub fn compute_latest_for_cell(stack: &[CellPass], inherited: &CellPass) -> Result<LatestCell> {
    let last = stack
        .last()
        .ok_or_else(|| SubgridError::invariant("latest value requested for an empty pass stack"))?;
    let last_index = stack.len() - 1;

    let mut latest = *inherited;
    let mut from_last_pass = [false; ATTRIBUTE_COUNT];
    latest.time = last.time;
    latest.machine_id = last.machine_id;
    latest.machine_speed = last.machine_speed;
    if last.has_height() {
        latest.height = last.height;
    }
    if last.has_radio_latency() {
        latest.radio_latency = last.radio_latency;
    }

    let mut gps_supplied = false;
    for kind in GridDataType::ALL {
        let supplier = stack
            .iter()
            .enumerate()
            .rev()
            .find(|(_, pass)| !pass.is_null(kind));
        if let Some((index, pass)) = supplier {
            latest.copy_attribute(kind, pass);
            from_last_pass[kind.index()] = index == last_index;
            gps_supplied |= kind == GridDataType::GpsMode;
        }
    }
    if !gps_supplied {
        latest.half_pass = last.half_pass;
        latest.pass_type = last.pass_type;
    }

    Ok(LatestCell {
        pass: latest,
        from_last_pass,
    })
}

/// Latest values for all 1024 cells of a segment or of the whole leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct LatestValueSummary {
    cells: Vec<CellPass>,
    existence: SubGridBitmap,
    from_last_pass: [SubGridBitmap; ATTRIBUTE_COUNT],
}

impl Default for LatestValueSummary {
    fn default() -> Self {
        Self::new()
    }
}

impl LatestValueSummary {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cells: vec![CellPass::NULL; SUBGRID_CELL_COUNT],
            existence: SubGridBitmap::EMPTY,
            from_last_pass: [SubGridBitmap::EMPTY; ATTRIBUTE_COUNT],
        }
    }

    #[must_use]
    pub const fn existence(&self) -> &SubGridBitmap {
        &self.existence
    }

    #[must_use]
    pub const fn from_last_pass_map(&self, kind: GridDataType) -> &SubGridBitmap {
        &self.from_last_pass[kind.index()]
    }

    #[must_use]
    pub fn exists(&self, x: usize, y: usize) -> bool {
        self.existence.get(x, y)
    }

    /// Latest entry for `(x, y)`, or `None` when no pass has touched it.
    #[must_use]
    pub fn cell(&self, x: usize, y: usize) -> Option<LatestCell> {
        if !self.exists(x, y) {
            return None;
        }
        let mut from_last_pass = [false; ATTRIBUTE_COUNT];
        for (flag, map) in from_last_pass.iter_mut().zip(&self.from_last_pass) {
            *flag = map.get(x, y);
        }
        Some(LatestCell {
            pass: self.cells[x * SUBGRID_DIMENSION + y],
            from_last_pass,
        })
    }

    fn store(&mut self, x: usize, y: usize, cell: &LatestCell) {
        self.cells[x * SUBGRID_DIMENSION + y] = cell.pass;
        self.existence.set(x, y);
        for (map, &flag) in self.from_last_pass.iter_mut().zip(&cell.from_last_pass) {
            map.assign(x, y, flag);
        }
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Fold one segment's pass stacks onto `seed`.
    ///
    /// Cells without passes inherit the seed entry unchanged; cells with
    /// passes are recomputed from the seed value.
    pub fn compute_for_segment<'a, F>(mut stack_for: F, seed: Option<&Self>) -> Result<Self>
    where
        F: FnMut(usize, usize) -> Result<Cow<'a, [CellPass]>>,
    {
        let mut summary = Self::new();
        for (x, y) in cells_column_major() {
            let inherited = seed.and_then(|seed| seed.cell(x, y));
            let stack = stack_for(x, y)?;
            if stack.is_empty() {
                if let Some(inherited) = inherited {
                    summary.store(x, y, &inherited);
                }
                continue;
            }
            let base = inherited.map_or(CellPass::NULL, |cell| cell.pass);
            let cell = compute_latest_for_cell(&stack, &base)?;
            summary.store(x, y, &cell);
        }
        Ok(summary)
    }

    /// Bytes [`LatestValueSummary::write_to`] appends.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        (1 + ATTRIBUTE_COUNT) * SUBGRID_DIMENSION * 4
            + self.existence.count() as usize * CELL_PASS_RECORD_BYTES
    }

    /// `existence | 8 × from-last-pass | one pass record per existing cell,
    /// column-major`. Bitmaps are 32 little-endian `u32` columns.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        for map in std::iter::once(&self.existence).chain(&self.from_last_pass) {
            for &column in map.columns() {
                append_u32_le(buf, column);
            }
        }
        for (x, y) in self.existence.iter() {
            write_cell_pass(buf, &self.cells[x * SUBGRID_DIMENSION + y]);
        }
    }

    pub fn read_from(bytes: &[u8], cursor: &mut usize) -> Result<Self> {
        let mut read_map = |field: &str| -> Result<SubGridBitmap> {
            let mut columns = [0_u32; SUBGRID_DIMENSION];
            for column in &mut columns {
                *column = read_u32_le(bytes, cursor, field)?;
            }
            Ok(SubGridBitmap::from_columns(columns))
        };
        let existence = read_map("latest_existence")?;
        let mut from_last_pass = [SubGridBitmap::EMPTY; ATTRIBUTE_COUNT];
        for map in &mut from_last_pass {
            *map = read_map("latest_from_last_pass")?;
        }

        let mut summary = Self {
            cells: vec![CellPass::NULL; SUBGRID_CELL_COUNT],
            existence,
            from_last_pass,
        };
        for (x, y) in existence.iter() {
            summary.cells[x * SUBGRID_DIMENSION + y] = read_cell_pass(bytes, cursor)?;
        }
        Ok(summary)
    }
}
