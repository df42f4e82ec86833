//! Growable per-cell pass lists for a segment that still accepts passes.

use std::cmp::Ordering;

use sgl_codec::wire::{append_u32_le, read_u32_le};
use sgl_codec::{read_cell_pass, write_cell_pass};
use sgl_error::{Result, SubgridError};
use sgl_types::{
    CellPass, SUBGRID_CELL_COUNT, SUBGRID_DIMENSION, Timestamp, cells_column_major, check_cell,
};

/// What [`MutablePassStore::add_pass`] did with the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// A new pass was inserted at its time-ordered position.
    Inserted,
    /// A pass in the same second was overwritten.
    Replaced,
}

/// Passes added and replaced by a merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeCounts {
    pub added: u32,
    pub modified: u32,
}

impl MergeCounts {
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.added == 0 && self.modified == 0
    }

    pub fn accumulate(&mut self, other: Self) {
        self.added += other.added;
        self.modified += other.modified;
    }
}

const fn cell_slot(x: usize, y: usize) -> usize {
    x * SUBGRID_DIMENSION + y
}

fn by_second(pass: &CellPass, time: Timestamp) -> Ordering {
    pass.time.whole_seconds().cmp(&time.whole_seconds())
}

/// Time-ordered pass stacks for the 32×32 cells of one segment.
///
/// Every stored pass time is a whole second and at most one pass per cell
/// falls in any second.
#[derive(Debug, Clone, PartialEq)]
pub struct MutablePassStore {
    cells: Vec<Vec<CellPass>>,
    pass_count: u32,
}

impl Default for MutablePassStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MutablePassStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cells: vec![Vec::new(); SUBGRID_CELL_COUNT],
            pass_count: 0,
        }
    }

    #[must_use]
    pub const fn pass_count(&self) -> u32 {
        self.pass_count
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.pass_count == 0
    }

    /// Passes of cell `(x, y)` in time order.
    pub fn passes(&self, x: usize, y: usize) -> Result<&[CellPass]> {
        check_cell(x, y)?;
        Ok(self.cell(x, y))
    }

    /// Unchecked view for callers walking known-good coordinates.
    pub(crate) fn cell(&self, x: usize, y: usize) -> &[CellPass] {
        &self.cells[cell_slot(x, y)]
    }

    /// Binary search for the pass in the same whole second as `time`.
    ///
    /// `Ok(index)` on a hit, `Err(insertion_point)` otherwise.
    pub(crate) fn locate_time(
        &self,
        x: usize,
        y: usize,
        time: Timestamp,
    ) -> std::result::Result<usize, usize> {
        self.cell(x, y)
            .binary_search_by(|pass| by_second(pass, time))
    }

    /// Insert `pass` in time order, replacing any pass in the same second.
    ///
    /// The pass time is truncated to the second first and a non-finite
    /// height is stored as null.
    pub fn add_pass(&mut self, x: usize, y: usize, mut pass: CellPass) -> Result<AddOutcome> {
        check_cell(x, y)?;
        pass.time = pass.time.truncate_to_second();
        pass.normalize_height();
        let appends = self
            .cell(x, y)
            .last()
            .is_none_or(|last| last.time < pass.time);
        let position = if appends {
            Err(self.cell(x, y).len())
        } else {
            self.locate_time(x, y, pass.time)
        };
        let stack = &mut self.cells[cell_slot(x, y)];
        match position {
            Ok(index) => {
                stack[index] = pass;
                return Ok(AddOutcome::Replaced);
            }
            Err(index) => stack.insert(index, pass),
        }
        self.pass_count = self
            .pass_count
            .checked_add(1)
            .ok_or_else(|| SubgridError::out_of_range("segment pass count", u64::from(u32::MAX) + 1))?;
        Ok(AddOutcome::Inserted)
    }

    /// Merge an already time-ordered run of passes into cell `(x, y)`.
    ///
    /// A source pass in the same second as an existing one replaces it.
    pub fn merge_passes(&mut self, x: usize, y: usize, source: &[CellPass]) -> Result<MergeCounts> {
        check_cell(x, y)?;
        if source.is_empty() {
            return Ok(MergeCounts::default());
        }
        let slot = cell_slot(x, y);
        let existing = &self.cells[slot];
        let mut merged: Vec<CellPass> = Vec::with_capacity(existing.len() + source.len());
        let mut counts = MergeCounts::default();

        let mut theirs = source.iter().peekable();
        let mut ours = existing.iter().peekable();
        loop {
            let order = match (ours.peek(), theirs.peek()) {
                (Some(mine), Some(incoming)) => by_second(mine, incoming.time),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => break,
            };
            if order == Ordering::Less {
                merged.extend(ours.next().copied());
                continue;
            }
            if order == Ordering::Equal {
                ours.next();
                counts.modified += 1;
            } else {
                counts.added += 1;
            }
            let Some(incoming) = theirs.next() else { break };
            let mut pass = *incoming;
            pass.time = pass.time.truncate_to_second();
            pass.normalize_height();
            if merged.last().is_some_and(|prev| prev.time.same_second(pass.time)) {
                return Err(SubgridError::invariant(format!(
                    "merge source for cell ({x}, {y}) is not strictly time ordered at {}",
                    pass.time
                )));
            }
            merged.push(pass);
        }

        self.cells[slot] = merged;
        self.pass_count = self
            .pass_count
            .checked_add(counts.added)
            .ok_or_else(|| SubgridError::out_of_range("segment pass count", "overflow"))?;
        Ok(counts)
    }

    /// Move every pass at or after `split` into a new store.
    pub fn split_off(&mut self, split: Timestamp) -> Self {
        let mut upper = Self::new();
        for (slot, stack) in self.cells.iter_mut().enumerate() {
            let at = stack.partition_point(|pass| pass.time < split);
            let moved = stack.split_off(at);
            let moved_count = moved.len() as u32;
            upper.cells[slot] = moved;
            upper.pass_count += moved_count;
            self.pass_count -= moved_count;
        }
        upper
    }

    /// Every stored pass time, unordered across cells.
    pub fn pass_times(&self) -> impl Iterator<Item = Timestamp> + '_ {
        self.cells.iter().flatten().map(|pass| pass.time)
    }

    /// Body layout: `1024 × count u32` column-major, then every pass record
    /// in the same order.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        for (x, y) in cells_column_major() {
            append_u32_le(buf, self.cell(x, y).len() as u32);
        }
        for (x, y) in cells_column_major() {
            for pass in self.cell(x, y) {
                write_cell_pass(buf, pass);
            }
        }
    }

    pub fn read_from(bytes: &[u8], cursor: &mut usize) -> Result<Self> {
        let mut counts = Vec::with_capacity(SUBGRID_CELL_COUNT);
        let mut total = 0_u64;
        for _ in 0..SUBGRID_CELL_COUNT {
            let count = read_u32_le(bytes, cursor, "cell_pass_count")?;
            total += u64::from(count);
            counts.push(count as usize);
        }
        let pass_count = u32::try_from(total)
            .map_err(|_| SubgridError::format(format!("segment body claims {total} passes")))?;

        let mut store = Self::new();
        for ((x, y), count) in cells_column_major().zip(counts) {
            let stack = &mut store.cells[cell_slot(x, y)];
            stack.reserve(count);
            for _ in 0..count {
                let pass = read_cell_pass(bytes, cursor)?;
                if stack.last().is_some_and(|prev| prev.time >= pass.time) {
                    return Err(SubgridError::format(format!(
                        "cell ({x}, {y}) passes out of time order at {}",
                        pass.time
                    )));
                }
                stack.push(pass);
            }
        }
        store.pass_count = pass_count;
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass(seconds: i64, ccv: i16) -> CellPass {
        let mut pass = CellPass::at(Timestamp::from_seconds(seconds));
        pass.ccv = ccv;
        pass
    }

    fn times(store: &MutablePassStore, x: usize, y: usize) -> Vec<i64> {
        store.cell(x, y).iter().map(|p| p.time.whole_seconds()).collect()
    }

    #[test]
    fn test_out_of_order_adds_are_sorted() {
        let mut store = MutablePassStore::new();
        for seconds in [30, 10, 20, 40] {
            assert_eq!(store.add_pass(1, 2, pass(seconds, 1)).unwrap(), AddOutcome::Inserted);
        }
        assert_eq!(times(&store, 1, 2), vec![10, 20, 30, 40]);
        assert_eq!(store.pass_count(), 4);
    }

    #[test]
    fn test_same_second_replaces() {
        let mut store = MutablePassStore::new();
        store.add_pass(0, 0, pass(10, 1)).unwrap();
        let mut later = pass(10, 2);
        later.time = Timestamp::from_ticks(later.time.ticks() + 5_000_000);
        assert_eq!(store.add_pass(0, 0, later).unwrap(), AddOutcome::Replaced);
        assert_eq!(store.pass_count(), 1);
        assert_eq!(store.cell(0, 0)[0].ccv, 2);
        assert_eq!(store.cell(0, 0)[0].time, Timestamp::from_seconds(10));
    }

    #[test]
    fn test_add_pass_inside_history() {
        let mut store = MutablePassStore::new();
        for seconds in [10, 20, 30] {
            store.add_pass(7, 7, pass(seconds, 1)).unwrap();
        }
        assert_eq!(store.add_pass(7, 7, pass(20, 9)).unwrap(), AddOutcome::Replaced);
        assert_eq!(store.add_pass(7, 7, pass(15, 4)).unwrap(), AddOutcome::Inserted);
        assert_eq!(store.add_pass(7, 7, pass(30, 5)).unwrap(), AddOutcome::Replaced);
        assert_eq!(times(&store, 7, 7), vec![10, 15, 20, 30]);
        let ccvs: Vec<i16> = store.cell(7, 7).iter().map(|p| p.ccv).collect();
        assert_eq!(ccvs, vec![1, 4, 9, 5]);
        assert_eq!(store.pass_count(), 4);
    }

    #[test]
    fn test_non_finite_height_stored_as_null() {
        let mut store = MutablePassStore::new();
        let mut bad = pass(10, 1);
        bad.height = f32::NAN;
        store.add_pass(0, 0, bad).unwrap();
        let mut worse = pass(20, 1);
        worse.height = f32::INFINITY;
        store.merge_passes(0, 0, &[worse]).unwrap();
        assert_eq!(store.pass_count(), 2);
        assert!(store.cell(0, 0).iter().all(|p| p.height == sgl_types::NULL_HEIGHT));
    }

    #[test]
    fn test_locate_time_matches_whole_second() {
        let mut store = MutablePassStore::new();
        store.add_pass(4, 4, pass(10, 1)).unwrap();
        store.add_pass(4, 4, pass(20, 1)).unwrap();
        let inside = Timestamp::from_ticks(Timestamp::from_seconds(20).ticks() + 1);
        assert_eq!(store.locate_time(4, 4, inside), Ok(1));
        assert_eq!(store.locate_time(4, 4, Timestamp::from_seconds(15)), Err(1));
        assert_eq!(store.locate_time(5, 5, Timestamp::from_seconds(15)), Err(0));
    }

    #[test]
    fn test_merge_inserts_and_replaces() {
        let mut store = MutablePassStore::new();
        store.add_pass(2, 3, pass(10, 1)).unwrap();
        store.add_pass(2, 3, pass(30, 1)).unwrap();
        let counts = store
            .merge_passes(2, 3, &[pass(5, 9), pass(30, 9), pass(50, 9)])
            .unwrap();
        assert_eq!(counts, MergeCounts { added: 2, modified: 1 });
        assert_eq!(times(&store, 2, 3), vec![5, 10, 30, 50]);
        assert_eq!(store.cell(2, 3)[2].ccv, 9);
        assert_eq!(store.pass_count(), 4);
    }

    #[test]
    fn test_merge_rejects_duplicate_seconds_in_source() {
        let mut store = MutablePassStore::new();
        let err = store
            .merge_passes(0, 0, &[pass(5, 1), pass(5, 2)])
            .unwrap_err();
        assert!(matches!(err, SubgridError::InvariantViolation { .. }));
    }

    #[test]
    fn test_split_off_moves_upper_passes() {
        let mut store = MutablePassStore::new();
        for seconds in [1, 2, 3, 4] {
            store.add_pass(0, 0, pass(seconds, 1)).unwrap();
        }
        store.add_pass(31, 31, pass(10, 1)).unwrap();
        let upper = store.split_off(Timestamp::from_seconds(3));
        assert_eq!(times(&store, 0, 0), vec![1, 2]);
        assert_eq!(times(&upper, 0, 0), vec![3, 4]);
        assert_eq!(times(&upper, 31, 31), vec![10]);
        assert_eq!((store.pass_count(), upper.pass_count()), (2, 3));
    }

    #[test]
    fn test_out_of_range_cells_are_rejected() {
        let mut store = MutablePassStore::new();
        for (x, y) in [(32, 0), (0, 32), (usize::MAX, 1)] {
            let err = store.add_pass(x, y, pass(10, 1)).unwrap_err();
            assert!(matches!(err, SubgridError::OutOfRange { .. }));
            let err = store.merge_passes(x, y, &[pass(10, 1)]).unwrap_err();
            assert!(matches!(err, SubgridError::OutOfRange { .. }));
            assert!(store.passes(x, y).is_err());
        }
        assert!(store.is_empty());
    }

    #[test]
    fn test_body_round_trip() {
        let mut store = MutablePassStore::new();
        store.add_pass(0, 1, pass(5, 1)).unwrap();
        store.add_pass(0, 1, pass(6, 2)).unwrap();
        store.add_pass(17, 30, pass(7, 3)).unwrap();
        let mut buf = Vec::new();
        store.write_to(&mut buf);
        let mut cursor = 0;
        let restored = MutablePassStore::read_from(&buf, &mut cursor).unwrap();
        assert_eq!(cursor, buf.len());
        assert_eq!(restored, store);
    }
}
