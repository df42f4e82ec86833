//! A time slice of a leaf's pass history.

use std::borrow::Cow;
use std::fmt;

use sgl_codec::CompressedPassStore;
use sgl_error::{Result, SubgridError};
use sgl_types::{CellPass, GranuleRef, Timestamp, check_cell};
use tracing::debug;

use crate::latest::LatestValueSummary;
use crate::mutable::{AddOutcome, MergeCounts, MutablePassStore};

/// Segments are keyed by their start time.
pub type SegmentId = Timestamp;

/// Half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeRange {
    /// Everything representable.
    pub const UNBOUNDED: Self = Self {
        start: Timestamp::MIN,
        end: Timestamp::MAX,
    };

    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self> {
        if start >= end {
            return Err(SubgridError::invariant(format!(
                "empty segment range [{start}, {end})"
            )));
        }
        Ok(Self { start, end })
    }

    #[must_use]
    pub fn contains(&self, time: Timestamp) -> bool {
        self.start <= time && time < self.end
    }

    /// Neither end is open. Only bounded segments are packed on save, so
    /// passes older or newer than the leaf's history always have a writable
    /// segment to land in.
    #[must_use]
    pub fn is_bounded(&self) -> bool {
        self.start != Timestamp::MIN && self.end != Timestamp::MAX
    }

    /// Whether the range shares any instant with the closed window
    /// `[first, last]`.
    #[must_use]
    pub fn intersects(&self, first: Timestamp, last: Timestamp) -> bool {
        self.start <= last && first < self.end
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Pass storage of a segment: growable, or packed and read-only.
#[derive(Debug, Clone)]
pub enum SegmentStore {
    Mutable(MutablePassStore),
    Compressed(CompressedPassStore),
}

impl SegmentStore {
    #[must_use]
    pub const fn is_compressed(&self) -> bool {
        matches!(self, Self::Compressed(_))
    }

    #[must_use]
    pub const fn pass_count(&self) -> u32 {
        match self {
            Self::Mutable(store) => store.pass_count(),
            Self::Compressed(store) => store.pass_count(),
        }
    }

    /// Passes of cell `(x, y)` in time order.
    pub fn cell_passes(&self, x: usize, y: usize) -> Result<Cow<'_, [CellPass]>> {
        match self {
            Self::Mutable(store) => store.passes(x, y).map(Cow::Borrowed),
            Self::Compressed(store) => store.decode_all(x, y).map(Cow::Owned),
        }
    }

    /// Writable view, or `ImmutableStore` when the store is compressed.
    pub fn as_mutable(&mut self, operation: &'static str) -> Result<&mut MutablePassStore> {
        match self {
            Self::Mutable(store) => Ok(store),
            Self::Compressed(_) => Err(SubgridError::ImmutableStore { operation }),
        }
    }

    /// Packed copy of this store. A compressed store is returned as is.
    pub fn to_compressed(&self) -> Result<CompressedPassStore> {
        match self {
            Self::Mutable(store) => CompressedPassStore::encode(|x, y| store.cell(x, y)),
            Self::Compressed(store) => Ok(store.clone()),
        }
    }
}

/// One loaded segment.
#[derive(Debug, Clone)]
pub struct Segment {
    range: TimeRange,
    dirty: bool,
    store: SegmentStore,
    latest: LatestValueSummary,
    location: Option<GranuleRef>,
}

impl Segment {
    /// Fresh, empty, dirty segment covering `range`.
    #[must_use]
    pub fn new(range: TimeRange) -> Self {
        Self {
            range,
            dirty: true,
            store: SegmentStore::Mutable(MutablePassStore::new()),
            latest: LatestValueSummary::new(),
            location: None,
        }
    }

    /// Clean segment rebuilt from a persisted stream.
    #[must_use]
    pub fn restored(
        range: TimeRange,
        store: SegmentStore,
        latest: LatestValueSummary,
        location: Option<GranuleRef>,
    ) -> Self {
        Self {
            range,
            dirty: false,
            store,
            latest,
            location,
        }
    }

    #[must_use]
    pub const fn id(&self) -> SegmentId {
        self.range.start
    }

    #[must_use]
    pub const fn range(&self) -> TimeRange {
        self.range
    }

    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Record a successful write to `location`.
    pub fn mark_persisted(&mut self, location: GranuleRef) {
        self.dirty = false;
        self.location = Some(location);
    }

    #[must_use]
    pub const fn location(&self) -> Option<GranuleRef> {
        self.location
    }

    #[must_use]
    pub const fn store(&self) -> &SegmentStore {
        &self.store
    }

    #[must_use]
    pub const fn pass_count(&self) -> u32 {
        self.store.pass_count()
    }

    #[must_use]
    pub const fn latest(&self) -> &LatestValueSummary {
        &self.latest
    }

    pub fn set_latest(&mut self, latest: LatestValueSummary) {
        self.latest = latest;
    }

    /// Add one pass. The pass must fall inside the segment's range.
    pub fn add_pass(&mut self, x: usize, y: usize, pass: CellPass) -> Result<AddOutcome> {
        check_cell(x, y)?;
        if !self.range.contains(pass.time) {
            return Err(SubgridError::invariant(format!(
                "pass at {} added to segment {}",
                pass.time, self.range
            )));
        }
        let outcome = self.store.as_mutable("add_pass")?.add_pass(x, y, pass)?;
        self.dirty = true;
        Ok(outcome)
    }

    /// Merge a time-ordered run of passes that all fall inside the range.
    pub fn merge_passes(&mut self, x: usize, y: usize, passes: &[CellPass]) -> Result<MergeCounts> {
        check_cell(x, y)?;
        if let (Some(first), Some(last)) = (passes.first(), passes.last()) {
            if !self.range.contains(first.time) || !self.range.contains(last.time) {
                return Err(SubgridError::invariant(format!(
                    "merge of [{}, {}] into segment {}",
                    first.time, last.time, self.range
                )));
            }
        }
        let counts = self.store.as_mutable("merge_passes")?.merge_passes(x, y, passes)?;
        if !counts.is_empty() {
            self.dirty = true;
        }
        Ok(counts)
    }

    /// Replace the mutable store with its packed form. One-way.
    pub fn compress(&mut self) -> Result<()> {
        if self.store.is_compressed() {
            return Ok(());
        }
        let packed = self.store.to_compressed()?;
        debug!(
            segment = %self.range,
            passes = packed.pass_count(),
            packed_bytes = packed.size_in_bytes(),
            "segment compressed"
        );
        self.store = SegmentStore::Compressed(packed);
        self.dirty = true;
        Ok(())
    }

    /// Split at `split`, keeping `[start, split)` and returning
    /// `[split, end)`. Both halves are dirty and their summaries stale.
    pub fn split_at(&mut self, split: Timestamp) -> Result<Self> {
        if !(self.range.start < split && split < self.range.end) {
            return Err(SubgridError::invariant(format!(
                "split point {split} outside segment {}",
                self.range
            )));
        }
        let upper_store = self.store.as_mutable("split")?.split_off(split);
        let upper = Self {
            range: TimeRange {
                start: split,
                end: self.range.end,
            },
            dirty: true,
            store: SegmentStore::Mutable(upper_store),
            latest: LatestValueSummary::new(),
            location: None,
        };
        self.range.end = split;
        self.dirty = true;
        self.location = None;
        Ok(upper)
    }

    /// Recompute this segment's summary on top of `seed`.
    pub fn compute_latest(&self, seed: Option<&LatestValueSummary>) -> Result<LatestValueSummary> {
        LatestValueSummary::compute_for_segment(|x, y| self.store.cell_passes(x, y), seed)
    }
}
