//! Ordered index of a leaf's segments and the leaf-wide latest values.

use std::ops::Range;

use sgl_codec::wire::{
    append_count_i32, append_i64_le, append_u8, append_u32_le, read_count_i32, read_i64_le,
    read_u8, read_u32_le,
};
use sgl_error::{Result, SubgridError};
use sgl_types::{GranuleRef, Timestamp};

use crate::latest::LatestValueSummary;
use crate::segment::{SegmentId, TimeRange};

/// Encoded size of one [`SegmentDescriptor`].
pub const SEGMENT_DESCRIPTOR_BYTES: usize = 30;

/// Persisted facts about one segment, available without loading it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentDescriptor {
    pub range: TimeRange,
    pub pass_count: u32,
    /// The persisted body uses the packed layout.
    pub compressed: bool,
    pub location: Option<GranuleRef>,
}

impl SegmentDescriptor {
    #[must_use]
    pub const fn new(range: TimeRange) -> Self {
        Self {
            range,
            pass_count: 0,
            compressed: false,
            location: None,
        }
    }

    #[must_use]
    pub const fn id(&self) -> SegmentId {
        self.range.start
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        append_i64_le(buf, self.range.start.ticks());
        append_i64_le(buf, self.range.end.ticks());
        append_u32_le(buf, self.pass_count);
        append_u8(buf, u8::from(self.compressed));
        append_u8(buf, u8::from(self.location.is_some()));
        let location = self.location.unwrap_or(GranuleRef { index: 0, count: 0 });
        append_u32_le(buf, location.index);
        append_u32_le(buf, location.count);
    }

    fn read_from(bytes: &[u8], cursor: &mut usize) -> Result<Self> {
        let start = Timestamp::from_ticks(read_i64_le(bytes, cursor, "segment_start")?);
        let end = Timestamp::from_ticks(read_i64_le(bytes, cursor, "segment_end")?);
        let range = TimeRange::new(start, end)
            .map_err(|_| SubgridError::format(format!("segment range [{start}, {end}) is empty")))?;
        let pass_count = read_u32_le(bytes, cursor, "segment_pass_count")?;
        let compressed = read_flag(bytes, cursor, "segment_compressed")?;
        let has_location = read_flag(bytes, cursor, "segment_has_location")?;
        let location = GranuleRef {
            index: read_u32_le(bytes, cursor, "granule_index")?,
            count: read_u32_le(bytes, cursor, "granule_count")?,
        };
        Ok(Self {
            range,
            pass_count,
            compressed,
            location: has_location.then_some(location),
        })
    }
}

fn read_flag(bytes: &[u8], cursor: &mut usize, field: &str) -> Result<bool> {
    match read_u8(bytes, cursor, field)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(SubgridError::format(format!("{field}: {other} is not a flag"))),
    }
}

/// Time-ordered, non-overlapping segment descriptors plus the global
/// latest-value summary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentDirectory {
    segments: Vec<SegmentDescriptor>,
    global_latest: LatestValueSummary,
    location: Option<GranuleRef>,
}

impl SegmentDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn descriptors(&self) -> &[SegmentDescriptor] {
        &self.segments
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    #[must_use]
    pub const fn global_latest(&self) -> &LatestValueSummary {
        &self.global_latest
    }

    pub fn set_global_latest(&mut self, latest: LatestValueSummary) {
        self.global_latest = latest;
    }

    #[must_use]
    pub const fn location(&self) -> Option<GranuleRef> {
        self.location
    }

    pub fn set_location(&mut self, location: Option<GranuleRef>) {
        self.location = location;
    }

    /// Position of the segment whose range contains `time`.
    #[must_use]
    pub fn find_covering(&self, time: Timestamp) -> Option<usize> {
        let index = self.segments.partition_point(|d| d.range.end <= time);
        self.segments
            .get(index)
            .is_some_and(|d| d.range.contains(time))
            .then_some(index)
    }

    /// The uncovered interval around `time`, bounded by its neighbours.
    ///
    /// Errors when `time` is already covered.
    pub fn gap_around(&self, time: Timestamp) -> Result<TimeRange> {
        let index = self.segments.partition_point(|d| d.range.end <= time);
        let end = match self.segments.get(index) {
            Some(next) if next.range.contains(time) => {
                return Err(SubgridError::invariant(format!(
                    "{time} is already covered by segment {}",
                    next.range
                )));
            }
            Some(next) => next.range.start,
            None => Timestamp::MAX,
        };
        let start = index
            .checked_sub(1)
            .map_or(Timestamp::MIN, |prev| self.segments[prev].range.end);
        TimeRange::new(start, end)
    }

    #[must_use]
    pub fn position(&self, id: SegmentId) -> Option<usize> {
        self.segments
            .binary_search_by(|d| d.range.start.cmp(&id))
            .ok()
    }

    #[must_use]
    pub fn get(&self, id: SegmentId) -> Option<&SegmentDescriptor> {
        self.position(id).map(|index| &self.segments[index])
    }

    pub fn get_mut(&mut self, id: SegmentId) -> Option<&mut SegmentDescriptor> {
        self.position(id).map(|index| &mut self.segments[index])
    }

    /// Indices of segments intersecting the closed window `[first, last]`.
    #[must_use]
    pub fn intersecting(&self, first: Timestamp, last: Timestamp) -> Range<usize> {
        let from = self.segments.partition_point(|d| d.range.end <= first);
        let to = self.segments.partition_point(|d| d.range.start <= last);
        from..to.max(from)
    }

    /// Insert a descriptor at its ordered position.
    pub fn insert(&mut self, descriptor: SegmentDescriptor) -> Result<()> {
        let index = self
            .segments
            .partition_point(|d| d.range.start < descriptor.range.start);
        let overlaps_prev = index
            .checked_sub(1)
            .is_some_and(|prev| self.segments[prev].range.end > descriptor.range.start);
        let overlaps_next = self
            .segments
            .get(index)
            .is_some_and(|next| next.range.start < descriptor.range.end);
        if overlaps_prev || overlaps_next {
            return Err(SubgridError::invariant(format!(
                "segment {} overlaps an existing segment",
                descriptor.range
            )));
        }
        self.segments.insert(index, descriptor);
        Ok(())
    }

    /// Replace the descriptor for `id` with `lower` and `upper`, which must
    /// split its range exactly.
    pub fn split(
        &mut self,
        id: SegmentId,
        lower: SegmentDescriptor,
        upper: SegmentDescriptor,
    ) -> Result<()> {
        let index = self
            .position(id)
            .ok_or_else(|| SubgridError::internal(format!("no segment starts at {id}")))?;
        let original = self.segments[index].range;
        if lower.range.start != original.start
            || lower.range.end != upper.range.start
            || upper.range.end != original.end
        {
            return Err(SubgridError::invariant(format!(
                "{} + {} does not split {original}",
                lower.range, upper.range
            )));
        }
        self.segments[index] = lower;
        self.segments.insert(index + 1, upper);
        Ok(())
    }

    /// Check ordering and non-overlap.
    pub fn validate(&self) -> Result<()> {
        for pair in self.segments.windows(2) {
            if pair[0].range.end > pair[1].range.start {
                return Err(SubgridError::invariant(format!(
                    "segments {} and {} are out of order or overlap",
                    pair[0].range, pair[1].range
                )));
            }
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.segments.clear();
        self.global_latest.clear();
        self.location = None;
    }

    /// Body of a directory stream: `[GlobalLatestCells] [segment_count i32]
    /// [descriptors]`.
    pub fn write_to(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.global_latest.write_to(buf);
        append_count_i32(buf, self.segments.len(), "segment_count")?;
        for descriptor in &self.segments {
            descriptor.write_to(buf);
        }
        Ok(())
    }

    /// Inverse of [`SegmentDirectory::write_to`]. `location` is where the
    /// stream was read from.
    pub fn read_from(bytes: &[u8], cursor: &mut usize, location: Option<GranuleRef>) -> Result<Self> {
        let global_latest = LatestValueSummary::read_from(bytes, cursor)?;
        let count = read_count_i32(bytes, cursor, "segment_count")?;
        let mut segments = Vec::with_capacity(count.min(bytes.len() / SEGMENT_DESCRIPTOR_BYTES + 1));
        for _ in 0..count {
            segments.push(SegmentDescriptor::read_from(bytes, cursor)?);
        }
        let directory = Self {
            segments,
            global_latest,
            location,
        };
        directory
            .validate()
            .map_err(|err| SubgridError::format(err.to_string()))?;
        Ok(directory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: i64, end: i64) -> TimeRange {
        TimeRange::new(Timestamp::from_seconds(start), Timestamp::from_seconds(end)).unwrap()
    }

    fn sample() -> SegmentDirectory {
        let mut directory = SegmentDirectory::new();
        directory.insert(SegmentDescriptor::new(range(100, 200))).unwrap();
        directory.insert(SegmentDescriptor::new(range(0, 50))).unwrap();
        directory.insert(SegmentDescriptor::new(range(300, 400))).unwrap();
        directory
    }

    #[test]
    fn test_insert_keeps_order() {
        let directory = sample();
        let starts: Vec<_> = directory
            .descriptors()
            .iter()
            .map(|d| d.range.start.whole_seconds())
            .collect();
        assert_eq!(starts, vec![0, 100, 300]);
        directory.validate().unwrap();
    }

    #[test]
    fn test_overlap_rejected() {
        let mut directory = sample();
        assert!(directory.insert(SegmentDescriptor::new(range(40, 60))).is_err());
        assert!(directory.insert(SegmentDescriptor::new(range(150, 160))).is_err());
        directory.insert(SegmentDescriptor::new(range(50, 100))).unwrap();
    }

    #[test]
    fn test_find_covering_and_gaps() {
        let directory = sample();
        assert_eq!(directory.find_covering(Timestamp::from_seconds(0)), Some(0));
        assert_eq!(directory.find_covering(Timestamp::from_seconds(199)), Some(1));
        assert_eq!(directory.find_covering(Timestamp::from_seconds(200)), None);

        assert_eq!(directory.gap_around(Timestamp::from_seconds(250)).unwrap(), range(200, 300));
        let before = directory.gap_around(Timestamp::from_seconds(-10)).unwrap();
        assert_eq!(before.start, Timestamp::MIN);
        assert_eq!(before.end, Timestamp::from_seconds(0));
        let after = directory.gap_around(Timestamp::from_seconds(1_000)).unwrap();
        assert_eq!(after.start, Timestamp::from_seconds(400));
        assert_eq!(after.end, Timestamp::MAX);
        assert!(directory.gap_around(Timestamp::from_seconds(120)).is_err());
    }

    #[test]
    fn test_empty_directory_gap_is_unbounded() {
        let directory = SegmentDirectory::new();
        assert_eq!(
            directory.gap_around(Timestamp::from_seconds(5)).unwrap(),
            TimeRange::UNBOUNDED
        );
    }

    #[test]
    fn test_intersecting() {
        let directory = sample();
        assert_eq!(
            directory.intersecting(Timestamp::from_seconds(10), Timestamp::from_seconds(100)),
            0..2
        );
        assert_eq!(
            directory.intersecting(Timestamp::from_seconds(210), Timestamp::from_seconds(290)),
            2..2
        );
        assert_eq!(
            directory.intersecting(Timestamp::from_seconds(0), Timestamp::from_seconds(1_000)),
            0..3
        );
    }

    #[test]
    fn test_split_replaces_descriptor() {
        let mut directory = sample();
        directory
            .split(
                Timestamp::from_seconds(100),
                SegmentDescriptor::new(range(100, 150)),
                SegmentDescriptor::new(range(150, 200)),
            )
            .unwrap();
        assert_eq!(directory.len(), 4);
        directory.validate().unwrap();
        assert!(
            directory
                .split(
                    Timestamp::from_seconds(0),
                    SegmentDescriptor::new(range(0, 10)),
                    SegmentDescriptor::new(range(20, 50)),
                )
                .is_err()
        );
    }

    #[test]
    fn test_body_round_trip() {
        let mut directory = sample();
        if let Some(descriptor) = directory.get_mut(Timestamp::from_seconds(100)) {
            descriptor.pass_count = 12;
            descriptor.compressed = true;
            descriptor.location = Some(GranuleRef { index: 4, count: 2 });
        }
        let mut buf = Vec::new();
        directory.write_to(&mut buf).unwrap();
        let mut cursor = 0;
        let restored = SegmentDirectory::read_from(&buf, &mut cursor, None).unwrap();
        assert_eq!(cursor, buf.len());
        assert_eq!(
            buf.len(),
            LatestValueSummary::new().encoded_len() + 4 + 3 * SEGMENT_DESCRIPTOR_BYTES
        );
        assert_eq!(restored, directory);
    }
}
