//! The subgrid leaf: directory, loaded segments and leaf envelope.

use hashbrown::HashMap;
use sgl_error::{Result, SubgridError};
use sgl_store::{BlockStore, StreamKey};
use sgl_types::{CellPass, DatasetId, Timestamp, check_cell};
use tracing::{debug, info, warn};

use crate::config::LeafStorageConfig;
use crate::directory::{SegmentDescriptor, SegmentDirectory};
use crate::latest::{LatestCell, LatestValueSummary};
use crate::mutable::AddOutcome;
use crate::persistence::{
    decode_directory, decode_segment, decode_segment_latest, encode_directory, encode_segment,
};
use crate::segment::{Segment, SegmentId, TimeRange};

/// What [`SubgridLeaf::save`] wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveStats {
    pub segments_written: usize,
    pub segments_retired: usize,
    pub bytes_written: usize,
}

/// Cell-pass history of one 32×32 subgrid across time.
///
/// Mutation requires `&mut self`; callers serialize access per leaf.
#[derive(Debug, Clone)]
pub struct SubgridLeaf {
    config: LeafStorageConfig,
    origin_x: u32,
    origin_y: u32,
    level: u8,
    leaf_start: Timestamp,
    leaf_end: Timestamp,
    directory: SegmentDirectory,
    pub(crate) segments: HashMap<SegmentId, Segment>,
    /// Segment ranges whose persisted streams are superseded.
    pub(crate) retired: Vec<TimeRange>,
    pub(crate) latest_stale: bool,
}

// ---------------------------------------------------------------------------
// Construction and accessors
// ---------------------------------------------------------------------------

impl SubgridLeaf {
    /// Empty leaf at cell origin `(origin_x, origin_y)`.
    #[must_use]
    pub fn new(origin_x: u32, origin_y: u32, level: u8, config: LeafStorageConfig) -> Self {
        Self {
            config,
            origin_x,
            origin_y,
            level,
            leaf_start: Timestamp::MAX,
            leaf_end: Timestamp::MIN,
            directory: SegmentDirectory::new(),
            segments: HashMap::new(),
            retired: Vec::new(),
            latest_stale: false,
        }
    }

    #[must_use]
    pub const fn origin(&self) -> (u32, u32) {
        (self.origin_x, self.origin_y)
    }

    #[must_use]
    pub const fn level(&self) -> u8 {
        self.level
    }

    #[must_use]
    pub const fn dataset_id(&self) -> DatasetId {
        self.config.dataset_id
    }

    #[must_use]
    pub const fn config(&self) -> &LeafStorageConfig {
        &self.config
    }

    /// `[leaf_start, leaf_end]` covering every pass ever added, or `None`
    /// for a leaf without passes.
    #[must_use]
    pub fn envelope(&self) -> Option<(Timestamp, Timestamp)> {
        (self.leaf_start <= self.leaf_end).then_some((self.leaf_start, self.leaf_end))
    }

    #[must_use]
    pub const fn directory(&self) -> &SegmentDirectory {
        &self.directory
    }

    pub(crate) fn directory_mut(&mut self) -> &mut SegmentDirectory {
        &mut self.directory
    }

    #[must_use]
    pub fn segment(&self, id: SegmentId) -> Option<&Segment> {
        self.segments.get(&id)
    }

    #[must_use]
    pub fn is_loaded(&self, id: SegmentId) -> bool {
        self.segments.contains_key(&id)
    }

    /// Number of segments resident in memory.
    #[must_use]
    pub fn loaded_segment_count(&self) -> usize {
        self.segments.len()
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.segments.values().any(Segment::is_dirty) || !self.retired.is_empty()
    }

    /// Total passes recorded across the directory.
    #[must_use]
    pub fn pass_count(&self) -> u64 {
        self.directory
            .descriptors()
            .iter()
            .map(|d| u64::from(d.pass_count))
            .sum()
    }

    pub(crate) fn widen_envelope(&mut self, first: Timestamp, last: Timestamp) {
        self.leaf_start = self.leaf_start.min(first);
        self.leaf_end = self.leaf_end.max(last);
    }

    pub(crate) fn sync_descriptor(&mut self, id: SegmentId) -> Result<()> {
        let segment = self
            .segments
            .get(&id)
            .ok_or(SubgridError::SegmentNotLoaded {
                start_ticks: id.ticks(),
            })?;
        let pass_count = segment.pass_count();
        let descriptor = self
            .directory
            .get_mut(id)
            .ok_or_else(|| SubgridError::internal(format!("segment {id} has no descriptor")))?;
        descriptor.pass_count = pass_count;
        Ok(())
    }

    fn directory_key(&self) -> StreamKey {
        StreamKey::directory(self.config.dataset_id, self.origin_x, self.origin_y)
    }

    pub(crate) fn segment_key(&self, range: TimeRange) -> StreamKey {
        StreamKey::segment(
            self.config.dataset_id,
            self.origin_x,
            self.origin_y,
            range.start,
            range.end,
        )
    }

    /// Drop every segment, summary and the envelope. Persisted streams are
    /// retired on the next save.
    pub fn clear(&mut self) {
        self.retired.extend(
            self.directory
                .descriptors()
                .iter()
                .filter(|d| d.location.is_some())
                .map(|d| d.range),
        );
        let location = self.directory.location();
        self.directory.clear();
        self.directory.set_location(location);
        self.segments.clear();
        self.leaf_start = Timestamp::MAX;
        self.leaf_end = Timestamp::MIN;
        self.latest_stale = false;
        info!(
            origin_x = self.origin_x,
            origin_y = self.origin_y,
            retired = self.retired.len(),
            "subgrid leaf cleared"
        );
    }
}

// ---------------------------------------------------------------------------
// Ingest and reads
// ---------------------------------------------------------------------------

impl SubgridLeaf {
    /// Id of the segment covering `time`, creating one over the surrounding
    /// gap when none does.
    pub(crate) fn covering_segment(&mut self, time: Timestamp) -> Result<SegmentId> {
        if let Some(index) = self.directory.find_covering(time) {
            return Ok(self.directory.descriptors()[index].id());
        }
        let range = self.directory.gap_around(time)?;
        self.directory.insert(SegmentDescriptor::new(range))?;
        self.segments.insert(range.start, Segment::new(range));
        debug!(
            origin_x = self.origin_x,
            origin_y = self.origin_y,
            segment = %range,
            "created segment"
        );
        Ok(range.start)
    }

    /// Record one pass at cell `(x, y)`.
    ///
    /// The pass time is truncated to the second. A pass in the same second
    /// as an existing one replaces it. The covering segment must be loaded.
    pub fn add_pass(&mut self, x: usize, y: usize, mut pass: CellPass) -> Result<AddOutcome> {
        check_cell(x, y)?;
        pass.time = pass.time.truncate_to_second();
        let id = self.covering_segment(pass.time)?;
        let segment = self
            .segments
            .get_mut(&id)
            .ok_or(SubgridError::SegmentNotLoaded {
                start_ticks: id.ticks(),
            })?;
        let outcome = segment.add_pass(x, y, pass)?;
        self.sync_descriptor(id)?;
        self.widen_envelope(pass.time, pass.time);
        self.latest_stale = true;
        Ok(outcome)
    }

    /// Full history of `(x, y)` in time order. Every segment holding passes
    /// must be loaded.
    pub fn cell_passes(&self, x: usize, y: usize) -> Result<Vec<CellPass>> {
        check_cell(x, y)?;
        let mut passes = Vec::new();
        for descriptor in self.directory.descriptors() {
            if descriptor.pass_count == 0 {
                continue;
            }
            let segment = self
                .segments
                .get(&descriptor.id())
                .ok_or(SubgridError::SegmentNotLoaded {
                    start_ticks: descriptor.id().ticks(),
                })?;
            passes.extend_from_slice(&segment.store().cell_passes(x, y)?);
        }
        Ok(passes)
    }

    /// Leaf-wide latest values for `(x, y)` as of the last recompute.
    pub fn latest_cell(&self, x: usize, y: usize) -> Result<Option<LatestCell>> {
        check_cell(x, y)?;
        Ok(self.directory.global_latest().cell(x, y))
    }

    /// Convert a loaded segment to its packed, read-only form.
    pub fn compress_segment(&mut self, id: SegmentId) -> Result<()> {
        let segment = self
            .segments
            .get_mut(&id)
            .ok_or(SubgridError::SegmentNotLoaded {
                start_ticks: id.ticks(),
            })?;
        segment.compress()
    }
}

// ---------------------------------------------------------------------------
// Latest pass information
// ---------------------------------------------------------------------------

impl SubgridLeaf {
    /// Recompute per-segment and global latest values.
    ///
    /// Starts at the first dirty segment (or the first segment when
    /// `full_recompute`), seeds from its predecessor's summary and folds
    /// forward over every later segment, loading them as needed.
    pub async fn compute_latest_pass_information<S: BlockStore>(
        &mut self,
        store: &S,
        full_recompute: bool,
    ) -> Result<()> {
        let descriptors = self.directory.descriptors().to_vec();
        let first = if full_recompute {
            (!descriptors.is_empty()).then_some(0)
        } else {
            descriptors.iter().position(|d| {
                self.segments
                    .get(&d.id())
                    .is_some_and(Segment::is_dirty)
            })
        };
        let Some(first) = first else {
            warn!(
                origin_x = self.origin_x,
                origin_y = self.origin_y,
                full_recompute,
                "no segment needs latest pass information; nothing recomputed"
            );
            return Ok(());
        };

        let seed = match first.checked_sub(1).map(|index| descriptors[index]) {
            None => None,
            Some(previous) => match self.segments.get(&previous.id()) {
                Some(segment) => Some(segment.latest().clone()),
                None => Some(self.read_segment_latest(store, &previous).await?),
            },
        };

        let mut fetched = Vec::new();
        for descriptor in &descriptors[first..] {
            if !self.is_loaded(descriptor.id()) {
                fetched.push(self.read_segment(store, descriptor).await?);
            }
        }
        for segment in fetched {
            self.segments.insert(segment.id(), segment);
        }

        let mut summary = seed;
        let mut changed = 0_usize;
        for descriptor in &descriptors[first..] {
            let segment = self
                .segments
                .get_mut(&descriptor.id())
                .ok_or_else(|| SubgridError::internal("segment vanished during recompute"))?;
            let next = segment.compute_latest(summary.as_ref())?;
            if next != *segment.latest() {
                segment.set_latest(next.clone());
                segment.mark_dirty();
                changed += 1;
            }
            summary = Some(next);
        }

        if let Some(global) = summary {
            self.directory.set_global_latest(global);
        }
        self.latest_stale = false;
        info!(
            origin_x = self.origin_x,
            origin_y = self.origin_y,
            first_segment = %descriptors[first].range,
            processed = descriptors.len() - first,
            changed,
            "latest pass information recomputed"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

impl SubgridLeaf {
    /// Restore a leaf's directory from `store`. No segment is loaded.
    ///
    /// A missing directory is reported as `NotFound`.
    pub async fn load<S: BlockStore>(
        store: &S,
        origin_x: u32,
        origin_y: u32,
        level: u8,
        config: LeafStorageConfig,
    ) -> Result<Self> {
        let mut leaf = Self::new(origin_x, origin_y, level, config);
        let read = store.read_stream(&leaf.directory_key(), None).await?;
        let (header, directory) = decode_directory(&read.bytes, Some(read.granule))?;
        leaf.leaf_start = header.start;
        leaf.leaf_end = header.end;
        leaf.directory = directory;
        info!(
            origin_x,
            origin_y,
            segments = leaf.directory.len(),
            granule = %read.granule,
            "subgrid leaf loaded"
        );
        Ok(leaf)
    }

    /// [`SubgridLeaf::load`], or a new empty leaf when nothing is persisted.
    pub async fn open<S: BlockStore>(
        store: &S,
        origin_x: u32,
        origin_y: u32,
        level: u8,
        config: LeafStorageConfig,
    ) -> Result<Self> {
        match Self::load(store, origin_x, origin_y, level, config.clone()).await {
            Err(err) if err.is_not_found() => {
                debug!(origin_x, origin_y, "no persisted directory; starting empty leaf");
                Ok(Self::new(origin_x, origin_y, level, config))
            }
            other => other,
        }
    }

    async fn read_segment<S: BlockStore>(
        &self,
        store: &S,
        descriptor: &SegmentDescriptor,
    ) -> Result<Segment> {
        let location = descriptor.location.ok_or(SubgridError::SegmentNotLoaded {
            start_ticks: descriptor.id().ticks(),
        })?;
        let read = store
            .read_stream(&self.segment_key(descriptor.range), Some(location))
            .await?;
        let segment = decode_segment(&read.bytes, descriptor.range, Some(read.granule))?;
        if segment.pass_count() != descriptor.pass_count {
            return Err(SubgridError::format(format!(
                "segment {} holds {} passes, directory records {}",
                descriptor.range,
                segment.pass_count(),
                descriptor.pass_count
            )));
        }
        Ok(segment)
    }

    async fn read_segment_latest<S: BlockStore>(
        &self,
        store: &S,
        descriptor: &SegmentDescriptor,
    ) -> Result<LatestValueSummary> {
        let location = descriptor.location.ok_or(SubgridError::SegmentNotLoaded {
            start_ticks: descriptor.id().ticks(),
        })?;
        let read = store
            .read_stream(&self.segment_key(descriptor.range), Some(location))
            .await?;
        decode_segment_latest(&read.bytes, descriptor.range)
    }

    /// Load every persisted segment intersecting `[first, last]` that is
    /// not already resident. Returns how many were loaded.
    ///
    /// Nothing is installed unless every read succeeds.
    pub async fn ensure_segments_loaded<S: BlockStore>(
        &mut self,
        store: &S,
        first: Timestamp,
        last: Timestamp,
    ) -> Result<usize> {
        let wanted: Vec<SegmentDescriptor> = self.directory.descriptors()
            [self.directory.intersecting(first, last)]
            .iter()
            .filter(|d| !self.is_loaded(d.id()))
            .copied()
            .collect();
        let mut loaded = Vec::with_capacity(wanted.len());
        for descriptor in &wanted {
            loaded.push(self.read_segment(store, descriptor).await?);
        }
        let count = loaded.len();
        for segment in loaded {
            self.segments.insert(segment.id(), segment);
        }
        if count > 0 {
            debug!(
                origin_x = self.origin_x,
                origin_y = self.origin_y,
                loaded = count,
                "segments loaded"
            );
        }
        Ok(count)
    }

    /// Load every persisted segment.
    pub async fn load_all_segments<S: BlockStore>(&mut self, store: &S) -> Result<usize> {
        self.ensure_segments_loaded(store, Timestamp::MIN, Timestamp::MAX)
            .await
    }

    /// Persist the leaf: cleave oversized segments, refresh stale latest
    /// values, write dirty segments, retire superseded streams, then write
    /// the directory.
    ///
    /// With `compress_on_save`, dirty segments bounded on both ends are
    /// packed in memory before they are written. The open-ended first and
    /// last segments stay mutable.
    pub async fn save<S: BlockStore>(&mut self, store: &S) -> Result<SaveStats> {
        self.cleave_segments()?;
        if self.latest_stale {
            self.compute_latest_pass_information(store, false).await?;
        }

        let now = Timestamp::now();
        let mut stats = SaveStats::default();
        let mut dirty: Vec<SegmentId> = self
            .segments
            .values()
            .filter(|segment| segment.is_dirty())
            .map(Segment::id)
            .collect();
        dirty.sort_unstable();

        for id in dirty {
            let segment = self
                .segments
                .get_mut(&id)
                .ok_or_else(|| SubgridError::internal("dirty segment vanished during save"))?;
            if self.config.compress_on_save && segment.range().is_bounded() {
                segment.compress()?;
            }
            let packed = segment.store().is_compressed();
            let bytes = encode_segment(segment, now)?;
            let range = segment.range();
            let key = self.segment_key(range);
            let written = bytes.len();
            let granule = store.write_stream(&key, bytes).await?;

            if let Some(segment) = self.segments.get_mut(&id) {
                segment.mark_persisted(granule);
            }
            let descriptor = self
                .directory
                .get_mut(id)
                .ok_or_else(|| SubgridError::internal(format!("segment {id} has no descriptor")))?;
            descriptor.location = Some(granule);
            descriptor.compressed = packed;
            stats.segments_written += 1;
            stats.bytes_written += written;
        }

        let retired = std::mem::take(&mut self.retired);
        for (index, &range) in retired.iter().enumerate() {
            if self.directory.get(range.start).is_some_and(|d| d.range == range) {
                continue;
            }
            if let Err(err) = store.remove_stream(&self.segment_key(range)).await {
                self.retired = retired[index..].to_vec();
                return Err(err);
            }
            stats.segments_retired += 1;
        }

        let bytes = encode_directory(&self.directory, self.leaf_start, self.leaf_end, now)?;
        stats.bytes_written += bytes.len();
        let granule = store.write_stream(&self.directory_key(), bytes).await?;
        self.directory.set_location(Some(granule));

        info!(
            origin_x = self.origin_x,
            origin_y = self.origin_y,
            segments_written = stats.segments_written,
            segments_retired = stats.segments_retired,
            bytes = stats.bytes_written,
            "subgrid leaf saved"
        );
        Ok(stats)
    }
}
