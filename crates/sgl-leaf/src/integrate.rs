//! Merging a single-segment source leaf into a target leaf.

use hashbrown::HashSet;
use sgl_error::{Result, SubgridError};
use sgl_store::BlockStore;
use sgl_types::cells_column_major;
use tracing::{debug, info};

use crate::leaf::SubgridLeaf;
use crate::mutable::MergeCounts;
use crate::segment::SegmentId;

/// Totals from one [`SubgridLeaf::integrate`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntegrationStats {
    /// Cells that had at least one source pass.
    pub cells: usize,
    pub added: u32,
    pub modified: u32,
    /// Target segments whose passes changed.
    pub segments_touched: usize,
    /// Target segments created to cover source passes that fell in gaps.
    pub segments_created: usize,
}

impl SubgridLeaf {
    /// Merge every pass of `source` into this leaf.
    ///
    /// `source` must hold at most one segment, and it must be loaded. Every
    /// target segment intersecting the source's time span must be loaded and
    /// mutable; this is checked before anything changes. Source passes that
    /// fall outside every target segment get a new segment over their gap.
    ///
    /// Latest values are not recomputed; they are marked stale.
    pub fn integrate(&mut self, source: &Self) -> Result<IntegrationStats> {
        let mut stats = IntegrationStats::default();
        let descriptors = source.directory().descriptors();
        if descriptors.len() > 1 {
            return Err(SubgridError::invariant(format!(
                "integrate source holds {} segments, expected one",
                descriptors.len()
            )));
        }
        let Some(source_descriptor) = descriptors.first() else {
            return Ok(stats);
        };
        let source_segment =
            source
                .segment(source_descriptor.id())
                .ok_or(SubgridError::SegmentNotLoaded {
                    start_ticks: source_descriptor.id().ticks(),
                })?;
        let Some((first, last)) = source.envelope() else {
            return Ok(stats);
        };

        for descriptor in &self.directory().descriptors()[self.directory().intersecting(first, last)] {
            match self.segment(descriptor.id()) {
                None => {
                    return Err(SubgridError::SegmentNotLoaded {
                        start_ticks: descriptor.id().ticks(),
                    });
                }
                Some(segment) if segment.store().is_compressed() => {
                    return Err(SubgridError::ImmutableStore {
                        operation: "integrate",
                    });
                }
                Some(_) => {}
            }
        }

        let segments_before = self.directory().len();
        let mut totals = MergeCounts::default();
        let mut touched: HashSet<SegmentId> = HashSet::new();
        for (x, y) in cells_column_major() {
            let passes = source_segment.store().cell_passes(x, y)?;
            if passes.is_empty() {
                continue;
            }
            stats.cells += 1;

            let mut from = 0;
            while from < passes.len() {
                let id = self.covering_segment(passes[from].time)?;
                let end = self
                    .directory()
                    .get(id)
                    .map(|descriptor| descriptor.range.end)
                    .ok_or_else(|| SubgridError::internal(format!("segment {id} has no descriptor")))?;
                let to = from + passes[from..].partition_point(|pass| pass.time < end);
                let segment = self
                    .segments
                    .get_mut(&id)
                    .ok_or(SubgridError::SegmentNotLoaded {
                        start_ticks: id.ticks(),
                    })?;
                let counts = segment.merge_passes(x, y, &passes[from..to])?;
                if !counts.is_empty() {
                    touched.insert(id);
                    totals.accumulate(counts);
                }
                from = to;
            }
        }

        for &id in &touched {
            self.sync_descriptor(id)?;
        }
        self.widen_envelope(first, last);
        if !totals.is_empty() {
            self.latest_stale = true;
        }

        stats.added = totals.added;
        stats.modified = totals.modified;
        stats.segments_touched = touched.len();
        stats.segments_created = self.directory().len() - segments_before;
        let (origin_x, origin_y) = self.origin();
        info!(
            origin_x,
            origin_y,
            cells = stats.cells,
            added = stats.added,
            modified = stats.modified,
            segments_touched = stats.segments_touched,
            segments_created = stats.segments_created,
            "source leaf integrated"
        );
        Ok(stats)
    }

    /// Integrate, after loading whatever persisted target segments the
    /// source's time span needs.
    pub async fn integrate_from_store<S: BlockStore>(
        &mut self,
        store: &S,
        source: &Self,
    ) -> Result<IntegrationStats> {
        if let Some((first, last)) = source.envelope() {
            let loaded = self.ensure_segments_loaded(store, first, last).await?;
            debug!(loaded, first = %first, last = %last, "segments loaded for integrate");
        }
        self.integrate(source)
    }
}
