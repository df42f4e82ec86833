//! Splitting oversized mutable segments.

use hashbrown::HashSet;
use sgl_error::{Result, SubgridError};
use sgl_types::Timestamp;
use tracing::debug;

use crate::directory::SegmentDescriptor;
use crate::leaf::SubgridLeaf;
use crate::mutable::MutablePassStore;
use crate::segment::{SegmentId, SegmentStore};

/// Median pass time of `store`, moved forward past the earliest second so
/// the lower half is never empty. `None` when every pass shares one second.
fn split_point(store: &MutablePassStore) -> Option<Timestamp> {
    let mut times: Vec<Timestamp> = store.pass_times().collect();
    let earliest = times.iter().min().copied()?;
    let middle = times.len() / 2;
    let (_, median, _) = times.select_nth_unstable(middle);
    if *median > earliest {
        return Some(*median);
    }
    times.into_iter().filter(|time| *time > earliest).min()
}

impl SubgridLeaf {
    /// Split every loaded mutable segment holding more than
    /// `max_passes_per_segment` passes, repeatedly, until none does or the
    /// remaining ones cannot be split. Returns the number of splits.
    ///
    /// Compressed segments are left alone.
    pub fn cleave_segments(&mut self) -> Result<usize> {
        let limit = self.config().max_passes_per_segment;
        let mut unsplittable: HashSet<SegmentId> = HashSet::new();
        let mut splits = 0;
        loop {
            let mut oversized: Vec<SegmentId> = self
                .segments
                .values()
                .filter(|segment| {
                    segment.pass_count() > limit
                        && !segment.store().is_compressed()
                        && !unsplittable.contains(&segment.id())
                })
                .map(|segment| segment.id())
                .collect();
            if oversized.is_empty() {
                break;
            }
            oversized.sort_unstable();
            for id in oversized {
                if self.cleave_segment(id)? {
                    splits += 1;
                } else {
                    unsplittable.insert(id);
                }
            }
        }
        Ok(splits)
    }

    fn cleave_segment(&mut self, id: SegmentId) -> Result<bool> {
        let persisted = self
            .directory()
            .get(id)
            .ok_or_else(|| SubgridError::internal(format!("segment {id} has no descriptor")))?
            .location
            .is_some();
        let segment = self
            .segments
            .get_mut(&id)
            .ok_or(SubgridError::SegmentNotLoaded {
                start_ticks: id.ticks(),
            })?;
        let SegmentStore::Mutable(store) = segment.store() else {
            return Ok(false);
        };
        let Some(split) = split_point(store) else {
            debug!(segment = %segment.range(), passes = segment.pass_count(), "segment passes share one second; not cleaved");
            return Ok(false);
        };

        let original = segment.range();
        let upper = segment.split_at(split)?;
        let mut lower_descriptor = SegmentDescriptor::new(segment.range());
        lower_descriptor.pass_count = segment.pass_count();
        let mut upper_descriptor = SegmentDescriptor::new(upper.range());
        upper_descriptor.pass_count = upper.pass_count();
        debug!(
            segment = %original,
            split = %split,
            lower_passes = lower_descriptor.pass_count,
            upper_passes = upper_descriptor.pass_count,
            "segment cleaved"
        );

        self.directory_mut()
            .split(id, lower_descriptor, upper_descriptor)?;
        self.segments.insert(upper.id(), upper);
        if persisted {
            self.retired.push(original);
        }
        self.latest_stale = true;
        Ok(true)
    }
}
