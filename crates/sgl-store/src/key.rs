//! Stream addressing and on-store naming.

use std::fmt;

use sgl_types::{DatasetId, Timestamp};

/// Kind of stream a key addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    SubgridDirectory,
    SubgridSegment,
}

impl StreamType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SubgridDirectory => "directory",
            Self::SubgridSegment => "segment",
        }
    }
}

/// Full address of one stream in a [`crate::BlockStore`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub dataset_id: DatasetId,
    pub name: String,
    pub origin_x: u32,
    pub origin_y: u32,
    pub stream_type: StreamType,
}

impl StreamKey {
    /// Key of the directory stream for the leaf at `(origin_x, origin_y)`.
    #[must_use]
    pub fn directory(dataset_id: DatasetId, origin_x: u32, origin_y: u32) -> Self {
        Self {
            dataset_id,
            name: leaf_file_name(origin_x, origin_y),
            origin_x,
            origin_y,
            stream_type: StreamType::SubgridDirectory,
        }
    }

    /// Key of the segment covering `[start, end)` in the leaf at
    /// `(origin_x, origin_y)`.
    #[must_use]
    pub fn segment(
        dataset_id: DatasetId,
        origin_x: u32,
        origin_y: u32,
        start: Timestamp,
        end: Timestamp,
    ) -> Self {
        Self {
            dataset_id,
            name: segment_file_name(origin_x, origin_y, start, end),
            origin_x,
            origin_y,
            stream_type: StreamType::SubgridSegment,
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{} ({}, {})",
            self.dataset_id,
            self.stream_type.as_str(),
            self.name,
            self.origin_x,
            self.origin_y
        )
    }
}

/// `{origin_x:010}-{origin_y:010}.sgl`
#[must_use]
pub fn leaf_file_name(origin_x: u32, origin_y: u32) -> String {
    format!("{origin_x:010}-{origin_y:010}.sgl")
}

/// Leaf file stem followed by the segment range as raw tick bits in hex.
#[must_use]
pub fn segment_file_name(origin_x: u32, origin_y: u32, start: Timestamp, end: Timestamp) -> String {
    format!(
        "{origin_x:010}-{origin_y:010}-{:016x}-{:016x}.sgs",
        start.ticks() as u64,
        end.ticks() as u64
    )
}
