//! Subgrid leaf storage engine.
//!
//! A [`SubgridLeaf`] holds the cell-pass history of one 32×32 subgrid split
//! into time-ordered [`Segment`]s. Each segment stores its passes either in a
//! growable [`MutablePassStore`] or in the packed
//! [`sgl_codec::CompressedPassStore`], and carries a [`LatestValueSummary`]
//! folded forward from its predecessor. The [`SegmentDirectory`] indexes the
//! segments without loading them and holds the leaf-wide latest values.
//!
//! Persistence goes through [`sgl_store::BlockStore`]: one directory stream
//! per leaf plus one stream per segment, framed by [`persistence`].

pub mod cleave;
pub mod config;
pub mod directory;
pub mod integrate;
pub mod latest;
pub mod leaf;
pub mod mutable;
pub mod persistence;
pub mod segment;

pub use config::{DEFAULT_MAX_PASSES_PER_SEGMENT, LeafStorageConfig};
pub use directory::{SEGMENT_DESCRIPTOR_BYTES, SegmentDescriptor, SegmentDirectory};
pub use integrate::IntegrationStats;
pub use latest::{LatestCell, LatestValueSummary, compute_latest_for_cell};
pub use leaf::{SaveStats, SubgridLeaf};
pub use mutable::{AddOutcome, MergeCounts, MutablePassStore};
pub use persistence::{FORMAT_MAJOR, FORMAT_MINOR, LEAF_MAGIC, StreamHeader};
pub use segment::{Segment, SegmentId, SegmentStore, TimeRange};
