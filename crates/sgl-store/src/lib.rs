//! Block-store boundary for subgrid leaf persistence.
//!
//! The engine never touches storage directly; it reads and writes opaque
//! byte streams through [`BlockStore`]. Each successful write reports the
//! granules it occupies so the caller can record the location in its
//! directory and pass it back as a hint on the next read.

use std::future::Future;

use sgl_error::Result;
use sgl_types::GranuleRef;

pub mod file;
pub mod key;
pub mod memory;

pub use file::FileBlockStore;
pub use key::{StreamKey, StreamType, leaf_file_name, segment_file_name};
pub use memory::MemoryBlockStore;

/// Allocation unit used to report how many granules a stream spans.
pub const GRANULE_BYTES: usize = 4096;

/// Number of granules needed for `len` bytes. An empty stream still
/// occupies one granule.
#[must_use]
pub fn granules_for(len: usize) -> u32 {
    u32::try_from(len.div_ceil(GRANULE_BYTES).max(1)).unwrap_or(u32::MAX)
}

/// Bytes returned by a stream read together with where they were found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRead {
    pub bytes: Vec<u8>,
    pub granule: GranuleRef,
}

/// Persistent store of subgrid directory and segment streams.
///
/// Operations are asynchronous so callers can overlap I/O across subgrids.
/// A missing stream is reported as [`sgl_error::SubgridError::NotFound`],
/// distinct from a read failure.
pub trait BlockStore: Send + Sync {
    /// Read the stream at `key`.
    ///
    /// `granule_hint` is the location recorded by a previous write. It is
    /// advisory: a store that finds the stream elsewhere returns the current
    /// location.
    ///
    /// # Errors
    ///
    /// `NotFound` when no stream exists, `StorageRead` on I/O failure.
    fn read_stream(
        &self,
        key: &StreamKey,
        granule_hint: Option<GranuleRef>,
    ) -> impl Future<Output = Result<StreamRead>> + Send;

    /// Replace the stream at `key` with `bytes`.
    ///
    /// # Errors
    ///
    /// `StorageWrite` when the bytes could not be stored.
    fn write_stream(
        &self,
        key: &StreamKey,
        bytes: Vec<u8>,
    ) -> impl Future<Output = Result<GranuleRef>> + Send;

    /// Delete the stream at `key`. Returns whether a stream was present.
    ///
    /// # Errors
    ///
    /// `StorageWrite` when an existing stream could not be removed.
    fn remove_stream(&self, key: &StreamKey) -> impl Future<Output = Result<bool>> + Send;
}
