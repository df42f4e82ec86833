use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of the dataset (site model) a subgrid belongs to.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct DatasetId(pub u64);

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Location of a stream inside the block store, as returned by a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GranuleRef {
    /// First granule holding the stream.
    pub index: u32,
    /// Number of granules the stream spans.
    pub count: u32,
}

impl fmt::Display for GranuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "granule {}+{}", self.index, self.count)
    }
}
