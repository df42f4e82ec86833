//! Leaf storage tuning.

use serde::{Deserialize, Serialize};
use sgl_error::{Result, SubgridError};
use sgl_types::DatasetId;

/// Default cleaving threshold.
pub const DEFAULT_MAX_PASSES_PER_SEGMENT: u32 = 10_000;

/// Settings shared by every leaf of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeafStorageConfig {
    /// Dataset the leaf's streams are written under.
    pub dataset_id: DatasetId,
    /// A mutable segment holding more passes than this is split on save.
    pub max_passes_per_segment: u32,
    /// Write segment bodies in the bit-packed form. Segments persisted this
    /// way reload read-only.
    pub compress_on_save: bool,
}

impl Default for LeafStorageConfig {
    fn default() -> Self {
        Self {
            dataset_id: DatasetId::default(),
            max_passes_per_segment: DEFAULT_MAX_PASSES_PER_SEGMENT,
            compress_on_save: false,
        }
    }
}

impl LeafStorageConfig {
    /// Parse and validate a JSON document. Missing keys take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|err| SubgridError::Config {
            detail: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|err| SubgridError::Config {
            detail: err.to_string(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_passes_per_segment < 2 {
            return Err(SubgridError::Config {
                detail: format!(
                    "max_passes_per_segment must be at least 2, got {}",
                    self.max_passes_per_segment
                ),
            });
        }
        Ok(())
    }
}
