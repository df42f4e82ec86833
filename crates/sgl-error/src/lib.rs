//! Error type shared by every subgrid leaf storage crate.
//!
//! The taxonomy follows the layers of the engine: codec misuse
//! ([`SubgridError::ImmutableStore`]), on-disk framing
//! ([`SubgridError::Format`]), block-store I/O ([`SubgridError::NotFound`],
//! [`SubgridError::StorageRead`], [`SubgridError::StorageWrite`]) and
//! programmer errors upstream ([`SubgridError::InvariantViolation`]).

use thiserror::Error;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, SubgridError>;

/// Errors produced by subgrid leaf storage.
#[derive(Debug, Error)]
pub enum SubgridError {
    /// A mutator was invoked on a write-once compressed pass store.
    #[error("compressed pass store is immutable: {operation} rejected")]
    ImmutableStore { operation: &'static str },

    /// Directory or segment stream failed magic/version/flag validation or
    /// its body is malformed.
    #[error("format error: {detail}")]
    Format { detail: String },

    /// The block store holds no stream for the requested key.
    #[error("stream not found: {key}")]
    NotFound { key: String },

    /// The block store failed while reading a stream.
    #[error("storage read failed for {key}: {detail}")]
    StorageRead { key: String, detail: String },

    /// The block store failed while writing a stream.
    #[error("storage write failed for {key}: {detail}")]
    StorageWrite { key: String, detail: String },

    /// A precondition that callers are responsible for was broken.
    #[error("invariant violation: {detail}")]
    InvariantViolation { detail: String },

    /// An operation needed a segment that is not resident in memory.
    #[error("segment starting at tick {start_ticks} is not loaded")]
    SegmentNotLoaded { start_ticks: i64 },

    /// A value does not fit the range required by the format or grid.
    #[error("{what} out of range: {value}")]
    OutOfRange { what: String, value: String },

    /// Configuration could not be parsed or is inconsistent.
    #[error("invalid configuration: {detail}")]
    Config { detail: String },

    /// Catch-all for conditions that indicate a bug in this workspace.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SubgridError {
    /// Build an [`SubgridError::Internal`] from any message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Build a [`SubgridError::Format`] from any message.
    pub fn format(detail: impl Into<String>) -> Self {
        Self::Format {
            detail: detail.into(),
        }
    }

    /// Build an [`SubgridError::InvariantViolation`] from any message.
    pub fn invariant(detail: impl Into<String>) -> Self {
        Self::InvariantViolation {
            detail: detail.into(),
        }
    }

    /// Build an [`SubgridError::OutOfRange`].
    pub fn out_of_range(what: impl Into<String>, value: impl ToString) -> Self {
        Self::OutOfRange {
            what: what.into(),
            value: value.to_string(),
        }
    }

    /// Whether this error reports a missing stream rather than a failure.
    ///
    /// A missing stream during a first write is a legitimate state and must
    /// not be treated as corruption.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether the error came from the block store (read or write side).
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::StorageRead { .. } | Self::StorageWrite { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_distinct_from_read_failure() {
        let missing = SubgridError::NotFound {
            key: "0000000001-0000000002.sgl".to_owned(),
        };
        let failed = SubgridError::StorageRead {
            key: "0000000001-0000000002.sgl".to_owned(),
            detail: "disk on fire".to_owned(),
        };
        assert!(missing.is_not_found());
        assert!(!failed.is_not_found());
        assert!(missing.is_storage());
        assert!(failed.is_storage());
    }

    #[test]
    fn test_display_carries_detail() {
        let err = SubgridError::format("bad magic [0, 1]");
        assert_eq!(err.to_string(), "format error: bad magic [0, 1]");

        let err = SubgridError::ImmutableStore {
            operation: "add_pass",
        };
        assert!(err.to_string().contains("add_pass"));
        assert!(!err.is_storage());
    }

    #[test]
    fn test_out_of_range_formats_value() {
        let err = SubgridError::out_of_range("cell x", 40_u32);
        assert_eq!(err.to_string(), "cell x out of range: 40");
    }
}
