//! Error types for the extraction core.

use thiserror::Error;

use crate::reader::ReadError;

/// Errors that can occur while building axes, pixel maps or running an
/// extraction.
#[derive(Debug, Error)]
pub enum GridExtractError {
    /// An axis could not be classified as any supported variant.
    /// Fatal for the affected layer, surfaced at metadata-load time.
    #[error("unsupported axis: {0}")]
    UnsupportedAxis(String),

    /// The x and y axes are of incompatible kinds (1-D paired with 2-D,
    /// or a 2-D mesh without longitude/latitude tagging).
    #[error("mismatched axis configuration: {0}")]
    MismatchedAxes(String),

    /// Invalid layer or variable metadata.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// A dimension value (elevation, time) did not match the layer.
    #[error("invalid {dimension} value: {value}")]
    InvalidDimensionValue { dimension: String, value: String },

    /// The requested layer is not in the dataset's current snapshot.
    #[error("layer not found: {0}")]
    LayerNotFound(String),

    /// Failure reported by the array-reader collaborator.
    #[error(transparent)]
    Read(#[from] ReadError),

    /// Failure fingerprinting the source for the tile cache key.
    #[error("fingerprint error: {0}")]
    Fingerprint(String),

    /// Metadata (re)load failed; the dataset moves to the Error state.
    #[error("metadata load failed for {location}: {message}")]
    MetadataLoad { location: String, message: String },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl GridExtractError {
    /// Create an UnsupportedAxis error.
    pub fn unsupported_axis(msg: impl Into<String>) -> Self {
        Self::UnsupportedAxis(msg.into())
    }

    /// Create a MismatchedAxes error.
    pub fn mismatched_axes(msg: impl Into<String>) -> Self {
        Self::MismatchedAxes(msg.into())
    }

    /// Create an InvalidMetadata error.
    pub fn invalid_metadata(msg: impl Into<String>) -> Self {
        Self::InvalidMetadata(msg.into())
    }

    /// Create an InvalidDimensionValue error.
    pub fn invalid_dimension_value(dimension: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidDimensionValue {
            dimension: dimension.into(),
            value: value.into(),
        }
    }

    /// Create a LayerNotFound error.
    pub fn layer_not_found(layer: impl Into<String>) -> Self {
        Self::LayerNotFound(layer.into())
    }

    /// Create a MetadataLoad error.
    pub fn metadata_load(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MetadataLoad {
            location: location.into(),
            message: message.into(),
        }
    }
}

impl From<storage::StorageError> for GridExtractError {
    fn from(err: storage::StorageError) -> Self {
        Self::Fingerprint(err.to_string())
    }
}

/// Result type for extraction operations.
pub type Result<T> = std::result::Result<T, GridExtractError>;
