//! Error taxonomy for the container and block codecs.

use thiserror::Error;

/// Errors raised while encoding or loading a model file.
#[derive(Debug, Error)]
pub enum FormatError {
    /// A header field does not fit its width or the model dims are unusable.
    #[error("invalid config: {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// A tensor shape cannot be stored in the requested encoding.
    #[error("invalid shape: {reason}")]
    InvalidShape { reason: String },

    /// A block codec call received the wrong number of elements.
    #[error("invalid block size: expected {expected} elements, got {actual}")]
    InvalidBlockSize { expected: usize, actual: usize },

    /// A tensor region started off an alignment boundary. Always a codec defect.
    #[error("alignment violation: offset {offset} is not a multiple of {alignment}")]
    AlignmentViolation { offset: u64, alignment: u64 },

    #[error("bad magic 0x{found:08X} (expected 0x{expected:08X})")]
    InvalidMagic { found: u32, expected: u32 },

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),

    /// Header or region arithmetic points past the end of the data.
    #[error("truncated model data: need {needed} bytes, have {actual}")]
    Truncated { needed: u64, actual: u64 },

    #[error("unsupported source dtype {0}")]
    UnsupportedDtype(String),

    #[error("tensor not found in source: {0}")]
    MissingTensor(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Tensor(#[from] candle_core::Error),

    #[error(transparent)]
    Safetensors(#[from] safetensors::SafeTensorError),
}

pub type Result<T> = std::result::Result<T, FormatError>;

impl FormatError {
    pub(crate) fn config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn shape(reason: impl Into<String>) -> Self {
        Self::InvalidShape {
            reason: reason.into(),
        }
    }
}
