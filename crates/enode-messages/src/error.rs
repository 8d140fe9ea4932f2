//! Codec errors.

use thiserror::Error;

/// Wire decoding failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Ran out of bytes mid-field.
    #[error("truncated message: wanted {wanted} more bytes")]
    Truncated { wanted: usize },

    /// Length prefix exceeds sane bounds.
    #[error("oversized field: {0} bytes")]
    Oversized(usize),

    /// Trailing garbage after the last declared field.
    #[error("trailing bytes: {0}")]
    TrailingBytes(usize),

    /// A field held an invalid value.
    #[error("invalid field: {0}")]
    InvalidField(String),
}
