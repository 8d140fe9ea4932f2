//! Type-level errors.

use thiserror::Error;

/// Errors building or parsing core types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    /// Wrong byte length for a fixed-size value.
    #[error("invalid length: got {got} bytes, expected {expected}")]
    InvalidLength { got: usize, expected: usize },

    /// Hex decoding failed.
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    /// Address is not usable in the election path.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Script does not have the canonical payment form.
    #[error("invalid script: {0}")]
    InvalidScript(String),
}
