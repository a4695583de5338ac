//! I/O error types.

use thiserror::Error;

/// Result alias for serialization operations.
pub type IoResult<T> = Result<T, IoError>;

/// Errors produced while reading or writing binary data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IoError {
    /// Attempted to read past the end of the input
    #[error("end of stream: needed {needed} more bytes, {available} available")]
    EndOfStream { needed: usize, available: usize },

    /// A length prefix exceeds the allowed maximum
    #[error("length {length} exceeds maximum {max}")]
    LengthTooLong { length: u64, max: u64 },

    /// A byte sequence is not valid UTF-8
    #[error("invalid UTF-8 in string data")]
    InvalidUtf8,

    /// A value is outside its legal range
    #[error("invalid value: {reason}")]
    InvalidValue { reason: String },
}

impl IoError {
    /// Creates an invalid-value error.
    pub fn invalid_value<S: Into<String>>(reason: S) -> Self {
        Self::InvalidValue {
            reason: reason.into(),
        }
    }
}
