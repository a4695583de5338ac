//! VM error types.
//!
//! Runtime errors that user code can catch are heap objects (class `Error`)
//! and flow through contexts; see the execution engine. [`VmError`] covers
//! the unrecoverable conditions: malformed bytecode reaching the dispatch
//! loop, broken internal invariants, and load failures surfaced while the
//! machine is running.

use thiserror::Error;

/// Result alias for fallible VM operations.
pub type VmResult<T> = Result<T, VmError>;

/// Unrecoverable VM errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VmError {
    /// An op was executed with an operand form it does not accept
    #[error("invalid operand form for op '{op}'")]
    InvalidOperand { op: String },

    /// A broken internal invariant
    #[error("internal error: {message}")]
    Internal { message: String },

    /// A module failed to load while the machine was running
    #[error("load error: {0}")]
    Load(#[from] jv_core::StaticError),
}

impl VmError {
    /// Creates an invalid-operand error.
    pub fn invalid_operand(op: jv_core::Op) -> Self {
        Self::InvalidOperand {
            op: op.as_str().to_owned(),
        }
    }

    /// Creates an internal error.
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
