//! Static error taxonomy.
//!
//! Static errors are raised while a program is being assembled, linked or
//! decoded, before any task runs. They abort the pipeline and surface at the
//! command line; runtime errors are heap objects and live in `jv-vm`.

use thiserror::Error;

/// Result alias for static-phase operations.
pub type StaticResult<T> = Result<T, StaticError>;

/// Errors produced while building or decoding a tape.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StaticError {
    /// Unknown op mnemonic in assembly input
    #[error("{file}:{line}: unknown op '{mnemonic}'")]
    UnknownOp {
        file: String,
        line: usize,
        mnemonic: String,
    },

    /// Malformed operand for an instruction
    #[error("{file}:{line}: bad operand for '{op}': {reason}")]
    BadOperand {
        file: String,
        line: usize,
        op: String,
        reason: String,
    },

    /// Malformed assembly structure (unterminated class, stray directive, ...)
    #[error("{file}:{line}: {message}")]
    Malformed {
        file: String,
        line: usize,
        message: String,
    },

    /// Binary tape is not in the expected format
    #[error("invalid bytecode: {reason}")]
    InvalidBytecode { reason: String },

    /// Binary tape declares a format version this build cannot read
    #[error("unsupported bytecode version {version} (expected {expected})")]
    UnsupportedVersion { version: u16, expected: u16 },

    /// Underlying I/O failure
    #[error("I/O error: {message}")]
    Io { message: String },

    /// A module file could not be located
    #[error("module '{name}' not found")]
    ModuleNotFound { name: String },

    /// A file extension no registered loader understands
    #[error("no loader for '{path}': unsupported extension")]
    UnsupportedExtension { path: String },
}

impl StaticError {
    /// Creates a malformed-input error.
    pub fn malformed<S: Into<String>>(file: S, line: usize, message: S) -> Self {
        Self::Malformed {
            file: file.into(),
            line,
            message: message.into(),
        }
    }

    /// Creates an invalid-bytecode error.
    pub fn invalid_bytecode<S: Into<String>>(reason: S) -> Self {
        Self::InvalidBytecode {
            reason: reason.into(),
        }
    }

    /// Creates an I/O wrapper error.
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for StaticError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<jv_io::IoError> for StaticError {
    fn from(err: jv_io::IoError) -> Self {
        Self::invalid_bytecode(err.to_string())
    }
}
