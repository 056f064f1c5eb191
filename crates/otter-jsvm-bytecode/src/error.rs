//! Bytecode errors

use thiserror::Error;

/// Errors that can occur while encoding or decoding a code cache
#[derive(Debug, Error)]
pub enum BytecodeError {
    /// Invalid magic bytes in the blob
    #[error("Invalid magic bytes")]
    InvalidMagic,

    /// Unsupported cache format version
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u32),

    /// Unexpected end of the blob
    #[error("Unexpected end of bytecode")]
    UnexpectedEnd,

    /// Payload could not be (de)serialized
    #[error("Malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Result type for bytecode operations
pub type Result<T> = std::result::Result<T, BytecodeError>;
