//! Compilation errors

use thiserror::Error;

/// Compilation errors
#[derive(Debug, Error)]
pub enum CompileError {
    /// The parser rejected the source
    #[error("{0}")]
    Parse(String),

    /// Valid JavaScript outside the supported subset
    #[error("Unsupported: {feature}")]
    Unsupported {
        /// Feature description
        feature: String,
        /// Source location, `line:column`
        location: String,
    },

    /// Too many constants
    #[error("Too many constants (max 4294967295)")]
    TooManyConstants,

    /// Internal compiler error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CompileError {
    /// Create an unsupported error
    pub fn unsupported(feature: impl Into<String>, line: u32, column: u32) -> Self {
        Self::Unsupported {
            feature: feature.into(),
            location: format!("{}:{}", line, column),
        }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Source location of the error, if known
    pub fn location(&self) -> Option<&str> {
        match self {
            Self::Unsupported { location, .. } => Some(location),
            _ => None,
        }
    }
}

/// Result type for compilation
pub type CompileResult<T> = Result<T, CompileError>;

/// 1-based line and column of a byte offset in `source`
pub fn line_column(source: &str, offset: u32) -> (u32, u32) {
    let offset = (offset as usize).min(source.len());
    let mut line = 1u32;
    let mut column = 1u32;
    for (idx, ch) in source.char_indices() {
        if idx >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line, column)
}
