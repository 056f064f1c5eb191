//! # Otter JSVM Bytecode
//!
//! Bytecode format executed by the `otter-jsvm` interpreter.
//!
//! ## Design Principles
//!
//! - **Stack-based**: Operands live on the Env's value stack, which keeps every
//!   intermediate value visible to the collector
//! - **Self-validating**: Every [`Program`] records the SHA-256 of the source it
//!   was compiled from, so a code cache can be checked against new source
//! - **Serializable**: Programs round-trip through the code-cache blob format

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod constant;
pub mod error;
pub mod instruction;
pub mod operand;
pub mod program;

pub use constant::{Constant, ConstantPool};
pub use error::{BytecodeError, Result};
pub use instruction::{BinaryOp, Instruction, UnaryOp};
pub use operand::{ConstantIndex, JumpOffset};
pub use program::{Program, source_hash};

/// Code-cache format version. Bumped whenever [`Instruction`] changes shape.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Magic bytes that open every code-cache blob
pub const CACHE_MAGIC: [u8; 8] = *b"OTJSVMC\0";
