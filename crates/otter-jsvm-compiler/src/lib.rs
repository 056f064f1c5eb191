//! # Otter JSVM Compiler
//!
//! Compiles script source to `otter-jsvm-bytecode` using the oxc parser.
//!
//! ## Pipeline
//!
//! 1. Parse source with oxc as a classic (non-module) script
//! 2. Walk the AST and emit stack bytecode
//! 3. Stamp the program with the SHA-256 of its source

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod codegen;
pub mod compiler;
pub mod error;

pub use compiler::Compiler;
pub use error::{CompileError, CompileResult};
