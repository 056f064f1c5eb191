//! CLI command implementations.

pub mod eval;
pub mod run;
pub mod snapshot;
