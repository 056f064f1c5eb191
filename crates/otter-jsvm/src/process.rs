//! Process-wide engine initialization
//!
//! The only global mutable state in the crate. `init` is one-shot and
//! idempotent: the first call parses flags, later calls succeed without
//! touching them.

use std::sync::OnceLock;

use crate::config::InitOptions;
use crate::status::JsvmResult;

/// Default native/script re-entrancy depth limit
pub const DEFAULT_MAX_CALL_DEPTH: u32 = 256;

/// Flags recognized by [`init`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessFlags {
    /// Install a global `gc()` in every new environment
    pub expose_gc: bool,
    /// Maximum nesting of calls across the native/script boundary
    pub max_call_depth: u32,
    /// Default hard heap limit in bytes for VMs that set none
    pub max_old_space_size: Option<usize>,
}

impl Default for ProcessFlags {
    fn default() -> Self {
        Self {
            expose_gc: false,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            max_old_space_size: None,
        }
    }
}

impl ProcessFlags {
    /// Parse flags, returning the ones not recognized
    fn parse(flags: &[String]) -> (Self, Vec<String>) {
        let mut parsed = Self::default();
        let mut unrecognized = Vec::new();

        for flag in flags {
            if !parsed.apply(flag) {
                unrecognized.push(flag.clone());
            }
        }

        (parsed, unrecognized)
    }

    fn apply(&mut self, flag: &str) -> bool {
        let normalized = flag.replace('_', "-");
        if normalized == "--expose-gc" {
            self.expose_gc = true;
            return true;
        }
        if let Some(value) = normalized.strip_prefix("--max-call-depth=") {
            return match value.parse::<u32>() {
                Ok(depth) if depth > 0 => {
                    self.max_call_depth = depth;
                    true
                }
                _ => false,
            };
        }
        if let Some(value) = normalized.strip_prefix("--max-old-space-size=") {
            return match value.parse::<usize>() {
                Ok(mb) => {
                    self.max_old_space_size = Some(mb.saturating_mul(1024 * 1024));
                    true
                }
                Err(_) => false,
            };
        }
        false
    }
}

static PROCESS: OnceLock<ProcessFlags> = OnceLock::new();

/// Initialize the engine for this process
///
/// Returns the flag list handed back to the host: the unrecognized flags when
/// `remove_flags` is set, otherwise every flag as given.
pub fn init(options: InitOptions) -> JsvmResult<Vec<String>> {
    let mut remaining = None;
    PROCESS.get_or_init(|| {
        let (flags, unrecognized) = ProcessFlags::parse(&options.flags);
        tracing::debug!(
            expose_gc = flags.expose_gc,
            max_call_depth = flags.max_call_depth,
            max_old_space_size = ?flags.max_old_space_size,
            unrecognized = unrecognized.len(),
            "jsvm process initialized"
        );
        remaining = Some(unrecognized);
        flags
    });

    match remaining {
        Some(unrecognized) if options.remove_flags => Ok(unrecognized),
        _ => Ok(options.flags),
    }
}

/// Whether [`init`] has completed
pub fn is_initialized() -> bool {
    PROCESS.get().is_some()
}

/// Flags parsed by the first [`init`] call
pub fn process_flags() -> Option<&'static ProcessFlags> {
    PROCESS.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(flags: &[&str]) -> Vec<String> {
        flags.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_flags() {
        let (flags, rest) = ProcessFlags::parse(&strings(&[
            "--expose_gc",
            "--max-call-depth=8",
            "--max-old-space-size=2",
            "--jitless",
            "--max-call-depth=nope",
        ]));
        assert!(flags.expose_gc);
        assert_eq!(flags.max_call_depth, 8);
        assert_eq!(flags.max_old_space_size, Some(2 * 1024 * 1024));
        assert_eq!(rest, strings(&["--jitless", "--max-call-depth=nope"]));
    }

    #[test]
    fn test_defaults() {
        let (flags, rest) = ProcessFlags::parse(&[]);
        assert_eq!(flags, ProcessFlags::default());
        assert!(rest.is_empty());
    }
}
