//! Compiled scripts and code caches

use std::sync::Arc;

use otter_jsvm_bytecode::Program;
use otter_jsvm_compiler::{CompileError, Compiler};
use serde::Deserialize;

use crate::env::Env;
use crate::exception::{Abrupt, Completion};
use crate::interpreter;
use crate::status::{JsvmResult, Status};
use crate::value::Value;

/// Sources up to this many bytes are always compiled eagerly
pub const EAGER_COMPILE_THRESHOLD: usize = 256;

/// Handle to a compiled script
///
/// Unless retained, a script dies with the handle scope that was innermost
/// when it was compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Script {
    pub(crate) table: u32,
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// Where a script came from
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScriptOrigin {
    /// Resource name shown in stack lines and error messages
    pub resource_name: String,
    /// Line offset of the source inside the resource
    pub line: u32,
    /// Column offset of the first source line
    pub column: u32,
}

impl ScriptOrigin {
    /// Origin with the given resource name and no offset
    pub fn new(resource_name: impl Into<String>) -> Self {
        Self {
            resource_name: resource_name.into(),
            line: 0,
            column: 0,
        }
    }
}

/// Options for [`Env::compile_script`]
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Code cache produced by [`Env::create_code_cache`]
    pub cached_data: Option<Vec<u8>>,
    /// Generate bytecode now even for long sources
    pub eager: bool,
    /// Resource the source belongs to
    pub origin: Option<ScriptOrigin>,
}

impl CompileOptions {
    /// Try this code cache before compiling
    pub fn cached_data(mut self, data: Vec<u8>) -> Self {
        self.cached_data = Some(data);
        self
    }

    /// Compile long sources up front
    pub fn eager(mut self, eager: bool) -> Self {
        self.eager = eager;
        self
    }

    /// Set the resource and offsets used in error locations
    pub fn origin(mut self, origin: ScriptOrigin) -> Self {
        self.origin = Some(origin);
        self
    }
}

/// Result of [`Env::compile_script`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompiledScript {
    /// The compiled script
    pub script: Script,
    /// Whether supplied cached data was rejected and the source recompiled
    pub cache_rejected: bool,
}

struct Entry {
    source: Arc<str>,
    /// `None` until a lazily compiled script first runs
    program: Option<Arc<Program>>,
    origin: ScriptOrigin,
    resource: Arc<str>,
    retained: bool,
    /// Serial of the handle frame that owns an unretained script
    owner: u32,
}

#[derive(Default)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Scripts compiled in one Env
pub(crate) struct ScriptTable {
    key: u32,
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl ScriptTable {
    pub(crate) fn new(key: u32) -> Self {
        Self {
            key,
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    fn insert(&mut self, entry: Entry) -> Script {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.entry = Some(entry);
        Script {
            table: self.key,
            index,
            generation: slot.generation,
        }
    }

    fn entry_mut(&mut self, script: Script) -> JsvmResult<&mut Entry> {
        if script.table != self.key {
            return Err(Status::InvalidArg);
        }
        self.slots
            .get_mut(script.index as usize)
            .filter(|s| s.generation == script.generation)
            .and_then(|s| s.entry.as_mut())
            .ok_or(Status::InvalidArg)
    }

    /// Drop unretained scripts owned by the closed frames
    pub(crate) fn release_frames(&mut self, closed: &[u32]) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let dead = slot
                .entry
                .as_ref()
                .is_some_and(|e| !e.retained && closed.contains(&e.owner));
            if dead {
                slot.entry = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

/// Shift a compiler `line:column` by the script origin
fn origin_location(origin: &ScriptOrigin, location: &str) -> Option<String> {
    let (line, column) = location.split_once(':')?;
    let line: u32 = line.parse().ok()?;
    let column: u32 = column.parse().ok()?;
    let column = if line == 1 { column.saturating_add(origin.column) } else { column };
    Some(format!("{}:{}", line.saturating_add(origin.line), column))
}

impl Env {
    fn compile_error(&mut self, error: &CompileError, origin: &ScriptOrigin, resource: &str) -> Abrupt {
        let message = match error.location().and_then(|l| origin_location(origin, l)) {
            Some(location) => format!("{error} ({resource}:{location})"),
            None => error.to_string(),
        };
        self.syntax_error(message)
    }

    fn compile_program(&mut self, source: &str, origin: &ScriptOrigin, resource: &str) -> Completion<Program> {
        Compiler::new()
            .compile(source, resource)
            .map_err(|e| self.compile_error(&e, origin, resource))
    }

    /// Compile `source`
    ///
    /// Cached data that does not decode or was produced from a different
    /// source is rejected; the source is then compiled normally and
    /// `cache_rejected` is set. Syntax errors throw a `SyntaxError`.
    pub fn compile_script(&mut self, source: &str, options: CompileOptions) -> JsvmResult<CompiledScript> {
        let origin = options.origin.unwrap_or_default();
        let resource: Arc<str> = if origin.resource_name.is_empty() {
            Arc::from("<anonymous>")
        } else {
            Arc::from(origin.resource_name.as_str())
        };

        self.script_op(|env| {
            let mut cache_rejected = false;
            let cached = match options.cached_data.as_deref().map(Program::from_bytes) {
                None => None,
                Some(Ok(program)) if program.matches_source(source) => Some(program),
                Some(Ok(_)) => {
                    tracing::debug!(env = env.key, resource = %resource, "code cache rejected: source changed");
                    cache_rejected = true;
                    None
                }
                Some(Err(error)) => {
                    tracing::debug!(env = env.key, resource = %resource, %error, "code cache rejected");
                    cache_rejected = true;
                    None
                }
            };

            let program = match cached {
                Some(program) => Some(Arc::new(program)),
                None if options.eager || source.len() <= EAGER_COMPILE_THRESHOLD => {
                    Some(Arc::new(env.compile_program(source, &origin, &resource)?))
                }
                None => {
                    Compiler::new()
                        .check_syntax(source)
                        .map_err(|e| env.compile_error(&e, &origin, &resource))?;
                    None
                }
            };

            let script = env.scripts.insert(Entry {
                source: Arc::from(source),
                program,
                origin: origin.clone(),
                resource: resource.clone(),
                retained: false,
                owner: env.handles.current_serial(),
            });
            Ok(CompiledScript {
                script,
                cache_rejected,
            })
        })
    }

    /// Serialize the compiled form of `script`
    ///
    /// A long script compiled lazily has no compiled form until it first
    /// runs; asking for its cache is `GenericFailure`.
    pub fn create_code_cache(&mut self, script: Script) -> JsvmResult<Vec<u8>> {
        let entry = self.scripts.entry_mut(script)?;
        let Some(program) = entry.program.as_ref() else {
            return Err(Status::GenericFailure);
        };
        program.to_bytes().map_err(|error| {
            tracing::warn!(%error, "code cache serialization failed");
            Status::GenericFailure
        })
    }

    /// Run `script` in the global scope, returning its completion value
    pub fn run_script(&mut self, script: Script) -> JsvmResult<Value> {
        self.scripts.entry_mut(script)?;
        self.script_op(|env| {
            let entry = env.scripts.entry_mut(script)?;
            let resource = entry.resource.clone();
            let program = match entry.program.clone() {
                Some(program) => program,
                None => {
                    let source = entry.source.clone();
                    let origin = entry.origin.clone();
                    let program = Arc::new(env.compile_program(&source, &origin, &resource)?);
                    env.scripts.entry_mut(script)?.program = Some(program.clone());
                    program
                }
            };

            env.resources.push(resource);
            let result = interpreter::execute(env, &program);
            env.resources.pop();
            let value = result?;
            Ok(env.push(value))
        })
    }

    /// Keep `script` alive past its handle scope
    pub fn retain_script(&mut self, script: Script) -> JsvmResult<()> {
        let entry = self.scripts.entry_mut(script)?;
        if entry.retained {
            return Err(Status::InvalidArg);
        }
        entry.retained = true;
        Ok(())
    }

    /// Tie a retained script to the innermost open handle scope again
    pub fn release_script(&mut self, script: Script) -> JsvmResult<()> {
        let owner = self.handles.current_serial();
        let entry = self.scripts.entry_mut(script)?;
        if !entry.retained {
            return Err(Status::InvalidArg);
        }
        entry.retained = false;
        entry.owner = owner;
        Ok(())
    }

    /// Number of live compiled scripts
    pub fn script_count(&self) -> usize {
        self.scripts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_location_offsets() {
        let origin = ScriptOrigin {
            resource_name: "app.js".into(),
            line: 10,
            column: 4,
        };
        assert_eq!(origin_location(&origin, "1:3").as_deref(), Some("11:7"));
        assert_eq!(origin_location(&origin, "2:3").as_deref(), Some("12:3"));
        assert_eq!(origin_location(&origin, "bogus"), None);

        let origin = ScriptOrigin {
            resource_name: "app.js".into(),
            line: u32::MAX,
            column: u32::MAX,
        };
        assert_eq!(
            origin_location(&origin, "1:3").as_deref(),
            Some("4294967295:4294967295")
        );
        assert_eq!(origin_location(&origin, "2:3").as_deref(), Some("4294967295:3"));
    }

    #[test]
    fn test_release_frames_spares_retained() {
        let mut table = ScriptTable::new(1);
        let entry = |retained, owner| Entry {
            source: Arc::from("1"),
            program: None,
            origin: ScriptOrigin::default(),
            resource: Arc::from("<anonymous>"),
            retained,
            owner,
        };
        let kept = table.insert(entry(true, 5));
        let dropped = table.insert(entry(false, 5));
        let other = table.insert(entry(false, 6));

        table.release_frames(&[5]);
        assert!(table.entry_mut(kept).is_ok());
        assert_eq!(table.entry_mut(dropped).err(), Some(Status::InvalidArg));
        assert!(table.entry_mut(other).is_ok());
        assert_eq!(table.len(), 2);
    }
}
