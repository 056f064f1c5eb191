//! # Otter JSVM
//!
//! Embedding contract for a JavaScript virtual machine: how a native host
//! creates VMs and environments, exchanges values through scoped handles,
//! keeps values alive with references, observes script exceptions, caches
//! compiled scripts and drives microtasks.
//!
//! ## Design
//!
//! - **Handles, not pointers**: [`Value`], [`Reference`], [`Script`] and the
//!   scope types are indices checked against their owning table, so stale or
//!   foreign handles fail with [`Status::InvalidArg`]
//! - **Status returns**: every operation returns [`JsvmResult`]; a script
//!   throw lands in the Env's pending-exception slot and surfaces as
//!   [`Status::PendingException`]
//! - **Safepoint GC**: each [`Env`] owns a mark/sweep heap that is only
//!   collected between host operations, with handles, references and queued
//!   work as roots
//! - **Host-built data**: array buffers, typed arrays, data views, BigInts
//!   and dates are created by the host through [`Env`]; scripts read and
//!   write them through their prototype methods
//!
//! ## Usage
//!
//! ```ignore
//! otter_jsvm::init(InitOptions::default())?;
//! let mut vm = Vm::create(VmOptions::default())?;
//! let id = vm.create_env(&[])?;
//! let env = vm.env_mut(id)?;
//! let scope = env.open_handle_scope()?;
//! let compiled = env.compile_script("40 + 2", CompileOptions::default())?;
//! let value = env.run_script(compiled.script)?;
//! assert_eq!(env.get_value_int32(value)?, 42);
//! env.close_handle_scope(scope)?;
//! ```

#![warn(clippy::all)]
#![warn(missing_docs)]

mod api;
mod bigint;
mod buffer;
mod builtins;
pub mod callback;
mod class;
pub mod config;
mod date;
mod env;
mod exception;
mod handle_scope;
mod interpreter;
mod json;
mod lock;
mod microtask;
mod object;
mod ops;
mod process;
mod promise;
pub mod property;
mod reference;
mod script;
mod snapshot;
pub mod status;
mod value;
mod vm;
mod wrap;

pub use buffer::{DataViewInfo, TypedArrayInfo, TypedArrayType};
pub use callback::{Callback, CallbackData, CallbackInfo, Finalizer, NativeData, NativeTask, callback};
pub use config::{InitOptions, VmOptions};
pub use env::{Env, EnvId, HeapStatistics};
pub use exception::ErrorInfo;
pub use handle_scope::{EscapableHandleScope, HandleScope};
pub use lock::SharedVm;
pub use microtask::MicrotaskPolicy;
pub use process::{DEFAULT_MAX_CALL_DEPTH, ProcessFlags, init, is_initialized, process_flags};
pub use promise::{Deferred, PromiseRejectEvent, PromiseRejectMessage};
pub use property::{
    Accessor, KeyCollectionMode, KeyConversion, KeyFilter, PropertyAttributes, PropertyDescriptor,
    PropertyName,
};
pub use reference::Reference;
pub use script::{CompileOptions, CompiledScript, EAGER_COMPILE_THRESHOLD, Script, ScriptOrigin};
pub use snapshot::{SNAPSHOT_FORMAT_VERSION, SNAPSHOT_MAGIC};
pub use status::{JsvmResult, Status};
pub use value::{Value, ValueType};
pub use vm::{EnvScope, FatalErrorHandler, OomHandler, PromiseRejectHandler, Vm, VmScope};
pub use wrap::TypeTag;

/// Version of the embedding contract implemented by this crate
pub const JSVM_VERSION: u32 = 8;

/// Version of the embedding contract implemented by this crate
pub fn get_version() -> u32 {
    JSVM_VERSION
}
