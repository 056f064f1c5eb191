//! Native callback types

use std::any::Any;
use std::sync::Arc;

use crate::env::Env;
use crate::status::JsvmResult;
use crate::value::Value;

/// Opaque data attached to a native function or property
pub type CallbackData = Arc<dyn Any + Send + Sync>;

/// Opaque native data owned by the engine until finalized
pub type NativeData = Box<dyn Any + Send>;

/// A native function callable from script
///
/// Returning `Ok(None)` yields `undefined`. An `Err` without a pending
/// exception is raised in script as an `Error` carrying the status message.
pub type Callback = Arc<dyn Fn(&mut Env, &CallbackInfo) -> JsvmResult<Option<Value>> + Send + Sync>;

/// Releases native data when its owner is collected or its Env is destroyed
pub type Finalizer = Box<dyn FnOnce(&mut Env, NativeData) + Send>;

/// A host microtask or macrotask
pub type NativeTask = Box<dyn FnOnce(&mut Env) -> JsvmResult<()> + Send>;

/// Wrap a closure as a [`Callback`]
pub fn callback<F>(f: F) -> Callback
where
    F: Fn(&mut Env, &CallbackInfo) -> JsvmResult<Option<Value>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Arguments of a native call
///
/// Every handle here lives in the frame the engine opened for the call.
pub struct CallbackInfo {
    pub(crate) this: Value,
    pub(crate) args: Vec<Value>,
    pub(crate) new_target: Option<Value>,
    pub(crate) data: Option<CallbackData>,
}

impl CallbackInfo {
    /// The receiver
    pub fn this(&self) -> Value {
        self.this
    }

    /// All arguments
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Argument `index`, if passed
    pub fn arg(&self, index: usize) -> Option<Value> {
        self.args.get(index).copied()
    }

    /// Number of arguments passed
    pub fn argc(&self) -> usize {
        self.args.len()
    }

    /// The constructor when called through `new`
    pub fn new_target(&self) -> Option<Value> {
        self.new_target
    }

    /// Data registered with the function
    pub fn data(&self) -> Option<&CallbackData> {
        self.data.as_ref()
    }

    /// Data registered with the function, downcast to `T`
    pub fn data_as<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.data.as_ref().and_then(|d| d.downcast_ref::<T>())
    }
}
