//! Native data attached to script objects
//!
//! Wrapped data, external payloads, type tags and extra finalizers live in a
//! side table on the object (`NativeSlots`). The engine owns the data until
//! the object is collected or the Env is destroyed; the finalizer then gets
//! it back through the Env finalization queue.

use std::any::Any;

use crate::callback::{Finalizer, NativeData};
use crate::env::Env;
use crate::object::{JsObject, ObjectKind};
use crate::status::{JsvmResult, Status};
use crate::value::{JsValue, Value};

/// 128-bit tag identifying the native type behind an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeTag {
    /// Low 64 bits
    pub lower: u64,
    /// High 64 bits
    pub upper: u64,
}

impl TypeTag {
    /// A tag from its two halves
    pub const fn new(lower: u64, upper: u64) -> Self {
        Self { lower, upper }
    }
}

impl Env {
    fn native_object(&self, object: Value) -> JsvmResult<&JsObject> {
        let id = self.object_arg(object)?;
        self.object(id).ok_or(Status::ObjectExpected)
    }

    fn native_object_mut(&mut self, object: Value) -> JsvmResult<&mut JsObject> {
        let id = self.object_arg(object)?;
        self.object_mut(id).ok_or(Status::ObjectExpected)
    }

    /// Attach `data` to `object`; an object carries at most one wrap
    pub fn wrap(
        &mut self,
        object: Value,
        data: NativeData,
        finalizer: Option<Finalizer>,
    ) -> JsvmResult<()> {
        let object = self.native_object_mut(object)?;
        let native = object.native_mut();
        if native.wrap.is_some() {
            return Err(Status::InvalidArg);
        }
        native.wrap = Some((data, finalizer));
        Ok(())
    }

    /// Borrow the data wrapped by `object`
    pub fn unwrap(&self, object: Value) -> JsvmResult<&(dyn Any + Send)> {
        self.native_object(object)?
            .native
            .as_ref()
            .and_then(|n| n.wrap.as_ref())
            .map(|(data, _)| data.as_ref())
            .ok_or(Status::InvalidArg)
    }

    /// Borrow the wrapped data as `T`
    pub fn unwrap_as<T: Any + Send>(&self, object: Value) -> JsvmResult<&T> {
        self.unwrap(object)?
            .downcast_ref::<T>()
            .ok_or(Status::InvalidArg)
    }

    /// Detach and return the wrapped data; its finalizer is dropped unrun
    pub fn remove_wrap(&mut self, object: Value) -> JsvmResult<NativeData> {
        let object = self.native_object_mut(object)?;
        let removed = object.native.as_mut().and_then(|n| n.wrap.take());
        object.trim_native();
        removed.map(|(data, _)| data).ok_or(Status::InvalidArg)
    }

    /// Tag `object` with a native type; an object is tagged at most once
    pub fn type_tag_object(&mut self, object: Value, tag: TypeTag) -> JsvmResult<()> {
        let object = self.native_object_mut(object)?;
        let native = object.native_mut();
        if native.type_tag.is_some() {
            return Err(Status::InvalidArg);
        }
        native.type_tag = Some(tag);
        Ok(())
    }

    /// Whether `object` carries exactly `tag`
    pub fn check_object_type_tag(&self, object: Value, tag: TypeTag) -> JsvmResult<bool> {
        let object = self.native_object(object)?;
        Ok(object.native.as_ref().and_then(|n| n.type_tag) == Some(tag))
    }

    /// Run `finalizer` with `data` once `object` is collected
    pub fn add_finalizer(
        &mut self,
        object: Value,
        data: NativeData,
        finalizer: Finalizer,
    ) -> JsvmResult<()> {
        let object = self.native_object_mut(object)?;
        object.native_mut().finalizers.push((data, finalizer));
        Ok(())
    }

    /// Queue a finalizer to run at the next safepoint
    ///
    /// Lets a finalizer defer work that must not happen while the
    /// finalization queue is being drained.
    pub fn post_finalizer(&mut self, data: NativeData, finalizer: Finalizer) -> JsvmResult<()> {
        self.finalization_queue.push_back((data, finalizer));
        Ok(())
    }

    /// Create an object carrying native `data`
    pub fn create_external(
        &mut self,
        data: NativeData,
        finalizer: Option<Finalizer>,
    ) -> JsvmResult<Value> {
        self.op(|env| {
            let id = env.alloc_object(ObjectKind::External, None)?;
            if let Some(object) = env.object_mut(id) {
                object.native_mut().external = Some((data, finalizer));
            }
            Ok(env.push(JsValue::Object(id)))
        })
    }

    /// Borrow the data of an external value
    pub fn get_value_external(&self, value: Value) -> JsvmResult<&(dyn Any + Send)> {
        let object = self.native_object(value)?;
        if !matches!(object.kind, ObjectKind::External) {
            return Err(Status::InvalidArg);
        }
        object
            .native
            .as_ref()
            .and_then(|n| n.external.as_ref())
            .map(|(data, _)| data.as_ref())
            .ok_or(Status::InvalidArg)
    }
}
