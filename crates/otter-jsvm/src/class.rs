//! Host-defined classes

use crate::callback::{Callback, CallbackData};
use crate::env::Env;
use crate::exception::Abrupt;
use crate::object::{PropertyKey, PropertySlot};
use crate::property::PropertyDescriptor;
use crate::status::{JsvmResult, Status};
use crate::value::{JsValue, Value};

impl Env {
    /// A constructor named `name` backed by `constructor`
    ///
    /// Descriptors flagged `STATIC` land on the constructor itself; the rest
    /// land on its `prototype`. `new` on the result calls `constructor` with
    /// a fresh instance of that prototype as `this`.
    pub fn define_class(
        &mut self,
        name: &str,
        constructor: Callback,
        data: Option<CallbackData>,
        properties: &[PropertyDescriptor],
    ) -> JsvmResult<Value> {
        self.op(|env| {
            let class = env.alloc_function(name, constructor, data, true)?;
            let prototype = env
                .object(class)
                .and_then(|o| o.properties.get(&PropertyKey::from("prototype")));
            let Some(PropertySlot::Data {
                value: JsValue::Object(prototype),
                ..
            }) = prototype.cloned()
            else {
                return Err(Abrupt::Status(Status::GenericFailure));
            };
            for descriptor in properties {
                let target = if descriptor.attributes.is_static() {
                    class
                } else {
                    prototype
                };
                env.apply_descriptor(target, descriptor)?;
            }
            tracing::trace!(env = env.key, class = name, "class defined");
            Ok(env.push(JsValue::Object(class)))
        })
    }
}
