//! Value and object operations exposed to the host
//!
//! Argument-contract violations return the matching `*Expected` status and
//! leave the pending exception alone. Operations that may run script refuse
//! to start while an exception is pending.

use std::sync::Arc;

use otter_jsvm_gc::HeapId;

use crate::callback::{Callback, CallbackData, Finalizer, NativeData};
use crate::env::Env;
use crate::exception::{Abrupt, Completion, ErrorKind};
use crate::object::{FunctionData, HeapCell, ObjectKind, PropertyKey, PropertySlot, SymbolData};
use crate::ops::to_int32;
use crate::ops::to_uint32;
use crate::property::{
    Accessor, KeyCollectionMode, KeyConversion, KeyFilter, PropertyAttributes, PropertyDescriptor,
    PropertyName,
};
use crate::status::{JsvmResult, Status};
use crate::value::{JsValue, Value, ValueType};

/// Attribute bits that apply to a stored property
const STORED_ATTRIBUTES: PropertyAttributes = PropertyAttributes::WRITABLE
    .union(PropertyAttributes::ENUMERABLE)
    .union(PropertyAttributes::CONFIGURABLE);

impl Env {
    // ==================== Internal helpers ====================

    /// Allocate a native function object
    ///
    /// Constructors get a fresh `prototype` object whose `constructor`
    /// points back at the function.
    pub(crate) fn alloc_function(
        &mut self,
        name: &str,
        callback: Callback,
        data: Option<CallbackData>,
        constructor: bool,
    ) -> Completion<HeapId> {
        let function = FunctionData {
            callback,
            data,
            name: Arc::from(name),
        };
        let prototype = Some(self.intrinsics.function_prototype);
        let id = self.alloc_object(ObjectKind::Function(function), prototype)?;
        self.put(
            id,
            PropertyKey::from("name"),
            PropertySlot::Data {
                value: JsValue::string(name),
                attributes: PropertyAttributes::CONFIGURABLE,
            },
        );
        if constructor {
            let proto = self.alloc_object(ObjectKind::Ordinary, Some(self.intrinsics.object_prototype))?;
            self.put(
                proto,
                PropertyKey::from("constructor"),
                PropertySlot::Data {
                    value: JsValue::Object(id),
                    attributes: PropertyAttributes::DEFAULT_METHOD,
                },
            );
            self.put(
                id,
                PropertyKey::from("prototype"),
                PropertySlot::Data {
                    value: JsValue::Object(proto),
                    attributes: PropertyAttributes::WRITABLE,
                },
            );
        }
        Ok(id)
    }

    pub(crate) fn alloc_array(&mut self, elements: Vec<JsValue>) -> Completion<HeapId> {
        let prototype = Some(self.intrinsics.array_prototype);
        let id = self.alloc_object(ObjectKind::Array { length: 0 }, prototype)?;
        for (index, value) in elements.into_iter().enumerate() {
            self.put(id, PropertyKey::from(index as u32), PropertySlot::data(value));
        }
        Ok(id)
    }

    /// Property key named by a host handle: a string or a symbol
    fn name_arg(&self, value: Value) -> JsvmResult<PropertyKey> {
        match self.get(value)? {
            JsValue::String(s) => Ok(PropertyKey::String(s)),
            JsValue::Symbol(id) => Ok(PropertyKey::Symbol(id)),
            _ => Err(Status::NameExpected),
        }
    }

    fn string_arg(&self, value: Value) -> JsvmResult<Arc<str>> {
        match self.get(value)? {
            JsValue::String(s) => Ok(s),
            _ => Err(Status::StringExpected),
        }
    }

    fn number_arg(&self, value: Value) -> JsvmResult<f64> {
        match self.get(value)? {
            JsValue::Number(n) => Ok(n),
            _ => Err(Status::NumberExpected),
        }
    }

    fn function_arg(&self, value: Value) -> JsvmResult<JsValue> {
        let value = self.get(value)?;
        if self.is_callable(&value) {
            Ok(value)
        } else {
            Err(Status::FunctionExpected)
        }
    }

    fn args(&self, args: &[Value]) -> JsvmResult<Vec<JsValue>> {
        args.iter().map(|a| self.get(*a)).collect()
    }

    /// Apply one descriptor to `target`
    pub(crate) fn apply_descriptor(
        &mut self,
        target: HeapId,
        descriptor: &PropertyDescriptor,
    ) -> Completion<()> {
        let key = match &descriptor.name {
            PropertyName::Utf8(name) => PropertyKey::string(name),
            PropertyName::Value(value) => self.name_arg(*value)?,
        };
        let attributes = descriptor.attributes.difference(PropertyAttributes::STATIC);
        let attributes = PropertyAttributes::from_bits(attributes.bits() & STORED_ATTRIBUTES.bits());
        let function_name = self.key_display(&key);

        let slot = match &descriptor.kind {
            Accessor::Value(value) => PropertySlot::Data {
                value: self.get(*value)?,
                attributes,
            },
            Accessor::Method(method) => {
                let id = self.alloc_function(
                    &function_name,
                    method.clone(),
                    descriptor.data.clone(),
                    false,
                )?;
                PropertySlot::Data {
                    value: JsValue::Object(id),
                    attributes,
                }
            }
            Accessor::GetterSetter { getter: None, setter: None } => {
                return Err(Abrupt::Status(Status::InvalidArg));
            }
            Accessor::GetterSetter { getter, setter } => {
                let getter = match getter {
                    Some(f) => Some(self.alloc_function(
                        &format!("get {function_name}"),
                        f.clone(),
                        descriptor.data.clone(),
                        false,
                    )?),
                    None => None,
                };
                let setter = match setter {
                    Some(f) => Some(self.alloc_function(
                        &format!("set {function_name}"),
                        f.clone(),
                        descriptor.data.clone(),
                        false,
                    )?),
                    None => None,
                };
                PropertySlot::Accessor {
                    getter,
                    setter,
                    attributes: attributes.difference(PropertyAttributes::WRITABLE),
                }
            }
        };
        self.define_own(target, key, slot)
    }

    fn make_error_value(&mut self, kind: ErrorKind, code: Option<Value>, message: Value) -> JsvmResult<Value> {
        let message = self.string_arg(message)?;
        let code = code.map(|c| self.string_arg(c)).transpose()?;
        self.op(|env| {
            let id = env.make_error(kind, &message)?;
            if let Some(code) = code {
                env.put(id, PropertyKey::from("code"), PropertySlot::data(JsValue::String(code)));
            }
            Ok(env.push(JsValue::Object(id)))
        })
    }

    // ==================== Value creation ====================

    /// `undefined`
    pub fn get_undefined(&mut self) -> JsvmResult<Value> {
        Ok(self.push(JsValue::Undefined))
    }

    /// `null`
    pub fn get_null(&mut self) -> JsvmResult<Value> {
        Ok(self.push(JsValue::Null))
    }

    /// The global object
    pub fn get_global(&mut self) -> JsvmResult<Value> {
        Ok(self.push(JsValue::Object(self.global)))
    }

    /// `true` or `false`
    pub fn get_boolean(&mut self, value: bool) -> JsvmResult<Value> {
        Ok(self.push(JsValue::Bool(value)))
    }

    /// A number from an `i32`
    pub fn create_int32(&mut self, value: i32) -> JsvmResult<Value> {
        Ok(self.push(JsValue::from(value)))
    }

    /// A number from a `u32`
    pub fn create_uint32(&mut self, value: u32) -> JsvmResult<Value> {
        Ok(self.push(JsValue::from(value)))
    }

    /// A number; precision is lost beyond 2^53
    pub fn create_int64(&mut self, value: i64) -> JsvmResult<Value> {
        Ok(self.push(JsValue::Number(value as f64)))
    }

    /// A number
    pub fn create_double(&mut self, value: f64) -> JsvmResult<Value> {
        Ok(self.push(JsValue::Number(value)))
    }

    /// A string copied from UTF-8
    pub fn create_string_utf8(&mut self, value: &str) -> JsvmResult<Value> {
        Ok(self.push(JsValue::string(value)))
    }

    /// A string copied from Latin-1 bytes
    pub fn create_string_latin1(&mut self, value: &[u8]) -> JsvmResult<Value> {
        let text: String = value.iter().map(|&b| char::from(b)).collect();
        Ok(self.push(JsValue::string(&text)))
    }

    /// A string copied from UTF-16 code units; lone surrogates become U+FFFD
    pub fn create_string_utf16(&mut self, value: &[u16]) -> JsvmResult<Value> {
        Ok(self.push(JsValue::string(&String::from_utf16_lossy(value))))
    }

    /// A string over host-owned Latin-1 bytes
    ///
    /// The engine always copies, so the returned flag is `true` and
    /// `finalizer` runs before this call returns.
    pub fn create_external_string_latin1(
        &mut self,
        value: Vec<u8>,
        finalizer: Option<Finalizer>,
    ) -> JsvmResult<(Value, bool)> {
        let string = self.create_string_latin1(&value)?;
        self.release_external(Box::new(value), finalizer)?;
        Ok((string, true))
    }

    /// A string over host-owned UTF-16 code units; copied like
    /// [`Env::create_external_string_latin1`]
    pub fn create_external_string_utf16(
        &mut self,
        value: Vec<u16>,
        finalizer: Option<Finalizer>,
    ) -> JsvmResult<(Value, bool)> {
        let string = self.create_string_utf16(&value)?;
        self.release_external(Box::new(value), finalizer)?;
        Ok((string, true))
    }

    fn release_external(
        &mut self,
        data: NativeData,
        finalizer: Option<Finalizer>,
    ) -> JsvmResult<()> {
        let Some(finalizer) = finalizer else {
            return Ok(());
        };
        self.op(|env| {
            env.finalization_queue.push_back((data, finalizer));
            Ok(())
        })
    }

    /// A new unique symbol; `description` must be a string when given
    pub fn create_symbol(&mut self, description: Option<Value>) -> JsvmResult<Value> {
        let description = description.map(|d| self.string_arg(d)).transpose()?;
        self.op(|env| {
            let id = env.alloc(HeapCell::Symbol(SymbolData { description }))?;
            Ok(env.push(JsValue::Symbol(id)))
        })
    }

    /// The registry symbol for `key`, created on first use
    pub fn symbol_for(&mut self, key: &str) -> JsvmResult<Value> {
        self.op(|env| {
            let id = match env.symbol_registry.get(key) {
                Some(id) => *id,
                None => {
                    let description = Some(Arc::from(key));
                    let id = env.alloc(HeapCell::Symbol(SymbolData { description }))?;
                    env.symbol_registry.insert(Arc::from(key), id);
                    id
                }
            };
            Ok(env.push(JsValue::Symbol(id)))
        })
    }

    /// A plain object with `Object.prototype`
    pub fn create_object(&mut self) -> JsvmResult<Value> {
        self.op(|env| {
            let prototype = Some(env.intrinsics.object_prototype);
            let id = env.alloc_object(ObjectKind::Ordinary, prototype)?;
            Ok(env.push(JsValue::Object(id)))
        })
    }

    /// An empty array
    pub fn create_array(&mut self) -> JsvmResult<Value> {
        self.create_array_with_length(0)
    }

    /// An array of `length` holes
    pub fn create_array_with_length(&mut self, length: usize) -> JsvmResult<Value> {
        let length = u32::try_from(length)
            .ok()
            .filter(|l| *l < u32::MAX)
            .ok_or(Status::InvalidArg)?;
        self.op(|env| {
            let prototype = Some(env.intrinsics.array_prototype);
            let id = env.alloc_object(ObjectKind::Array { length }, prototype)?;
            Ok(env.push(JsValue::Object(id)))
        })
    }

    /// A native function, callable and constructible from script
    pub fn create_function(
        &mut self,
        name: &str,
        callback: Callback,
        data: Option<CallbackData>,
    ) -> JsvmResult<Value> {
        self.op(|env| {
            let id = env.alloc_function(name, callback, data, true)?;
            Ok(env.push(JsValue::Object(id)))
        })
    }

    /// An `Error` with `message` and an optional `code` property; not thrown
    pub fn create_error(&mut self, code: Option<Value>, message: Value) -> JsvmResult<Value> {
        self.make_error_value(ErrorKind::Error, code, message)
    }

    /// Like [`Env::create_error`] for `TypeError`
    pub fn create_type_error(&mut self, code: Option<Value>, message: Value) -> JsvmResult<Value> {
        self.make_error_value(ErrorKind::TypeError, code, message)
    }

    /// Like [`Env::create_error`] for `RangeError`
    pub fn create_range_error(&mut self, code: Option<Value>, message: Value) -> JsvmResult<Value> {
        self.make_error_value(ErrorKind::RangeError, code, message)
    }

    /// Like [`Env::create_error`] for `SyntaxError`
    pub fn create_syntax_error(&mut self, code: Option<Value>, message: Value) -> JsvmResult<Value> {
        self.make_error_value(ErrorKind::SyntaxError, code, message)
    }

    // ==================== Reading values ====================

    /// The type of a value, as seen by the host
    pub fn type_of(&self, value: Value) -> JsvmResult<ValueType> {
        Ok(match self.get(value)? {
            JsValue::Undefined => ValueType::Undefined,
            JsValue::Null => ValueType::Null,
            JsValue::Bool(_) => ValueType::Boolean,
            JsValue::Number(_) => ValueType::Number,
            JsValue::String(_) => ValueType::String,
            JsValue::BigInt(_) => ValueType::Bigint,
            JsValue::Symbol(_) => ValueType::Symbol,
            JsValue::Object(id) => match self.object(id).map(|o| &o.kind) {
                Some(ObjectKind::Function(_)) => ValueType::Function,
                Some(ObjectKind::External) => ValueType::External,
                _ => ValueType::Object,
            },
        })
    }

    /// Read a number
    pub fn get_value_double(&self, value: Value) -> JsvmResult<f64> {
        self.number_arg(value)
    }

    /// Non-finite numbers read as 0
    pub fn get_value_int32(&self, value: Value) -> JsvmResult<i32> {
        self.number_arg(value).map(to_int32)
    }

    /// Read a number truncated to `u32`
    pub fn get_value_uint32(&self, value: Value) -> JsvmResult<u32> {
        self.number_arg(value).map(to_uint32)
    }

    /// Non-finite numbers read as 0; out-of-range ones saturate
    pub fn get_value_int64(&self, value: Value) -> JsvmResult<i64> {
        self.number_arg(value)
            .map(|n| if n.is_finite() { n as i64 } else { 0 })
    }

    /// Read a boolean
    pub fn get_value_bool(&self, value: Value) -> JsvmResult<bool> {
        match self.get(value)? {
            JsValue::Bool(b) => Ok(b),
            _ => Err(Status::BooleanExpected),
        }
    }

    /// Copy a string out as UTF-8
    pub fn get_value_string_utf8(&self, value: Value) -> JsvmResult<String> {
        self.string_arg(value).map(|s| s.to_string())
    }

    /// Copy a string out as Latin-1; code units above 0xFF keep their low byte
    pub fn get_value_string_latin1(&self, value: Value) -> JsvmResult<Vec<u8>> {
        let string = self.string_arg(value)?;
        Ok(string.encode_utf16().map(|unit| unit as u8).collect())
    }

    /// Copy a string out as UTF-16 code units
    pub fn get_value_string_utf16(&self, value: Value) -> JsvmResult<Vec<u16>> {
        let string = self.string_arg(value)?;
        Ok(string.encode_utf16().collect())
    }

    // ==================== Coercion ====================

    /// `ToBoolean`
    pub fn coerce_to_bool(&mut self, value: Value) -> JsvmResult<Value> {
        let value = self.get(value)?;
        let b = self.to_boolean(&value);
        Ok(self.push(JsValue::Bool(b)))
    }

    /// `ToNumber`; may run script
    pub fn coerce_to_number(&mut self, value: Value) -> JsvmResult<Value> {
        let value = self.get(value)?;
        self.script_op(|env| {
            let n = env.to_number(&value)?;
            Ok(env.push(JsValue::Number(n)))
        })
    }

    /// `ToString`; may run script
    pub fn coerce_to_string(&mut self, value: Value) -> JsvmResult<Value> {
        let value = self.get(value)?;
        self.script_op(|env| {
            let s = env.to_string(&value)?;
            Ok(env.push(JsValue::String(s)))
        })
    }

    /// `ToObject`
    pub fn coerce_to_object(&mut self, value: Value) -> JsvmResult<Value> {
        let value = self.get(value)?;
        self.script_op(|env| {
            let id = env.to_object(&value)?;
            Ok(env.push(JsValue::Object(id)))
        })
    }

    // ==================== Properties ====================

    /// `object[key] = value`
    pub fn set_property(&mut self, object: Value, key: Value, value: Value) -> JsvmResult<()> {
        let target = JsValue::Object(self.object_arg(object)?);
        let key = self.get(key)?;
        let value = self.get(value)?;
        self.script_op(|env| {
            let key = env.to_property_key(&key)?;
            env.set_prop(&target, key, value, false)
        })
    }

    /// Property lookup; primitive receivers are allowed
    pub fn get_property(&mut self, object: Value, key: Value) -> JsvmResult<Value> {
        let receiver = self.get(object)?;
        let key = self.get(key)?;
        self.script_op(|env| {
            let key = env.to_property_key(&key)?;
            let value = env.get_prop(&receiver, &key)?;
            Ok(env.push(value))
        })
    }

    /// `key in object`
    pub fn has_property(&mut self, object: Value, key: Value) -> JsvmResult<bool> {
        let id = self.object_arg(object)?;
        let key = self.get(key)?;
        self.script_op(|env| {
            let key = env.to_property_key(&key)?;
            Ok(env.has_prop(id, &key))
        })
    }

    /// Delete an own property; `false` when it is not configurable
    pub fn delete_property(&mut self, object: Value, key: Value) -> JsvmResult<bool> {
        let target = JsValue::Object(self.object_arg(object)?);
        let key = self.get(key)?;
        self.script_op(|env| {
            let key = env.to_property_key(&key)?;
            env.delete_prop(&target, &key, false)
        })
    }

    /// Whether `key` is an own property; `key` must be a string or symbol
    pub fn has_own_property(&mut self, object: Value, key: Value) -> JsvmResult<bool> {
        let id = self.object_arg(object)?;
        let key = self.name_arg(key)?;
        Ok(self.has_own(id, &key))
    }

    /// Set a property by name
    pub fn set_named_property(&mut self, object: Value, name: &str, value: Value) -> JsvmResult<()> {
        let target = JsValue::Object(self.object_arg(object)?);
        let value = self.get(value)?;
        self.script_op(|env| env.set_prop(&target, PropertyKey::string(name), value, false))
    }

    /// Read a property by name
    pub fn get_named_property(&mut self, object: Value, name: &str) -> JsvmResult<Value> {
        let receiver = self.get(object)?;
        self.script_op(|env| {
            let value = env.get_prop(&receiver, &PropertyKey::string(name))?;
            Ok(env.push(value))
        })
    }

    /// `name in object`
    pub fn has_named_property(&mut self, object: Value, name: &str) -> JsvmResult<bool> {
        let id = self.object_arg(object)?;
        Ok(self.has_prop(id, &PropertyKey::string(name)))
    }

    /// `object[index] = value`
    pub fn set_element(&mut self, object: Value, index: u32, value: Value) -> JsvmResult<()> {
        let target = JsValue::Object(self.object_arg(object)?);
        let value = self.get(value)?;
        self.script_op(|env| env.set_prop(&target, PropertyKey::from(index), value, false))
    }

    /// Read `object[index]`
    pub fn get_element(&mut self, object: Value, index: u32) -> JsvmResult<Value> {
        let receiver = self.get(object)?;
        self.script_op(|env| {
            let value = env.get_prop(&receiver, &PropertyKey::from(index))?;
            Ok(env.push(value))
        })
    }

    /// `index in object`
    pub fn has_element(&mut self, object: Value, index: u32) -> JsvmResult<bool> {
        let id = self.object_arg(object)?;
        Ok(self.has_prop(id, &PropertyKey::from(index)))
    }

    /// `delete object[index]`
    pub fn delete_element(&mut self, object: Value, index: u32) -> JsvmResult<bool> {
        let target = JsValue::Object(self.object_arg(object)?);
        self.op(|env| env.delete_prop(&target, &PropertyKey::from(index), false))
    }

    /// Enumerable string keys along the prototype chain, as an array
    pub fn get_property_names(&mut self, object: Value) -> JsvmResult<Value> {
        let id = self.object_arg(object)?;
        let keys = self.enumerable_keys(id);
        self.op(|env| {
            let array = env.alloc_array(keys.into_iter().map(JsValue::String).collect())?;
            Ok(env.push(JsValue::Object(array)))
        })
    }

    /// Keys of `object` selected by `mode` and `filter`, as an array
    ///
    /// Integer keys come back as numbers under [`KeyConversion::KeepNumbers`];
    /// symbols come back as themselves.
    pub fn get_all_property_names(
        &mut self,
        object: Value,
        mode: KeyCollectionMode,
        filter: KeyFilter,
        conversion: KeyConversion,
    ) -> JsvmResult<Value> {
        let id = self.object_arg(object)?;
        let keys: Vec<JsValue> = self
            .collect_keys(id, mode, filter)
            .into_iter()
            .map(|key| match (key.as_index(), key) {
                (Some(index), _) if conversion == KeyConversion::KeepNumbers => {
                    JsValue::Number(f64::from(index))
                }
                (_, PropertyKey::String(name)) => JsValue::String(name),
                (_, PropertyKey::Symbol(symbol)) => JsValue::Symbol(symbol),
            })
            .collect();
        self.op(|env| {
            let array = env.alloc_array(keys)?;
            Ok(env.push(JsValue::Object(array)))
        })
    }

    /// `null` when the object has no prototype
    pub fn get_prototype(&mut self, object: Value) -> JsvmResult<Value> {
        let id = self.object_arg(object)?;
        let prototype = self
            .object(id)
            .and_then(|o| o.prototype)
            .map_or(JsValue::Null, JsValue::Object);
        Ok(self.push(prototype))
    }

    /// Apply `descriptors` in order
    ///
    /// A getter/setter pair with neither side is `InvalidArg`; a `Value`
    /// name that is not a string or symbol is `NameExpected`.
    pub fn define_properties(
        &mut self,
        object: Value,
        descriptors: &[PropertyDescriptor],
    ) -> JsvmResult<()> {
        let id = self.object_arg(object)?;
        self.op(|env| {
            descriptors
                .iter()
                .try_for_each(|descriptor| env.apply_descriptor(id, descriptor))
        })
    }

    /// Make every own property read-only and non-configurable; block additions
    pub fn object_freeze(&mut self, object: Value) -> JsvmResult<()> {
        let id = self.object_arg(object)?;
        self.restrict(id, true);
        Ok(())
    }

    /// Make every own property non-configurable; block additions
    pub fn object_seal(&mut self, object: Value) -> JsvmResult<()> {
        let id = self.object_arg(object)?;
        self.restrict(id, false);
        Ok(())
    }

    fn restrict(&mut self, id: HeapId, freeze: bool) {
        let Some(object) = self.object_mut(id) else {
            return;
        };
        object.extensible = false;
        for slot in object.properties.values_mut() {
            let mut attributes = slot.attributes().difference(PropertyAttributes::CONFIGURABLE);
            if freeze && matches!(slot, PropertySlot::Data { .. }) {
                attributes = attributes.difference(PropertyAttributes::WRITABLE);
            }
            slot.set_attributes(attributes);
        }
    }

    /// Whether the value is an array
    pub fn is_array(&self, value: Value) -> JsvmResult<bool> {
        Ok(self
            .get(value)?
            .as_object()
            .is_some_and(|id| self.is_array_id(id)))
    }

    /// Length of an array
    pub fn get_array_length(&self, value: Value) -> JsvmResult<u32> {
        let id = self.get(value)?.as_object().ok_or(Status::ArrayExpected)?;
        match self.object(id).map(|o| &o.kind) {
            Some(ObjectKind::Array { length }) => Ok(*length),
            _ => Err(Status::ArrayExpected),
        }
    }

    /// Whether the value inherits from `Error.prototype`
    pub fn is_error(&self, value: Value) -> JsvmResult<bool> {
        Ok(self
            .get(value)?
            .as_object()
            .and_then(|id| self.object(id))
            .is_some_and(|o| matches!(o.kind, ObjectKind::Error)))
    }

    // ==================== Comparison and calls ====================

    /// `a === b`
    pub fn strict_equals(&self, a: Value, b: Value) -> JsvmResult<bool> {
        let a = self.get(a)?;
        let b = self.get(b)?;
        Ok(self.strict_eq(&a, &b))
    }

    /// `object instanceof constructor`
    pub fn instance_of(&mut self, object: Value, constructor: Value) -> JsvmResult<bool> {
        let object = self.get(object)?;
        let constructor = self.function_arg(constructor)?;
        self.script_op(|env| env.ordinary_instance_of(&object, &constructor))
    }

    /// Call `function` with `recv` as `this`
    pub fn call_function(&mut self, recv: Value, function: Value, args: &[Value]) -> JsvmResult<Value> {
        let this = self.get(recv)?;
        let function = self.function_arg(function)?;
        let args = self.args(args)?;
        self.script_op(|env| {
            let result = env.call(&function, this, &args)?;
            Ok(env.push(result))
        })
    }

    /// `new constructor(...args)`
    pub fn new_instance(&mut self, constructor: Value, args: &[Value]) -> JsvmResult<Value> {
        let constructor = self.function_arg(constructor)?;
        let args = self.args(args)?;
        self.script_op(|env| {
            let result = env.construct(&constructor, &args)?;
            Ok(env.push(result))
        })
    }
}
