//! Object model and operator semantics shared by the interpreter, the
//! builtins and the host surface

use std::cmp::Ordering;
use std::sync::Arc;

use num_traits::Zero;
use otter_jsvm_bytecode::{BinaryOp, UnaryOp};
use otter_jsvm_gc::HeapId;
use rustc_hash::FxHashSet;

use crate::bigint::{Numeric, compare_with_number, parse_bigint};
use crate::callback::CallbackInfo;
use crate::env::Env;
use crate::exception::{Abrupt, Completion, ErrorKind};
use crate::object::{FunctionData, HeapCell, JsObject, ObjectKind, PropertyKey, PropertySlot};
use crate::property::{KeyCollectionMode, KeyFilter, PropertyAttributes};
use crate::status::Status;
use crate::value::JsValue;

/// Preferred type for `to_primitive`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Hint {
    Default,
    Number,
    String,
}

// ==================== Numbers ====================

/// Format a number the way script sees it
pub(crate) fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    let abs = n.abs();
    if !(1e-6..1e21).contains(&abs) {
        let formatted = format!("{:e}", n);
        return match formatted.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
            _ => formatted,
        };
    }
    format!("{}", n)
}

/// Parse a string the way `Number(s)` does
pub(crate) fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    let radix = |prefix: [&str; 2], radix: u32| {
        prefix
            .iter()
            .find_map(|p| trimmed.strip_prefix(p))
            .map(|digits| {
                if digits.is_empty() {
                    f64::NAN
                } else {
                    u64::from_str_radix(digits, radix).map_or(f64::NAN, |v| v as f64)
                }
            })
    };
    if let Some(n) = radix(["0x", "0X"], 16)
        .or_else(|| radix(["0o", "0O"], 8))
        .or_else(|| radix(["0b", "0B"], 2))
    {
        return n;
    }
    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    let numeric = trimmed
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'));
    if !numeric {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

pub(crate) fn to_int32(n: f64) -> i32 {
    to_uint32(n) as i32
}

pub(crate) fn to_uint32(n: f64) -> u32 {
    if !n.is_finite() {
        return 0;
    }
    let truncated = n.trunc();
    let modulo = truncated.rem_euclid(4_294_967_296.0);
    modulo as u32
}

/// Largest integer a number holds exactly
pub(crate) const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// `ToLength`: an integer in `0..=2^53-1`
pub(crate) fn to_length(n: f64) -> f64 {
    if n.is_nan() || n <= 0.0 {
        0.0
    } else {
        n.trunc().min(MAX_SAFE_INTEGER)
    }
}

fn pow(base: f64, exponent: f64) -> f64 {
    if exponent.is_nan() || (base.abs() == 1.0 && exponent.is_infinite()) {
        return f64::NAN;
    }
    base.powf(exponent)
}

/// Arithmetic and bitwise operators on two numbers
fn number_binary(op: BinaryOp, x: f64, y: f64) -> JsValue {
    let n = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => x / y,
        BinaryOp::Mod => x % y,
        BinaryOp::Pow => pow(x, y),
        BinaryOp::Ushr => {
            let shift = to_uint32(y) & 31;
            return JsValue::from(to_uint32(x) >> shift);
        }
        BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::Shl | BinaryOp::Shr => {
            let (x, y) = (to_int32(x), to_int32(y));
            let shift = (y as u32) & 31;
            return JsValue::from(match op {
                BinaryOp::BitAnd => x & y,
                BinaryOp::BitOr => x | y,
                BinaryOp::BitXor => x ^ y,
                BinaryOp::Shl => x.wrapping_shl(shift),
                _ => x >> shift,
            });
        }
        _ => f64::NAN,
    };
    JsValue::Number(n)
}

fn compare_strings(a: &str, b: &str) -> Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

impl Env {
    // ==================== Errors ====================

    /// Allocate an error object of `kind`
    pub(crate) fn make_error(&mut self, kind: ErrorKind, message: &str) -> Completion<HeapId> {
        let prototype = self.intrinsics.error_prototypes[kind.index()];
        self.make_error_with_prototype(kind.name(), message, Some(prototype))
    }

    pub(crate) fn make_error_with_prototype(
        &mut self,
        name: &str,
        message: &str,
        prototype: Option<HeapId>,
    ) -> Completion<HeapId> {
        let id = self.alloc_object(ObjectKind::Error, prototype)?;
        let header = if message.is_empty() {
            name.to_string()
        } else {
            format!("{name}: {message}")
        };
        let stack = format!("{header}\n    at {}", self.current_resource());
        if let Some(object) = self.object_mut(id) {
            if !message.is_empty() {
                object.properties.insert(
                    PropertyKey::from("message"),
                    PropertySlot::Data {
                        value: JsValue::string(message),
                        attributes: PropertyAttributes::DEFAULT_METHOD,
                    },
                );
            }
            object.properties.insert(
                PropertyKey::from("stack"),
                PropertySlot::Data {
                    value: JsValue::string(&stack),
                    attributes: PropertyAttributes::DEFAULT_METHOD,
                },
            );
        }
        Ok(id)
    }

    /// An abrupt completion throwing a fresh error of `kind`
    pub(crate) fn error_abrupt(&mut self, kind: ErrorKind, message: &str) -> Abrupt {
        match self.make_error(kind, message) {
            Ok(id) => Abrupt::Throw(JsValue::Object(id)),
            Err(abrupt) => abrupt,
        }
    }

    pub(crate) fn type_error(&mut self, message: impl AsRef<str>) -> Abrupt {
        self.error_abrupt(ErrorKind::TypeError, message.as_ref())
    }

    pub(crate) fn range_error(&mut self, message: impl AsRef<str>) -> Abrupt {
        self.error_abrupt(ErrorKind::RangeError, message.as_ref())
    }

    pub(crate) fn reference_error(&mut self, message: impl AsRef<str>) -> Abrupt {
        self.error_abrupt(ErrorKind::ReferenceError, message.as_ref())
    }

    pub(crate) fn syntax_error(&mut self, message: impl AsRef<str>) -> Abrupt {
        self.error_abrupt(ErrorKind::SyntaxError, message.as_ref())
    }

    /// Refuse to build a string of `bytes` once it would pass the heap limit
    pub(crate) fn check_string_length(&mut self, bytes: usize) -> Completion<()> {
        if bytes > self.shared.limits.hard_limit {
            return Err(self.range_error("Invalid string length"));
        }
        Ok(())
    }

    // ==================== Classification ====================

    pub(crate) fn is_callable(&self, value: &JsValue) -> bool {
        value
            .as_object()
            .and_then(|id| self.object(id))
            .is_some_and(JsObject::is_callable)
    }

    pub(crate) fn is_array_id(&self, id: HeapId) -> bool {
        self.object(id)
            .is_some_and(|o| matches!(o.kind, ObjectKind::Array { .. }))
    }

    pub(crate) fn typeof_name(&self, value: &JsValue) -> &'static str {
        match value {
            JsValue::Undefined => "undefined",
            JsValue::Null => "object",
            JsValue::Bool(_) => "boolean",
            JsValue::Number(_) => "number",
            JsValue::String(_) => "string",
            JsValue::BigInt(_) => "bigint",
            JsValue::Symbol(_) => "symbol",
            JsValue::Object(_) if self.is_callable(value) => "function",
            JsValue::Object(_) => "object",
        }
    }

    /// Readable form of a key for error messages
    pub(crate) fn key_display(&self, key: &PropertyKey) -> String {
        match key {
            PropertyKey::String(s) => s.to_string(),
            PropertyKey::Symbol(id) => self.symbol_display(*id),
        }
    }

    pub(crate) fn symbol_display(&self, id: HeapId) -> String {
        match self.heap.get(id) {
            Some(HeapCell::Symbol(symbol)) => {
                format!("Symbol({})", symbol.description.as_deref().unwrap_or(""))
            }
            _ => "Symbol()".to_string(),
        }
    }

    // ==================== Conversions ====================

    pub(crate) fn to_boolean(&self, value: &JsValue) -> bool {
        match value {
            JsValue::Undefined | JsValue::Null => false,
            JsValue::Bool(b) => *b,
            JsValue::Number(n) => !(n.is_nan() || *n == 0.0),
            JsValue::String(s) => !s.is_empty(),
            JsValue::BigInt(n) => !n.is_zero(),
            JsValue::Symbol(_) | JsValue::Object(_) => true,
        }
    }

    pub(crate) fn to_primitive(&mut self, value: &JsValue, hint: Hint) -> Completion<JsValue> {
        let JsValue::Object(id) = value else {
            return Ok(value.clone());
        };
        let hint = match self.object(*id).map(|o| &o.kind) {
            Some(ObjectKind::Date(_)) if hint == Hint::Default => Hint::String,
            _ => hint,
        };
        let order = match hint {
            Hint::String => ["toString", "valueOf"],
            Hint::Default | Hint::Number => ["valueOf", "toString"],
        };
        for name in order {
            let method = self.get_prop(value, &PropertyKey::from(name))?;
            if self.is_callable(&method) {
                let result = self.call(&method, value.clone(), &[])?;
                if !matches!(result, JsValue::Object(_)) {
                    return Ok(result);
                }
            }
        }
        Err(self.type_error("Cannot convert object to primitive value"))
    }

    pub(crate) fn to_number(&mut self, value: &JsValue) -> Completion<f64> {
        Ok(match value {
            JsValue::Undefined => f64::NAN,
            JsValue::Null => 0.0,
            JsValue::Bool(b) => f64::from(u8::from(*b)),
            JsValue::Number(n) => *n,
            JsValue::String(s) => string_to_number(s),
            JsValue::BigInt(_) => {
                return Err(self.type_error("Cannot convert a BigInt value to a number"));
            }
            JsValue::Symbol(_) => {
                return Err(self.type_error("Cannot convert a Symbol value to a number"));
            }
            JsValue::Object(_) => {
                let primitive = self.to_primitive(value, Hint::Number)?;
                return self.to_number(&primitive);
            }
        })
    }

    pub(crate) fn to_string(&mut self, value: &JsValue) -> Completion<Arc<str>> {
        Ok(match value {
            JsValue::Undefined => Arc::from("undefined"),
            JsValue::Null => Arc::from("null"),
            JsValue::Bool(b) => Arc::from(if *b { "true" } else { "false" }),
            JsValue::Number(n) => Arc::from(number_to_string(*n)),
            JsValue::String(s) => s.clone(),
            JsValue::BigInt(n) => Arc::from(n.to_string()),
            JsValue::Symbol(_) => {
                return Err(self.type_error("Cannot convert a Symbol value to a string"));
            }
            JsValue::Object(_) => {
                let primitive = self.to_primitive(value, Hint::String)?;
                return self.to_string(&primitive);
            }
        })
    }

    pub(crate) fn to_property_key(&mut self, value: &JsValue) -> Completion<PropertyKey> {
        match value {
            JsValue::Symbol(id) => Ok(PropertyKey::Symbol(*id)),
            JsValue::String(s) => Ok(PropertyKey::String(s.clone())),
            other => {
                let primitive = self.to_primitive(other, Hint::String)?;
                match primitive {
                    JsValue::Symbol(id) => Ok(PropertyKey::Symbol(id)),
                    primitive => Ok(PropertyKey::String(self.to_string(&primitive)?)),
                }
            }
        }
    }

    /// Box a primitive; objects pass through
    pub(crate) fn to_object(&mut self, value: &JsValue) -> Completion<HeapId> {
        let prototype = match value {
            JsValue::Object(id) => return Ok(*id),
            JsValue::Undefined | JsValue::Null => {
                return Err(self.type_error("Cannot convert undefined or null to object"));
            }
            JsValue::Bool(_) => self.intrinsics.boolean_prototype,
            JsValue::Number(_) => self.intrinsics.number_prototype,
            JsValue::String(_) => self.intrinsics.string_prototype,
            JsValue::BigInt(_) => self.intrinsics.bigint_prototype,
            JsValue::Symbol(_) => self.intrinsics.symbol_prototype,
        };
        self.alloc_object(ObjectKind::Primitive(value.clone()), Some(prototype))
    }

    // ==================== Properties ====================

    fn prototype_for_primitive(&self, value: &JsValue) -> Option<HeapId> {
        match value {
            JsValue::Bool(_) => Some(self.intrinsics.boolean_prototype),
            JsValue::Number(_) => Some(self.intrinsics.number_prototype),
            JsValue::String(_) => Some(self.intrinsics.string_prototype),
            JsValue::BigInt(_) => Some(self.intrinsics.bigint_prototype),
            JsValue::Symbol(_) => Some(self.intrinsics.symbol_prototype),
            JsValue::Object(id) => Some(*id),
            JsValue::Undefined | JsValue::Null => None,
        }
    }

    pub(crate) fn get_prop(
        &mut self,
        receiver: &JsValue,
        key: &PropertyKey,
    ) -> Completion<JsValue> {
        if let JsValue::String(s) = receiver {
            if let PropertyKey::String(name) = key {
                if &**name == "length" {
                    return Ok(JsValue::from(s.encode_utf16().count() as u32));
                }
            }
            if let Some(index) = key.as_index() {
                if let Some(unit) = s.encode_utf16().nth(index as usize) {
                    return Ok(JsValue::String(Arc::from(String::from_utf16_lossy(&[unit]))));
                }
            }
        }

        let Some(start) = self.prototype_for_primitive(receiver) else {
            let what = if receiver.is_undefined() { "undefined" } else { "null" };
            let key = self.key_display(key);
            return Err(self.type_error(format!(
                "Cannot read properties of {what} (reading '{key}')"
            )));
        };

        let mut current = Some(start);
        while let Some(id) = current {
            let Some(object) = self.object(id) else {
                break;
            };
            if let ObjectKind::Array { length } = object.kind {
                if key == &PropertyKey::from("length") {
                    return Ok(JsValue::from(length));
                }
            }
            if let (ObjectKind::TypedArray(view), Some(index)) = (&object.kind, key.as_index()) {
                return Ok(self.typed_get(view, index as usize).unwrap_or_default());
            }
            match object.properties.get(key) {
                Some(PropertySlot::Data { value, .. }) => return Ok(value.clone()),
                Some(PropertySlot::Accessor { getter, .. }) => {
                    return match *getter {
                        Some(getter) => self.call(&JsValue::Object(getter), receiver.clone(), &[]),
                        None => Ok(JsValue::Undefined),
                    };
                }
                None => current = object.prototype,
            }
        }
        Ok(JsValue::Undefined)
    }

    pub(crate) fn has_prop(&self, id: HeapId, key: &PropertyKey) -> bool {
        let mut current = Some(id);
        while let Some(id) = current {
            let Some(object) = self.object(id) else {
                return false;
            };
            if object.properties.contains_key(key) {
                return true;
            }
            if let (ObjectKind::TypedArray(view), Some(index)) = (&object.kind, key.as_index()) {
                return (index as usize) < self.typed_length(view);
            }
            if matches!(object.kind, ObjectKind::Array { .. })
                && key == &PropertyKey::from("length")
            {
                return true;
            }
            current = object.prototype;
        }
        false
    }

    pub(crate) fn has_own(&self, id: HeapId, key: &PropertyKey) -> bool {
        self.object(id).is_some_and(|o| {
            o.properties.contains_key(key)
                || (matches!(o.kind, ObjectKind::Array { .. })
                    && key == &PropertyKey::from("length"))
                || self.typed_element(id, key).is_some()
        })
    }

    /// Typed array and element index named by `key`, when in range
    fn typed_element(&self, id: HeapId, key: &PropertyKey) -> Option<(crate::buffer::TypedArrayData, usize)> {
        let view = self.typed_array(id)?;
        let index = key.as_index()? as usize;
        (index < self.typed_length(&view)).then_some((view, index))
    }

    pub(crate) fn set_prop(
        &mut self,
        receiver: &JsValue,
        key: PropertyKey,
        value: JsValue,
        strict: bool,
    ) -> Completion<()> {
        let id = match receiver {
            JsValue::Object(id) => *id,
            JsValue::Undefined | JsValue::Null => {
                let what = if receiver.is_undefined() { "undefined" } else { "null" };
                let key = self.key_display(&key);
                return Err(self.type_error(format!(
                    "Cannot set properties of {what} (setting '{key}')"
                )));
            }
            primitive => {
                if strict {
                    let key = self.key_display(&key);
                    let kind = self.typeof_name(primitive);
                    return Err(self.type_error(format!(
                        "Cannot create property '{key}' on {kind}"
                    )));
                }
                return Ok(());
            }
        };

        if self.is_array_id(id) && key == PropertyKey::from("length") {
            return self.set_array_length(id, &value, strict);
        }
        if let (Some(view), Some(index)) = (self.typed_array(id), key.as_index()) {
            let value = self.to_element(view.kind, &value)?;
            self.typed_set(&view, index as usize, &value);
            return Ok(());
        }

        enum Found {
            Writable,
            ReadOnly,
            Setter(Option<HeapId>),
            Absent,
        }

        let mut found = Found::Absent;
        let mut own = false;
        let mut current = Some(id);
        while let Some(cur) = current {
            let Some(object) = self.object(cur) else {
                break;
            };
            match object.properties.get(&key) {
                Some(PropertySlot::Data { attributes, .. }) => {
                    found = if attributes.writable() {
                        Found::Writable
                    } else {
                        Found::ReadOnly
                    };
                    own = cur == id;
                    break;
                }
                Some(PropertySlot::Accessor { setter, .. }) => {
                    found = Found::Setter(*setter);
                    break;
                }
                None => current = object.prototype,
            }
        }

        match found {
            Found::Setter(Some(setter)) => {
                self.call(&JsValue::Object(setter), receiver.clone(), &[value])?;
                Ok(())
            }
            Found::Setter(None) => self.reject_write(strict, || {
                format!("Cannot set property {} which has only a getter", key_text(&key))
            }),
            Found::ReadOnly => self.reject_write(strict, || {
                format!("Cannot assign to read only property '{}' of object", key_text(&key))
            }),
            Found::Writable if own => {
                if let Some(PropertySlot::Data { value: slot, .. }) = self
                    .object_mut(id)
                    .and_then(|o| o.properties.get_mut(&key))
                {
                    *slot = value;
                }
                Ok(())
            }
            Found::Writable | Found::Absent => {
                let extensible = self.object(id).is_some_and(|o| o.extensible);
                if !extensible {
                    return self.reject_write(strict, || {
                        format!(
                            "Cannot add property {}, object is not extensible",
                            key_text(&key)
                        )
                    });
                }
                self.put(id, key, PropertySlot::data(value));
                Ok(())
            }
        }
    }

    fn reject_write(&mut self, strict: bool, message: impl FnOnce() -> String) -> Completion<()> {
        if strict {
            Err(self.type_error(message()))
        } else {
            Ok(())
        }
    }

    fn set_array_length(&mut self, id: HeapId, value: &JsValue, strict: bool) -> Completion<()> {
        let number = self.to_number(value)?;
        let requested = to_uint32(number);
        if f64::from(requested) != number {
            return Err(self.range_error("Invalid array length"));
        }
        let Some(object) = self.object_mut(id) else {
            return Ok(());
        };
        // Truncation stops above the last element that cannot be deleted
        let length = object
            .properties
            .iter()
            .filter(|(_, slot)| !slot.attributes().configurable())
            .filter_map(|(key, _)| key.as_index())
            .filter(|&index| index >= requested)
            .max()
            .map_or(requested, |index| index + 1);
        object
            .properties
            .retain(|key, _| key.as_index().is_none_or(|index| index < length));
        if let ObjectKind::Array { length: current } = &mut object.kind {
            *current = length;
        }
        if length != requested {
            let index = length - 1;
            return self.reject_write(strict, || {
                format!("Cannot delete property '{index}' of [object Array]")
            });
        }
        Ok(())
    }

    /// Insert or replace an own property without any checks
    pub(crate) fn put(&mut self, id: HeapId, key: PropertyKey, slot: PropertySlot) {
        let index = key.as_index();
        let Some(object) = self.object_mut(id) else {
            return;
        };
        object.properties.insert(key, slot);
        if let (Some(index), ObjectKind::Array { length }) = (index, &mut object.kind) {
            if index >= *length {
                *length = index + 1;
            }
        }
    }

    /// Define an own property, honoring configurability and extensibility
    pub(crate) fn define_own(
        &mut self,
        id: HeapId,
        key: PropertyKey,
        slot: PropertySlot,
    ) -> Completion<()> {
        if self.is_array_id(id) && key == PropertyKey::from("length") {
            return match slot {
                PropertySlot::Data { value, .. } => self.set_array_length(id, &value, true),
                PropertySlot::Accessor { .. } => {
                    Err(self.type_error("Cannot redefine property: length"))
                }
            };
        }
        if let (Some(view), Some(index)) = (self.typed_array(id), key.as_index()) {
            let PropertySlot::Data { value, .. } = slot else {
                return Err(self.type_error(format!("Cannot redefine property: {index}")));
            };
            if index as usize >= self.typed_length(&view) {
                return Err(self.type_error(format!("Invalid typed array index: {index}")));
            }
            let value = self.to_element(view.kind, &value)?;
            self.typed_set(&view, index as usize, &value);
            return Ok(());
        }
        let Some(object) = self.object(id) else {
            return Err(Abrupt::Status(Status::ObjectExpected));
        };
        match object.properties.get(&key) {
            Some(existing) if !existing.attributes().configurable() => {
                let key = self.key_display(&key);
                Err(self.type_error(format!("Cannot redefine property: {key}")))
            }
            None if !object.extensible => {
                let key = self.key_display(&key);
                Err(self.type_error(format!(
                    "Cannot define property {key}, object is not extensible"
                )))
            }
            _ => {
                self.put(id, key, slot);
                Ok(())
            }
        }
    }

    pub(crate) fn delete_prop(
        &mut self,
        target: &JsValue,
        key: &PropertyKey,
        strict: bool,
    ) -> Completion<bool> {
        let id = match target {
            JsValue::Object(id) => *id,
            JsValue::Undefined | JsValue::Null => {
                return Err(self.type_error("Cannot convert undefined or null to object"));
            }
            _ => return Ok(true),
        };
        if self.is_array_id(id) && key == &PropertyKey::from("length") {
            self.reject_write(strict, || "Cannot delete property 'length' of [object Array]".into())?;
            return Ok(false);
        }
        if let Some((view, index)) = self.typed_element(id, key) {
            let name = view.kind.name();
            self.reject_write(strict, || format!("Cannot delete property '{index}' of [object {name}]"))?;
            return Ok(false);
        }
        let configurable = match self.object(id).and_then(|o| o.properties.get(key)) {
            None => return Ok(true),
            Some(slot) => slot.attributes().configurable(),
        };
        if !configurable {
            let text = self.key_display(key);
            self.reject_write(strict, || format!("Cannot delete property '{text}' of #<Object>"))?;
            return Ok(false);
        }
        if let Some(object) = self.object_mut(id) {
            object.properties.shift_remove(key);
        }
        Ok(true)
    }

    /// Own element indices of an array in ascending order
    ///
    /// `None` unless `value` is an array whose prototype chain holds no
    /// elements, so the holes between the returned indices read as
    /// `undefined`.
    pub(crate) fn sparse_elements(&self, value: &JsValue) -> Option<Vec<u32>> {
        let id = value.as_object().filter(|id| self.is_array_id(*id))?;
        let object = self.object(id)?;
        let mut current = object.prototype;
        while let Some(cur) = current {
            let prototype = self.object(cur)?;
            if prototype.properties.keys().any(|k| k.as_index().is_some()) {
                return None;
            }
            current = prototype.prototype;
        }
        let mut indices: Vec<u32> = object.properties.keys().filter_map(PropertyKey::as_index).collect();
        indices.sort_unstable();
        Some(indices)
    }

    /// Own keys with their attributes, including the ones the object kind
    /// provides: array `length`, typed array elements and string characters
    pub(crate) fn own_entries(&self, id: HeapId) -> Vec<(PropertyKey, PropertyAttributes)> {
        let Some(object) = self.object(id) else {
            return Vec::new();
        };
        let (elements, elements_attributes, length) = match &object.kind {
            ObjectKind::TypedArray(view) => {
                (self.typed_length(view), PropertyAttributes::DEFAULT_JSPROPERTY, None)
            }
            ObjectKind::Primitive(JsValue::String(s)) => (
                s.encode_utf16().count(),
                PropertyAttributes::ENUMERABLE,
                Some(PropertyAttributes::DEFAULT),
            ),
            ObjectKind::Array { .. } => {
                (0, PropertyAttributes::DEFAULT, Some(PropertyAttributes::WRITABLE))
            }
            _ => (0, PropertyAttributes::DEFAULT, None),
        };

        let mut entries: Vec<(PropertyKey, PropertyAttributes)> = (0..elements)
            .map(|index| (PropertyKey::from(index as u32), elements_attributes))
            .collect();
        let keys = object.own_keys();
        let split = keys.iter().position(|k| k.as_index().is_none()).unwrap_or(keys.len());
        let attributes = |key: &PropertyKey| object.properties.get(key).map(PropertySlot::attributes);
        for key in &keys[..split] {
            if let Some(attrs) = attributes(key) {
                entries.push((key.clone(), attrs));
            }
        }
        if let Some(attrs) = length {
            entries.push((PropertyKey::from("length"), attrs));
        }
        for key in &keys[split..] {
            if let Some(attrs) = attributes(key) {
                entries.push((key.clone(), attrs));
            }
        }
        entries
    }

    /// Keys of `id`, or of its whole prototype chain, that pass `filter`
    ///
    /// A key shadowed by an own property further down the chain is reported
    /// once, and only if the shadowing property passes.
    pub(crate) fn collect_keys(
        &self,
        id: HeapId,
        mode: KeyCollectionMode,
        filter: KeyFilter,
    ) -> Vec<PropertyKey> {
        let mut keys = Vec::new();
        let mut seen: FxHashSet<PropertyKey> = FxHashSet::default();
        let mut current = Some(id);
        while let Some(cur) = current {
            for (key, attributes) in self.own_entries(cur) {
                if !seen.insert(key.clone()) || !filter.accepts(&key, attributes) {
                    continue;
                }
                keys.push(key);
            }
            if mode == KeyCollectionMode::OwnOnly {
                break;
            }
            current = self.object(cur).and_then(|o| o.prototype);
        }
        keys
    }

    /// Enumerable string keys of `id` and its prototype chain, own first
    pub(crate) fn enumerable_keys(&self, id: HeapId) -> Vec<Arc<str>> {
        let filter = KeyFilter::ENUMERABLE | KeyFilter::SKIP_SYMBOLS;
        self.collect_keys(id, KeyCollectionMode::IncludePrototypes, filter)
            .into_iter()
            .filter_map(|key| match key {
                PropertyKey::String(name) => Some(name),
                PropertyKey::Symbol(_) => None,
            })
            .collect()
    }

    // ==================== Calls ====================

    pub(crate) fn call(
        &mut self,
        function: &JsValue,
        this: JsValue,
        args: &[JsValue],
    ) -> Completion<JsValue> {
        let Some(data) = self.function_data(function) else {
            return Err(self.type_error("value is not a function"));
        };
        self.invoke(data, this, args, None)
    }

    pub(crate) fn construct(&mut self, function: &JsValue, args: &[JsValue]) -> Completion<JsValue> {
        let Some(data) = self.function_data(function) else {
            return Err(self.type_error("value is not a constructor"));
        };
        let prototype = match self.get_prop(function, &PropertyKey::from("prototype"))? {
            JsValue::Object(id) => id,
            _ => self.intrinsics.object_prototype,
        };
        let this = self.alloc_object(ObjectKind::Ordinary, Some(prototype))?;
        let result = self.invoke(data, JsValue::Object(this), args, Some(function.clone()))?;
        Ok(match result {
            JsValue::Object(_) => result,
            _ => JsValue::Object(this),
        })
    }

    fn function_data(&self, function: &JsValue) -> Option<FunctionData> {
        function
            .as_object()
            .and_then(|id| self.object(id))
            .and_then(JsObject::function)
            .cloned()
    }

    /// Run a native callback inside a fresh engine frame
    pub(crate) fn invoke(
        &mut self,
        function: FunctionData,
        this: JsValue,
        args: &[JsValue],
        new_target: Option<JsValue>,
    ) -> Completion<JsValue> {
        if self.shared.is_terminated() {
            return Err(Abrupt::Status(Status::CannotRunJs));
        }
        if self.call_depth >= self.shared.flags.max_call_depth {
            return Err(self.range_error("Maximum call stack size exceeded"));
        }

        self.call_depth += 1;
        let depth = self.handles.enter_engine_frame();
        let info = CallbackInfo {
            this: self.handles.push(this),
            args: args.iter().map(|a| self.handles.push(a.clone())).collect(),
            new_target: new_target.map(|t| self.handles.push(t)),
            data: function.data.clone(),
        };

        let result = (function.callback)(self, &info).and_then(|value| match value {
            Some(value) => self.get(value),
            None => Ok(JsValue::Undefined),
        });
        let completion = self.host_outcome(result);

        self.unwind_handles(depth);
        self.call_depth -= 1;
        completion
    }

    // ==================== Operators ====================

    pub(crate) fn strict_eq(&self, a: &JsValue, b: &JsValue) -> bool {
        match (a, b) {
            (JsValue::Number(x), JsValue::Number(y)) => x == y,
            _ => a == b,
        }
    }

    pub(crate) fn loose_equals(&mut self, a: &JsValue, b: &JsValue) -> Completion<bool> {
        use JsValue::*;
        Ok(match (a, b) {
            (Undefined | Null, Undefined | Null) => true,
            (Undefined | Null, _) | (_, Undefined | Null) => false,
            (Number(_), Number(_))
            | (String(_), String(_))
            | (Bool(_), Bool(_))
            | (Symbol(_), Symbol(_))
            | (Object(_), Object(_)) => self.strict_eq(a, b),
            (BigInt(x), BigInt(y)) => x == y,
            (BigInt(x), Number(y)) | (Number(y), BigInt(x)) => {
                compare_with_number(x, *y) == Some(Ordering::Equal)
            }
            (BigInt(x), String(s)) | (String(s), BigInt(x)) => {
                parse_bigint(s).is_some_and(|y| **x == y)
            }
            (Number(x), String(s)) => *x == string_to_number(s),
            (String(s), Number(y)) => string_to_number(s) == *y,
            (Bool(x), _) => {
                let x = Number(f64::from(u8::from(*x)));
                return self.loose_equals(&x, b);
            }
            (_, Bool(y)) => {
                let y = Number(f64::from(u8::from(*y)));
                return self.loose_equals(a, &y);
            }
            (Object(_), Number(_) | String(_) | BigInt(_) | Symbol(_)) => {
                let primitive = self.to_primitive(a, Hint::Default)?;
                return self.loose_equals(&primitive, b);
            }
            (Number(_) | String(_) | BigInt(_) | Symbol(_), Object(_)) => {
                let primitive = self.to_primitive(b, Hint::Default)?;
                return self.loose_equals(a, &primitive);
            }
            _ => false,
        })
    }

    fn less_than(&mut self, a: &JsValue, b: &JsValue) -> Completion<Option<bool>> {
        let a = self.to_primitive(a, Hint::Number)?;
        let b = self.to_primitive(b, Hint::Number)?;
        match (&a, &b) {
            (JsValue::String(x), JsValue::String(y)) => {
                return Ok(Some(compare_strings(x, y) == Ordering::Less));
            }
            (JsValue::BigInt(x), JsValue::BigInt(y)) => return Ok(Some(x < y)),
            (JsValue::BigInt(x), JsValue::String(s)) => {
                return Ok(parse_bigint(s).map(|y| **x < y));
            }
            (JsValue::String(s), JsValue::BigInt(y)) => {
                return Ok(parse_bigint(s).map(|x| x < **y));
            }
            (JsValue::BigInt(x), other) => {
                let y = self.to_number(other)?;
                return Ok(compare_with_number(x, y).map(|o| o == Ordering::Less));
            }
            (other, JsValue::BigInt(y)) => {
                let x = self.to_number(other)?;
                return Ok(compare_with_number(y, x).map(|o| o == Ordering::Greater));
            }
            _ => {}
        }
        let x = self.to_number(&a)?;
        let y = self.to_number(&b)?;
        Ok(x.partial_cmp(&y).map(|o| o == Ordering::Less))
    }

    pub(crate) fn ordinary_instance_of(&mut self, value: &JsValue, constructor: &JsValue) -> Completion<bool> {
        if !self.is_callable(constructor) {
            return Err(self.type_error("Right-hand side of 'instanceof' is not callable"));
        }
        let JsValue::Object(mut current) = *value else {
            return Ok(false);
        };
        let JsValue::Object(prototype) =
            self.get_prop(constructor, &PropertyKey::from("prototype"))?
        else {
            return Err(self.type_error(
                "Function has non-object prototype 'undefined' in instanceof check",
            ));
        };
        loop {
            match self.object(current).and_then(|o| o.prototype) {
                Some(next) if next == prototype => return Ok(true),
                Some(next) => current = next,
                None => return Ok(false),
            }
        }
    }

    pub(crate) fn unary(&mut self, op: UnaryOp, value: &JsValue) -> Completion<JsValue> {
        Ok(match op {
            UnaryOp::Neg | UnaryOp::BitNot => match self.to_numeric(value)? {
                Numeric::BigInt(n) => return self.bigint_unary(op, &n),
                Numeric::Number(n) if op == UnaryOp::Neg => JsValue::Number(-n),
                Numeric::Number(n) => JsValue::from(!to_int32(n)),
            },
            UnaryOp::ToNumber => JsValue::Number(self.to_number(value)?),
            UnaryOp::Not => JsValue::Bool(!self.to_boolean(value)),
            UnaryOp::TypeOf => JsValue::string(self.typeof_name(value)),
        })
    }

    /// Operands through `ToNumeric`; BigInts only combine with BigInts
    fn numeric_binary(&mut self, op: BinaryOp, a: &JsValue, b: &JsValue) -> Completion<JsValue> {
        let x = self.to_numeric(a)?;
        let y = self.to_numeric(b)?;
        match (x, y) {
            (Numeric::Number(x), Numeric::Number(y)) => Ok(number_binary(op, x, y)),
            (Numeric::BigInt(x), Numeric::BigInt(y)) => self.bigint_binary(op, &x, &y),
            _ => Err(self.type_error("Cannot mix BigInt and other types, use explicit conversions")),
        }
    }

    pub(crate) fn binary(&mut self, op: BinaryOp, a: &JsValue, b: &JsValue) -> Completion<JsValue> {
        match op {
            BinaryOp::Add => {
                let a = self.to_primitive(a, Hint::Default)?;
                let b = self.to_primitive(b, Hint::Default)?;
                if matches!(a, JsValue::String(_)) || matches!(b, JsValue::String(_)) {
                    let x = self.to_string(&a)?;
                    let y = self.to_string(&b)?;
                    let mut joined = String::with_capacity(x.len() + y.len());
                    joined.push_str(&x);
                    joined.push_str(&y);
                    return Ok(JsValue::String(Arc::from(joined)));
                }
                self.numeric_binary(op, &a, &b)
            }
            BinaryOp::Sub
            | BinaryOp::Mul
            | BinaryOp::Div
            | BinaryOp::Mod
            | BinaryOp::Pow
            | BinaryOp::BitAnd
            | BinaryOp::BitOr
            | BinaryOp::BitXor
            | BinaryOp::Shl
            | BinaryOp::Shr
            | BinaryOp::Ushr => self.numeric_binary(op, a, b),
            BinaryOp::Lt => Ok(JsValue::Bool(self.less_than(a, b)? == Some(true))),
            BinaryOp::Gt => Ok(JsValue::Bool(self.less_than(b, a)? == Some(true))),
            BinaryOp::Le => Ok(JsValue::Bool(self.less_than(b, a)? == Some(false))),
            BinaryOp::Ge => Ok(JsValue::Bool(self.less_than(a, b)? == Some(false))),
            BinaryOp::Eq => Ok(JsValue::Bool(self.loose_equals(a, b)?)),
            BinaryOp::Ne => Ok(JsValue::Bool(!self.loose_equals(a, b)?)),
            BinaryOp::StrictEq => Ok(JsValue::Bool(self.strict_eq(a, b))),
            BinaryOp::StrictNe => Ok(JsValue::Bool(!self.strict_eq(a, b))),
            BinaryOp::InstanceOf => Ok(JsValue::Bool(self.ordinary_instance_of(a, b)?)),
            BinaryOp::In => {
                let JsValue::Object(id) = *b else {
                    let key = self.to_string(a).unwrap_or_else(|_| Arc::from("key"));
                    return Err(self.type_error(format!(
                        "Cannot use 'in' operator to search for '{key}' in {}",
                        self.typeof_name(b)
                    )));
                };
                let key = self.to_property_key(a)?;
                Ok(JsValue::Bool(self.has_prop(id, &key)))
            }
        }
    }
}

fn key_text(key: &PropertyKey) -> String {
    match key {
        PropertyKey::String(s) => s.to_string(),
        PropertyKey::Symbol(_) => "Symbol()".to_string(),
    }
}
