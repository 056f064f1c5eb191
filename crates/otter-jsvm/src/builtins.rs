//! Intrinsic objects and the built-in globals of a fresh Env

use std::sync::Arc;

use otter_jsvm_gc::{GcHeap, HeapId};

use crate::bigint::{bigint_convert, bigint_to_string, bigint_value_of};
use crate::buffer;
use crate::callback::{Callback, CallbackData, callback};
use crate::date::{date_get_time, date_to_iso_string, date_to_json, date_to_string};
use crate::env::{Env, Intrinsics};
use crate::exception::{Abrupt, Completion, ErrorKind};
use crate::microtask::Job;
use crate::object::{FunctionData, HeapCell, JsObject, ObjectKind, PropertyKey, PropertySlot};
use crate::ops::{MAX_SAFE_INTEGER, number_to_string, to_length};
use crate::property::PropertyAttributes;
use crate::status::{JsvmResult, Status};
use crate::value::JsValue;

/// Arguments of a built-in call, already dereferenced
pub(crate) struct NativeCall {
    pub this: JsValue,
    pub args: Vec<JsValue>,
    pub data: Option<CallbackData>,
}

impl NativeCall {
    pub(crate) fn arg(&self, index: usize) -> JsValue {
        self.args.get(index).cloned().unwrap_or_default()
    }
}

type NativeFn = fn(&mut Env, &NativeCall) -> Completion<JsValue>;

/// Adapt an engine-side function to the host callback shape
pub(crate) fn native(f: NativeFn) -> Callback {
    callback(move |env, info| {
        let this = env.get(info.this())?;
        let args = info
            .args()
            .iter()
            .map(|a| env.get(*a))
            .collect::<JsvmResult<Vec<_>>>()?;
        let call = NativeCall {
            this,
            args,
            data: info.data().cloned(),
        };
        match f(env, &call) {
            Ok(value) => Ok(Some(env.push(value))),
            Err(Abrupt::Throw(value)) => {
                env.exception.throw(value);
                Err(Status::PendingException)
            }
            Err(Abrupt::Status(status)) => Err(status),
        }
    })
}

// ==================== Intrinsics ====================

struct Builder<'a> {
    heap: &'a mut GcHeap<HeapCell>,
    function_prototype: Option<HeapId>,
}

impl Builder<'_> {
    fn object(&mut self, kind: ObjectKind, prototype: Option<HeapId>) -> HeapId {
        self.heap
            .alloc(HeapCell::Object(JsObject::new(kind, prototype)))
    }

    fn put(&mut self, id: HeapId, key: &str, value: JsValue, attributes: PropertyAttributes) {
        if let Some(object) = self.heap.get_mut(id).and_then(HeapCell::as_object_mut) {
            object
                .properties
                .insert(PropertyKey::from(key), PropertySlot::Data { value, attributes });
        }
    }

    fn function(&mut self, name: &str, f: NativeFn, data: Option<CallbackData>) -> HeapId {
        let function = FunctionData {
            callback: native(f),
            data,
            name: Arc::from(name),
        };
        let id = self.object(ObjectKind::Function(function), self.function_prototype);
        self.put(
            id,
            "name",
            JsValue::string(name),
            PropertyAttributes::CONFIGURABLE,
        );
        id
    }

    fn method(&mut self, target: HeapId, name: &str, f: NativeFn) {
        self.method_with(target, name, f, None);
    }

    fn method_with(&mut self, target: HeapId, name: &str, f: NativeFn, data: Option<CallbackData>) {
        let function = self.function(name, f, data);
        self.put(
            target,
            name,
            JsValue::Object(function),
            PropertyAttributes::DEFAULT_METHOD,
        );
    }

    /// Read-only accessor
    fn getter(&mut self, target: HeapId, name: &str, f: NativeFn) {
        let getter = self.function(&format!("get {name}"), f, None);
        if let Some(object) = self.heap.get_mut(target).and_then(HeapCell::as_object_mut) {
            object.properties.insert(
                PropertyKey::from(name),
                PropertySlot::Accessor {
                    getter: Some(getter),
                    setter: None,
                    attributes: PropertyAttributes::CONFIGURABLE,
                },
            );
        }
    }
}

/// Build the intrinsic objects and the global object
pub(crate) fn create_intrinsics(heap: &mut GcHeap<HeapCell>) -> (Intrinsics, HeapId) {
    let mut b = Builder {
        heap,
        function_prototype: None,
    };

    let object_prototype = b.object(ObjectKind::Ordinary, None);
    let noop = FunctionData {
        callback: native(|_, _| Ok(JsValue::Undefined)),
        data: None,
        name: Arc::from(""),
    };
    let function_prototype = b.object(ObjectKind::Function(noop), Some(object_prototype));
    b.function_prototype = Some(function_prototype);

    let proto = Some(object_prototype);
    let array_prototype = b.object(ObjectKind::Ordinary, proto);
    let string_prototype = b.object(ObjectKind::Ordinary, proto);
    let number_prototype = b.object(ObjectKind::Ordinary, proto);
    let boolean_prototype = b.object(ObjectKind::Ordinary, proto);
    let symbol_prototype = b.object(ObjectKind::Ordinary, proto);
    let promise_prototype = b.object(ObjectKind::Ordinary, proto);
    let bigint_prototype = b.object(ObjectKind::Ordinary, proto);
    let date_prototype = b.object(ObjectKind::Ordinary, proto);
    let array_buffer_prototype = b.object(ObjectKind::Ordinary, proto);
    let typed_array_prototype = b.object(ObjectKind::Ordinary, proto);
    let data_view_prototype = b.object(ObjectKind::Ordinary, proto);

    b.method(object_prototype, "toString", object_to_string);
    b.method(object_prototype, "valueOf", object_value_of);
    b.method(object_prototype, "hasOwnProperty", object_has_own_property);
    b.method(function_prototype, "toString", function_to_string);
    b.method(array_prototype, "toString", array_to_string);
    b.method(array_prototype, "join", array_join);
    b.method(array_prototype, "push", array_push);
    b.method(string_prototype, "toString", string_value_of);
    b.method(string_prototype, "valueOf", string_value_of);
    b.method(number_prototype, "toString", number_to_string_method);
    b.method(number_prototype, "valueOf", number_value_of);
    b.method(boolean_prototype, "toString", boolean_to_string);
    b.method(boolean_prototype, "valueOf", boolean_value_of);
    b.method(symbol_prototype, "toString", symbol_to_string);
    b.method(promise_prototype, "then", promise_then);
    b.method(promise_prototype, "catch", promise_catch);
    b.method(bigint_prototype, "toString", bigint_to_string);
    b.method(bigint_prototype, "valueOf", bigint_value_of);
    b.method(date_prototype, "getTime", date_get_time);
    b.method(date_prototype, "valueOf", date_get_time);
    b.method(date_prototype, "toISOString", date_to_iso_string);
    b.method(date_prototype, "toJSON", date_to_json);
    b.method(date_prototype, "toString", date_to_string);
    b.getter(array_buffer_prototype, "byteLength", buffer::array_buffer_byte_length);
    b.getter(typed_array_prototype, "length", buffer::typed_array_length);
    b.getter(typed_array_prototype, "byteLength", buffer::typed_array_byte_length);
    b.getter(typed_array_prototype, "byteOffset", buffer::typed_array_byte_offset);
    b.getter(typed_array_prototype, "buffer", buffer::typed_array_buffer);
    b.getter(data_view_prototype, "byteLength", buffer::data_view_byte_length);
    b.getter(data_view_prototype, "byteOffset", buffer::data_view_byte_offset);
    b.getter(data_view_prototype, "buffer", buffer::data_view_buffer);
    for (get, set, kind) in buffer::data_view_accessors() {
        let data: CallbackData = Arc::new(kind);
        b.method_with(data_view_prototype, &get, buffer::data_view_get, Some(data.clone()));
        b.method_with(data_view_prototype, &set, buffer::data_view_set, Some(data));
    }

    let mut error_prototypes = [object_prototype; 5];
    let mut error_constructors = [object_prototype; 5];
    for kind in ErrorKind::ALL {
        let parent = match kind {
            ErrorKind::Error => object_prototype,
            _ => error_prototypes[ErrorKind::Error.index()],
        };
        let prototype = b.object(ObjectKind::Ordinary, Some(parent));
        b.put(
            prototype,
            "name",
            JsValue::string(kind.name()),
            PropertyAttributes::DEFAULT_METHOD,
        );
        b.put(
            prototype,
            "message",
            JsValue::string(""),
            PropertyAttributes::DEFAULT_METHOD,
        );
        if kind == ErrorKind::Error {
            b.method(prototype, "toString", error_to_string);
        }

        let constructor = b.function(kind.name(), error_constructor, Some(Arc::new(kind)));
        b.put(
            constructor,
            "prototype",
            JsValue::Object(prototype),
            PropertyAttributes::DEFAULT,
        );
        b.put(
            prototype,
            "constructor",
            JsValue::Object(constructor),
            PropertyAttributes::DEFAULT_METHOD,
        );
        error_prototypes[kind.index()] = prototype;
        error_constructors[kind.index()] = constructor;
    }

    let global = b.object(ObjectKind::Ordinary, Some(object_prototype));
    let intrinsics = Intrinsics {
        object_prototype,
        function_prototype,
        array_prototype,
        string_prototype,
        number_prototype,
        boolean_prototype,
        symbol_prototype,
        promise_prototype,
        bigint_prototype,
        date_prototype,
        array_buffer_prototype,
        typed_array_prototype,
        data_view_prototype,
        error_prototypes,
        error_constructors,
    };
    (intrinsics, global)
}

/// Install the built-in global bindings
pub(crate) fn install_globals(env: &mut Env) -> Completion<()> {
    let global = env.global;
    let constant = PropertyAttributes::DEFAULT;
    let binding = PropertyAttributes::DEFAULT_METHOD;

    env.put(global, "globalThis".into(), slot(JsValue::Object(global), binding));
    env.put(global, "undefined".into(), slot(JsValue::Undefined, constant));
    env.put(global, "NaN".into(), slot(JsValue::Number(f64::NAN), constant));
    env.put(global, "Infinity".into(), slot(JsValue::Number(f64::INFINITY), constant));

    for kind in ErrorKind::ALL {
        let constructor = env.intrinsics.error_constructors[kind.index()];
        env.put(global, kind.name().into(), slot(JsValue::Object(constructor), binding));
    }

    let bigint = env.alloc_function("BigInt", native(bigint_convert), None, false)?;
    let bigint_prototype = env.intrinsics.bigint_prototype;
    env.put(bigint, "prototype".into(), slot(JsValue::Object(bigint_prototype), constant));
    env.put(bigint_prototype, "constructor".into(), slot(JsValue::Object(bigint), binding));
    env.put(global, "BigInt".into(), slot(JsValue::Object(bigint), binding));

    let queue = env.alloc_function("queueMicrotask", native(queue_microtask), None, false)?;
    env.put(global, "queueMicrotask".into(), slot(JsValue::Object(queue), binding));

    let json = env.alloc_object(ObjectKind::Ordinary, Some(env.intrinsics.object_prototype))?;
    let stringify = env.alloc_function("stringify", native(json_stringify), None, false)?;
    let parse = env.alloc_function("parse", native(json_parse), None, false)?;
    env.put(json, "stringify".into(), slot(JsValue::Object(stringify), binding));
    env.put(json, "parse".into(), slot(JsValue::Object(parse), binding));
    env.put(global, "JSON".into(), slot(JsValue::Object(json), binding));

    if env.shared.flags.expose_gc {
        let collect = env.alloc_function("gc", native(gc), None, false)?;
        env.put(global, "gc".into(), slot(JsValue::Object(collect), binding));
    }
    Ok(())
}

fn slot(value: JsValue, attributes: PropertyAttributes) -> PropertySlot {
    PropertySlot::Data { value, attributes }
}

// ==================== Globals ====================

fn error_constructor(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    let kind = call
        .data
        .as_ref()
        .and_then(|d| d.downcast_ref::<ErrorKind>())
        .copied()
        .unwrap_or(ErrorKind::Error);
    let message = match call.arg(0) {
        JsValue::Undefined => Arc::from(""),
        value => env.to_string(&value)?,
    };
    Ok(JsValue::Object(env.make_error(kind, &message)?))
}

fn queue_microtask(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    let function = call.arg(0);
    if !env.is_callable(&function) {
        return Err(env.type_error("The \"callback\" argument must be of type function"));
    }
    env.schedule(Job::Call {
        function,
        args: Vec::new(),
    });
    Ok(JsValue::Undefined)
}

fn gc(env: &mut Env, _: &NativeCall) -> Completion<JsValue> {
    env.collect_garbage()?;
    Ok(JsValue::Undefined)
}

fn json_stringify(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    Ok(env
        .stringify(&call.arg(0))?
        .map_or(JsValue::Undefined, |s| JsValue::String(Arc::from(s))))
}

fn json_parse(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    let text = env.to_string(&call.arg(0))?;
    env.parse_json(&text)
}

// ==================== Object / Function ====================

fn object_to_string(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    let tag = match &call.this {
        JsValue::Undefined => "Undefined",
        JsValue::Null => "Null",
        JsValue::Object(id) => match env.object(*id).map(|o| &o.kind) {
            Some(ObjectKind::Array { .. }) => "Array",
            Some(ObjectKind::Function(_)) => "Function",
            Some(ObjectKind::Error) => "Error",
            Some(ObjectKind::Promise(_)) => "Promise",
            Some(ObjectKind::Date(_)) => "Date",
            Some(ObjectKind::ArrayBuffer(_)) => "ArrayBuffer",
            Some(ObjectKind::DataView(_)) => "DataView",
            Some(ObjectKind::TypedArray(view)) => view.kind.name(),
            Some(ObjectKind::Primitive(JsValue::String(_))) => "String",
            Some(ObjectKind::Primitive(JsValue::Number(_))) => "Number",
            Some(ObjectKind::Primitive(JsValue::Bool(_))) => "Boolean",
            Some(ObjectKind::Primitive(JsValue::BigInt(_))) => "BigInt",
            Some(ObjectKind::Primitive(JsValue::Symbol(_))) => "Symbol",
            _ => "Object",
        },
        JsValue::Bool(_) => "Boolean",
        JsValue::Number(_) => "Number",
        JsValue::String(_) => "String",
        JsValue::BigInt(_) => "BigInt",
        JsValue::Symbol(_) => "Symbol",
    };
    Ok(JsValue::String(Arc::from(format!("[object {tag}]"))))
}

fn object_value_of(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    Ok(JsValue::Object(env.to_object(&call.this)?))
}

fn object_has_own_property(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    let key = env.to_property_key(&call.arg(0))?;
    let id = env.to_object(&call.this)?;
    Ok(JsValue::Bool(env.has_own(id, &key)))
}

fn function_to_string(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    let name = call
        .this
        .as_object()
        .and_then(|id| env.object(id))
        .and_then(JsObject::function)
        .map(|f| f.name.clone());
    match name {
        Some(name) => Ok(JsValue::String(Arc::from(format!(
            "function {name}() {{ [native code] }}"
        )))),
        None => Err(env.type_error("Function.prototype.toString requires that 'this' be a Function")),
    }
}

// ==================== Array ====================

fn array_to_string(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    let join = NativeCall {
        this: call.this.clone(),
        args: Vec::new(),
        data: None,
    };
    array_join(env, &join)
}

fn array_join(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    let separator = match call.arg(0) {
        JsValue::Undefined => Arc::from(","),
        value => env.to_string(&value)?,
    };
    let length = env.get_prop(&call.this, &PropertyKey::from("length"))?;
    let length = to_length(env.to_number(&length)?);
    if length == 0.0 {
        return Ok(JsValue::string(""));
    }
    let separators = (length - 1.0) * separator.len() as f64;
    env.check_string_length(separators as usize)?;

    // Holes of a sparse array contribute only their separators
    let positions: Box<dyn Iterator<Item = f64>> = match env.sparse_elements(&call.this) {
        Some(indices) => Box::new(indices.into_iter().map(f64::from)),
        None => Box::new((0..length as u64).map(|index| index as f64)),
    };
    let mut joined = String::new();
    let mut done = 0.0;
    for index in positions.take_while(|index| *index < length) {
        let gap = index + 1.0 - f64::max(done, 1.0);
        env.check_string_length(joined.len() + gap as usize * separator.len())?;
        joined.push_str(&separator.repeat(gap as usize));
        done = index + 1.0;
        let element = env.get_prop(&call.this, &PropertyKey::from(index))?;
        if !element.is_nullish() {
            let text = env.to_string(&element)?;
            env.check_string_length(joined.len() + text.len())?;
            joined.push_str(&text);
        }
    }
    if length > f64::max(done, 1.0) {
        let gap = length - f64::max(done, 1.0);
        env.check_string_length(joined.len() + gap as usize * separator.len())?;
        joined.push_str(&separator.repeat(gap as usize));
    }
    Ok(JsValue::String(Arc::from(joined)))
}

fn array_push(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    let length = env.get_prop(&call.this, &PropertyKey::from("length"))?;
    let mut length = to_length(env.to_number(&length)?);
    if length + call.args.len() as f64 > MAX_SAFE_INTEGER {
        return Err(env.type_error(format!(
            "Pushing {} elements on an array-like of length {} is disallowed",
            call.args.len(),
            number_to_string(length)
        )));
    }
    for value in &call.args {
        env.set_prop(&call.this, PropertyKey::from(length), value.clone(), true)?;
        length += 1.0;
    }
    env.set_prop(&call.this, "length".into(), JsValue::Number(length), true)?;
    Ok(JsValue::Number(length))
}

// ==================== Primitive wrappers ====================

/// The primitive behind `this`, unwrapping wrapper objects
fn this_primitive(env: &Env, this: &JsValue) -> JsValue {
    match this {
        JsValue::Object(id) => match env.object(*id).map(|o| &o.kind) {
            Some(ObjectKind::Primitive(value)) => value.clone(),
            _ => this.clone(),
        },
        _ => this.clone(),
    }
}

fn string_value_of(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    match this_primitive(env, &call.this) {
        value @ JsValue::String(_) => Ok(value),
        _ => Err(env.type_error("String.prototype.valueOf requires that 'this' be a String")),
    }
}

fn number_value_of(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    match this_primitive(env, &call.this) {
        value @ JsValue::Number(_) => Ok(value),
        _ => Err(env.type_error("Number.prototype.valueOf requires that 'this' be a Number")),
    }
}

fn number_to_string_method(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    let JsValue::Number(n) = number_value_of(env, call)? else {
        return Ok(JsValue::Undefined);
    };
    let radix = match call.arg(0) {
        JsValue::Undefined => 10.0,
        value => env.to_number(&value)?.trunc(),
    };
    if !(2.0..=36.0).contains(&radix) {
        return Err(env.range_error("toString() radix must be between 2 and 36"));
    }
    if radix == 10.0 || !n.is_finite() || n.fract() != 0.0 || n.abs() > 9_007_199_254_740_991.0 {
        return Ok(JsValue::String(Arc::from(number_to_string(n))));
    }
    let radix = radix as u64;
    let mut magnitude = n.abs() as u64;
    let mut digits = Vec::new();
    loop {
        let digit = (magnitude % radix) as u32;
        digits.push(std::char::from_digit(digit, radix as u32).unwrap_or('0'));
        magnitude /= radix;
        if magnitude == 0 {
            break;
        }
    }
    if n < 0.0 {
        digits.push('-');
    }
    Ok(JsValue::String(Arc::from(
        digits.into_iter().rev().collect::<String>(),
    )))
}

fn boolean_value_of(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    match this_primitive(env, &call.this) {
        value @ JsValue::Bool(_) => Ok(value),
        _ => Err(env.type_error("Boolean.prototype.valueOf requires that 'this' be a Boolean")),
    }
}

fn boolean_to_string(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    let value = boolean_value_of(env, call)?;
    Ok(JsValue::String(env.to_string(&value)?))
}

fn symbol_to_string(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    match this_primitive(env, &call.this) {
        JsValue::Symbol(id) => Ok(JsValue::String(Arc::from(env.symbol_display(id)))),
        _ => Err(env.type_error("Symbol.prototype.toString requires that 'this' be a Symbol")),
    }
}

// ==================== Error ====================

fn error_to_string(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    if !matches!(call.this, JsValue::Object(_)) {
        return Err(env.type_error("Error.prototype.toString requires that 'this' be an Object"));
    }
    let name = match env.get_prop(&call.this, &"name".into())? {
        JsValue::Undefined => Arc::from("Error"),
        value => env.to_string(&value)?,
    };
    let message = match env.get_prop(&call.this, &"message".into())? {
        JsValue::Undefined => Arc::from(""),
        value => env.to_string(&value)?,
    };
    let text = match (name.is_empty(), message.is_empty()) {
        (_, true) => name.to_string(),
        (true, false) => message.to_string(),
        (false, false) => format!("{name}: {message}"),
    };
    Ok(JsValue::String(Arc::from(text)))
}

// ==================== Promise ====================

fn this_promise(env: &mut Env, this: &JsValue) -> Completion<HeapId> {
    match this.as_object() {
        Some(id) if env.is_promise_id(id) => Ok(id),
        _ => Err(env.type_error("Method Promise.prototype.then called on incompatible receiver")),
    }
}

fn promise_then(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    let promise = this_promise(env, &call.this)?;
    let derived = env.perform_then(promise, call.arg(0), call.arg(1))?;
    Ok(JsValue::Object(derived))
}

fn promise_catch(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    let promise = this_promise(env, &call.this)?;
    let derived = env.perform_then(promise, JsValue::Undefined, call.arg(0))?;
    Ok(JsValue::Object(derived))
}
