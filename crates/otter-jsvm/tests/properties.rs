//! Property surface tests
//!
//! Object and array property access from the host, descriptor-driven
//! definition, integrity levels and the value helpers built on them.

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use otter_jsvm::{
    CallbackData, CompileOptions, Env, InitOptions, KeyCollectionMode, KeyConversion, KeyFilter, NativeData,
    PropertyAttributes, PropertyDescriptor, PropertyName, Status, Value, ValueType, Vm, VmOptions, callback,
};

fn setup() -> Vm {
    otter_jsvm::init(InitOptions::default()).unwrap();
    Vm::create(VmOptions::default()).unwrap()
}

fn names(env: &mut Env, object: Value) -> Vec<String> {
    let array = env.get_property_names(object).unwrap();
    let length = env.get_array_length(array).unwrap();
    (0..length)
        .map(|i| {
            let name = env.get_element(array, i).unwrap();
            env.get_value_string_utf8(name).unwrap()
        })
        .collect()
}

// ============================================================================
// Basic access
// ============================================================================

#[test]
fn test_named_and_keyed_access() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let object = env.create_object().unwrap();
    let one = env.create_int32(1).unwrap();
    env.set_named_property(object, "a", one).unwrap();
    let key = env.create_string_utf8("b").unwrap();
    let two = env.create_int32(2).unwrap();
    env.set_property(object, key, two).unwrap();

    assert_eq!(env.has_named_property(object, "a"), Ok(true));
    assert_eq!(env.has_property(object, key), Ok(true));
    assert_eq!(env.has_own_property(object, key), Ok(true));
    let b = env.get_named_property(object, "b").unwrap();
    assert_eq!(env.get_value_int32(b), Ok(2));

    let missing = env.get_named_property(object, "nope").unwrap();
    assert_eq!(env.type_of(missing), Ok(ValueType::Undefined));

    assert_eq!(env.delete_property(object, key), Ok(true));
    assert_eq!(env.has_property(object, key), Ok(false));
    assert_eq!(names(env, object), vec!["a".to_string()]);
}

#[test]
fn test_inherited_properties() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let object = env.create_object().unwrap();
    let to_string = env.create_string_utf8("toString").unwrap();
    assert_eq!(env.has_property(object, to_string), Ok(true));
    assert_eq!(env.has_own_property(object, to_string), Ok(false));

    let prototype = env.get_prototype(object).unwrap();
    assert_eq!(env.type_of(prototype), Ok(ValueType::Object));
    assert_eq!(env.has_own_property(prototype, to_string), Ok(true));
}

#[test]
fn test_non_name_key_rejected() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let object = env.create_object().unwrap();
    let number = env.create_int32(1).unwrap();
    assert_eq!(env.has_own_property(object, number), Err(Status::NameExpected));
    assert!(env.get_named_property(number, "x").is_ok());
    assert_eq!(env.has_named_property(number, "x"), Err(Status::ObjectExpected));
}

#[test]
fn test_symbol_keys() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let description = env.create_string_utf8("tag").unwrap();
    let a = env.create_symbol(Some(description)).unwrap();
    let b = env.create_symbol(Some(description)).unwrap();
    assert_eq!(env.type_of(a), Ok(ValueType::Symbol));
    assert_eq!(env.strict_equals(a, b), Ok(false));

    let shared = env.symbol_for("app.shared").unwrap();
    let again = env.symbol_for("app.shared").unwrap();
    assert_eq!(env.strict_equals(shared, again), Ok(true));

    let object = env.create_object().unwrap();
    let value = env.create_int32(5).unwrap();
    env.set_property(object, a, value).unwrap();
    assert_eq!(env.has_own_property(object, a), Ok(true));
    assert_eq!(env.has_own_property(object, b), Ok(false));
    // Symbol keys never show up in the name list
    assert!(names(env, object).is_empty());
}

// ============================================================================
// Arrays
// ============================================================================

#[test]
fn test_array_elements_and_length() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let array = env.create_array().unwrap();
    assert_eq!(env.is_array(array), Ok(true));
    assert_eq!(env.get_array_length(array), Ok(0));

    let value = env.create_string_utf8("x").unwrap();
    env.set_element(array, 4, value).unwrap();
    assert_eq!(env.get_array_length(array), Ok(5));
    assert_eq!(env.has_element(array, 4), Ok(true));
    assert_eq!(env.has_element(array, 0), Ok(false));

    assert_eq!(env.delete_element(array, 4), Ok(true));
    assert_eq!(env.has_element(array, 4), Ok(false));
    assert_eq!(env.get_array_length(array), Ok(5));

    let sized = env.create_array_with_length(3).unwrap();
    assert_eq!(env.get_array_length(sized), Ok(3));

    let object = env.create_object().unwrap();
    assert_eq!(env.is_array(object), Ok(false));
    assert_eq!(env.get_array_length(object), Err(Status::ArrayExpected));
}

#[test]
fn test_shrinking_length_drops_elements() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let array = env.create_array().unwrap();
    for i in 0..4 {
        let value = env.create_uint32(i).unwrap();
        env.set_element(array, i, value).unwrap();
    }
    let two = env.create_int32(2).unwrap();
    env.set_named_property(array, "length", two).unwrap();
    assert_eq!(env.get_array_length(array), Ok(2));
    assert_eq!(env.has_element(array, 3), Ok(false));
    assert_eq!(names(env, array), vec!["0".to_string(), "1".to_string()]);
}

fn eval(env: &mut Env, source: &str) -> Result<Value, Status> {
    let compiled = env.compile_script(source, CompileOptions::default())?;
    env.run_script(compiled.script)
}

fn eval_string(env: &mut Env, source: &str) -> String {
    let value = eval(env, source).unwrap();
    env.get_value_string_utf8(value).unwrap()
}

/// Clear the pending exception and return its `name`
fn thrown_name(env: &mut Env) -> String {
    let error = env.get_and_clear_last_exception().unwrap().unwrap();
    let name = env.get_named_property(error, "name").unwrap();
    env.get_value_string_utf8(name).unwrap()
}

#[test]
fn test_push_past_array_index_range() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    assert_eq!(
        eval(env, "var a = []; a.length = 4294967295; a.push(1, 2)"),
        Err(Status::PendingException)
    );
    assert_eq!(thrown_name(env), "RangeError");

    // The elements landed as plain properties before the length write failed
    let array = eval(env, "a").unwrap();
    assert_eq!(env.get_array_length(array), Ok(u32::MAX));
    assert_eq!(eval_string(env, "'' + a[4294967295] + a[4294967296]"), "12");

    let length = eval(env, "var o = { length: 4294967295 }; o.push = [].push; o.push(7)").unwrap();
    assert_eq!(env.get_value_double(length), Ok(4_294_967_296.0));
}

#[test]
fn test_push_past_safe_integer() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    assert_eq!(
        eval(env, "var o = { length: 9007199254740991, push: [].push }; o.push(1)"),
        Err(Status::PendingException)
    );
    assert_eq!(thrown_name(env), "TypeError");
    let length = eval(env, "o.length").unwrap();
    assert_eq!(env.get_value_double(length), Ok(9_007_199_254_740_991.0));
}

#[test]
fn test_join_respects_heap_limit() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    assert_eq!(
        eval(env, "var a = []; a.length = 4000000000; a.join()"),
        Err(Status::PendingException)
    );
    assert_eq!(thrown_name(env), "RangeError");

    // Holes cost nothing without a separator
    assert_eq!(eval_string(env, "a[5] = 'x'; a[7] = 'y'; a.join('')"), "xy");
    assert_eq!(eval_string(env, "var b = [1, 2]; b[4] = 5; b.join('-')"), "1-2---5");
}

#[test]
fn test_stringify_respects_heap_limit() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let huge = env.create_array_with_length(4_000_000_000).unwrap();
    assert_eq!(env.json_stringify(huge), Err(Status::PendingException));
    assert_eq!(thrown_name(env), "RangeError");

    // A small VM limit bounds the output of an ordinary array too
    let mut small = Vm::create(VmOptions::default().max_old_generation_size(256 * 1024)).unwrap();
    let id = small.create_env(&[]).unwrap();
    let env = small.env_mut(id).unwrap();
    let wide = env.create_array_with_length(100_000).unwrap();
    assert_eq!(env.json_stringify(wide), Err(Status::PendingException));
    assert_eq!(thrown_name(env), "RangeError");

    let short = env.create_array_with_length(2).unwrap();
    let json = env.json_stringify(short).unwrap();
    assert_eq!(env.get_value_string_utf8(json).unwrap(), "[null,null]");
}

// ============================================================================
// Descriptors
// ============================================================================

#[test]
fn test_define_value_attributes() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let object = env.create_object().unwrap();
    let fixed = env.create_int32(1).unwrap();
    let open = env.create_int32(2).unwrap();
    env.define_properties(
        object,
        &[
            PropertyDescriptor::value("fixed", fixed, PropertyAttributes::DEFAULT),
            PropertyDescriptor::value("open", open, PropertyAttributes::DEFAULT_JSPROPERTY),
        ],
    )
    .unwrap();

    // Default attributes: not enumerable, writable or configurable
    assert_eq!(names(env, object), vec!["open".to_string()]);
    let other = env.create_int32(9).unwrap();
    env.set_named_property(object, "fixed", other).unwrap();
    let read = env.get_named_property(object, "fixed").unwrap();
    assert_eq!(env.get_value_int32(read), Ok(1));
    let key = env.create_string_utf8("fixed").unwrap();
    assert_eq!(env.delete_property(object, key), Ok(false));

    // Redefining a non-configurable property throws
    let again = PropertyDescriptor::value("fixed", other, PropertyAttributes::DEFAULT);
    assert_eq!(
        env.define_properties(object, &[again]),
        Err(Status::PendingException)
    );
    env.get_and_clear_last_exception().unwrap();
}

#[test]
fn test_define_accessor_with_data() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let store = Arc::new(AtomicI32::new(10));
    let getter = callback(|env, info| {
        let store = info.data_as::<AtomicI32>().ok_or(Status::InvalidArg)?;
        env.create_int32(store.load(Ordering::SeqCst)).map(Some)
    });
    let setter = callback(|env, info| {
        let store = info.data_as::<AtomicI32>().ok_or(Status::InvalidArg)?;
        let value = env.get_value_int32(info.arg(0).ok_or(Status::InvalidArg)?)?;
        store.store(value, Ordering::SeqCst);
        Ok(None)
    });

    let object = env.create_object().unwrap();
    let data: CallbackData = store.clone();
    env.define_properties(
        object,
        &[PropertyDescriptor::accessor(
            "level",
            Some(getter),
            Some(setter),
            PropertyAttributes::ENUMERABLE,
        )
        .with_data(data)],
    )
    .unwrap();

    let level = env.get_named_property(object, "level").unwrap();
    assert_eq!(env.get_value_int32(level), Ok(10));
    let value = env.create_int32(33).unwrap();
    env.set_named_property(object, "level", value).unwrap();
    assert_eq!(store.load(Ordering::SeqCst), 33);
    assert_eq!(names(env, object), vec!["level".to_string()]);
}

#[test]
fn test_define_rejects_empty_accessor() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let object = env.create_object().unwrap();
    let empty = PropertyDescriptor::accessor("x", None, None, PropertyAttributes::DEFAULT);
    assert_eq!(env.define_properties(object, &[empty]), Err(Status::InvalidArg));
    assert!(!env.is_exception_pending());

    let number = env.create_int32(1).unwrap();
    let by_value = PropertyDescriptor {
        name: PropertyName::Value(number),
        ..PropertyDescriptor::value("unused", number, PropertyAttributes::DEFAULT)
    };
    assert_eq!(env.define_properties(object, &[by_value]), Err(Status::NameExpected));
}

#[test]
fn test_define_method_is_callable() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let method = callback(|env, info| {
        let this = info.this();
        env.get_named_property(this, "base").map(Some)
    });
    let object = env.create_object().unwrap();
    let base = env.create_int32(7).unwrap();
    env.set_named_property(object, "base", base).unwrap();
    env.define_properties(
        object,
        &[PropertyDescriptor::method(
            "read",
            method,
            PropertyAttributes::DEFAULT_METHOD,
        )],
    )
    .unwrap();

    let function = env.get_named_property(object, "read").unwrap();
    assert_eq!(env.type_of(function), Ok(ValueType::Function));
    let result = env.call_function(object, function, &[]).unwrap();
    assert_eq!(env.get_value_int32(result), Ok(7));
}

// ============================================================================
// Integrity levels
// ============================================================================

#[test]
fn test_freeze_and_seal() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let frozen = env.create_object().unwrap();
    let one = env.create_int32(1).unwrap();
    let two = env.create_int32(2).unwrap();
    env.set_named_property(frozen, "a", one).unwrap();
    env.object_freeze(frozen).unwrap();
    env.set_named_property(frozen, "a", two).unwrap();
    env.set_named_property(frozen, "b", two).unwrap();
    let a = env.get_named_property(frozen, "a").unwrap();
    assert_eq!(env.get_value_int32(a), Ok(1));
    assert_eq!(env.has_named_property(frozen, "b"), Ok(false));

    let sealed = env.create_object().unwrap();
    env.set_named_property(sealed, "a", one).unwrap();
    env.object_seal(sealed).unwrap();
    env.set_named_property(sealed, "a", two).unwrap();
    let a = env.get_named_property(sealed, "a").unwrap();
    assert_eq!(env.get_value_int32(a), Ok(2));
    let key = env.create_string_utf8("a").unwrap();
    assert_eq!(env.delete_property(sealed, key), Ok(false));
}

// ============================================================================
// Values
// ============================================================================

#[test]
fn test_coercions() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let text = env.create_string_utf8(" 12 ").unwrap();
    let number = env.coerce_to_number(text).unwrap();
    assert_eq!(env.get_value_double(number), Ok(12.0));

    let float = env.create_double(1.5).unwrap();
    let string = env.coerce_to_string(float).unwrap();
    assert_eq!(env.get_value_string_utf8(string).as_deref(), Ok("1.5"));

    let empty = env.create_string_utf8("").unwrap();
    let falsy = env.coerce_to_bool(empty).unwrap();
    assert_eq!(env.get_value_bool(falsy), Ok(false));

    let wrapped = env.coerce_to_object(float).unwrap();
    assert_eq!(env.type_of(wrapped), Ok(ValueType::Object));

    let null = env.get_null().unwrap();
    assert_eq!(env.coerce_to_object(null), Err(Status::PendingException));
    env.get_and_clear_last_exception().unwrap();
}

#[test]
fn test_number_reads() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let big = env.create_double(4_294_967_297.0).unwrap();
    assert_eq!(env.get_value_int32(big), Ok(1));
    assert_eq!(env.get_value_uint32(big), Ok(1));
    assert_eq!(env.get_value_int64(big), Ok(4_294_967_297));

    let nan = env.create_double(f64::NAN).unwrap();
    assert_eq!(env.get_value_int32(nan), Ok(0));
    assert_eq!(env.get_value_int64(nan), Ok(0));

    let text = env.create_string_utf8("1").unwrap();
    assert_eq!(env.get_value_int32(text), Err(Status::NumberExpected));
    assert_eq!(env.get_value_bool(text), Err(Status::BooleanExpected));
    assert_eq!(env.get_value_string_utf8(big), Err(Status::StringExpected));
}

#[test]
fn test_constructor_and_instance_of() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let point = callback(|env, info| {
        let this = info.this();
        if let Some(x) = info.arg(0) {
            env.set_named_property(this, "x", x)?;
        }
        Ok(None)
    });
    let constructor = env.create_function("Point", point, None).unwrap();
    let x = env.create_int32(3).unwrap();
    let instance = env.new_instance(constructor, &[x]).unwrap();

    assert_eq!(env.instance_of(instance, constructor), Ok(true));
    let read = env.get_named_property(instance, "x").unwrap();
    assert_eq!(env.get_value_int32(read), Ok(3));

    let plain = env.create_object().unwrap();
    assert_eq!(env.instance_of(plain, constructor), Ok(false));
    assert_eq!(env.instance_of(plain, x), Err(Status::FunctionExpected));
}

// ============================================================================
// Classes and key collection
// ============================================================================

fn point_class(env: &mut Env) -> Value {
    let point = callback(|env, info| {
        let this = info.this();
        if let Some(x) = info.arg(0) {
            env.set_named_property(this, "x", x)?;
        }
        Ok(None)
    });
    let double = callback(|env, info| {
        let x = env.get_named_property(info.this(), "x")?;
        let x = env.get_value_double(x)?;
        Ok(Some(env.create_double(x * 2.0)?))
    });
    let origin = callback(|env, _info| Ok(Some(env.create_int32(0)?)));
    let shared = env.create_string_utf8("shared").unwrap();
    env.define_class(
        "Point",
        point,
        None,
        &[
            PropertyDescriptor::method("double", double, PropertyAttributes::DEFAULT_METHOD),
            PropertyDescriptor::method(
                "origin",
                origin,
                PropertyAttributes::DEFAULT_METHOD | PropertyAttributes::STATIC,
            ),
            PropertyDescriptor::value("kind", shared, PropertyAttributes::DEFAULT_JSPROPERTY),
        ],
    )
    .unwrap()
}

#[test]
fn test_define_class() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let class = point_class(env);
    assert_eq!(env.type_of(class), Ok(ValueType::Function));
    let global = env.get_global().unwrap();
    env.set_named_property(global, "Point", class).unwrap();

    assert_eq!(eval_string(env, "'' + new Point(4).double()"), "8");
    assert_eq!(eval_string(env, "'' + Point.origin()"), "0");
    assert_eq!(
        eval_string(env, "typeof Point.prototype.origin + ' ' + typeof Point.prototype.double"),
        "undefined function"
    );
    assert_eq!(eval_string(env, "Point.name + ' ' + new Point(1).kind"), "Point shared");
    assert_eq!(eval_string(env, "'' + (new Point(1) instanceof Point)"), "true");

    let x = env.create_int32(2).unwrap();
    let instance = env.new_instance(class, &[x]).unwrap();
    assert_eq!(env.instance_of(instance, class), Ok(true));
}

#[test]
fn test_define_class_rejects_bad_descriptor() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let noop = callback(|_env, _info| Ok(None));
    let empty = PropertyDescriptor::accessor("x", None, None, PropertyAttributes::DEFAULT);
    assert_eq!(env.define_class("Empty", noop, None, &[empty]), Err(Status::InvalidArg));
}

/// Render a key array: numbers as `#n`, symbols as `@`
fn keys(env: &mut Env, array: Value) -> Vec<String> {
    let length = env.get_array_length(array).unwrap();
    (0..length)
        .map(|i| {
            let key = env.get_element(array, i).unwrap();
            match env.type_of(key).unwrap() {
                ValueType::Number => format!("#{}", env.get_value_int32(key).unwrap()),
                ValueType::Symbol => "@".to_string(),
                _ => env.get_value_string_utf8(key).unwrap(),
            }
        })
        .collect()
}

#[test]
fn test_get_all_property_names() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let class = point_class(env);
    let x = env.create_int32(1).unwrap();
    let instance = env.new_instance(class, &[x]).unwrap();
    env.set_element(instance, 0, x).unwrap();
    let symbol = env.create_symbol(None).unwrap();
    env.set_property(instance, symbol, x).unwrap();
    env.define_properties(
        instance,
        &[PropertyDescriptor::value("hidden", x, PropertyAttributes::DEFAULT)],
    )
    .unwrap();

    let own = env
        .get_all_property_names(instance, KeyCollectionMode::OwnOnly, KeyFilter::ALL, KeyConversion::KeepNumbers)
        .unwrap();
    assert_eq!(keys(env, own), vec!["#0", "x", "hidden", "@"]);

    let writable = env
        .get_all_property_names(
            instance,
            KeyCollectionMode::OwnOnly,
            KeyFilter::WRITABLE | KeyFilter::SKIP_SYMBOLS,
            KeyConversion::NumbersToStrings,
        )
        .unwrap();
    assert_eq!(keys(env, writable), vec!["0", "x"]);

    let chain = env
        .get_all_property_names(
            instance,
            KeyCollectionMode::IncludePrototypes,
            KeyFilter::ENUMERABLE | KeyFilter::SKIP_SYMBOLS,
            KeyConversion::NumbersToStrings,
        )
        .unwrap();
    assert_eq!(keys(env, chain), vec!["0", "x", "kind"]);

    let symbols = env
        .get_all_property_names(
            instance,
            KeyCollectionMode::OwnOnly,
            KeyFilter::SKIP_STRINGS,
            KeyConversion::KeepNumbers,
        )
        .unwrap();
    assert_eq!(keys(env, symbols), vec!["@"]);

    let number = env.create_int32(1).unwrap();
    assert_eq!(
        env.get_all_property_names(number, KeyCollectionMode::OwnOnly, KeyFilter::ALL, KeyConversion::KeepNumbers),
        Err(Status::ObjectExpected)
    );
}

#[test]
fn test_own_keys_of_arrays_and_strings() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let array = eval(env, "[1, 2]").unwrap();
    let names = env
        .get_all_property_names(array, KeyCollectionMode::OwnOnly, KeyFilter::ALL, KeyConversion::NumbersToStrings)
        .unwrap();
    assert_eq!(keys(env, names), vec!["0", "1", "length"]);

    let text = env.create_string_utf8("hi").unwrap();
    let wrapper = env.coerce_to_object(text).unwrap();
    let names = env
        .get_all_property_names(wrapper, KeyCollectionMode::OwnOnly, KeyFilter::ALL, KeyConversion::KeepNumbers)
        .unwrap();
    assert_eq!(keys(env, names), vec!["#0", "#1", "length"]);
}

// ============================================================================
// Latin-1 and UTF-16 strings
// ============================================================================

#[test]
fn test_latin1_and_utf16_strings() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let cafe = env.create_string_latin1(&[0x63, 0x61, 0x66, 0xE9]).unwrap();
    assert_eq!(env.get_value_string_utf8(cafe).unwrap(), "caf\u{e9}");
    assert_eq!(env.get_value_string_latin1(cafe).unwrap(), vec![0x63, 0x61, 0x66, 0xE9]);
    assert_eq!(env.get_value_string_utf16(cafe).unwrap(), vec![0x63, 0x61, 0x66, 0xE9]);

    let smile = env.create_string_utf16(&[0xD83D, 0xDE00]).unwrap();
    assert_eq!(env.get_value_string_utf8(smile).unwrap(), "\u{1F600}");
    assert_eq!(env.get_value_string_utf16(smile).unwrap(), vec![0xD83D, 0xDE00]);
    // Units past 0xFF keep their low byte
    assert_eq!(env.get_value_string_latin1(smile).unwrap(), vec![0x3D, 0x00]);

    let lone = env.create_string_utf16(&[0x61, 0xD800]).unwrap();
    assert_eq!(env.get_value_string_utf8(lone).unwrap(), "a\u{FFFD}");

    let global = env.get_global().unwrap();
    env.set_named_property(global, "smile", smile).unwrap();
    assert_eq!(eval_string(env, "'' + smile.length"), "2");

    let number = env.create_int32(1).unwrap();
    assert_eq!(env.get_value_string_latin1(number), Err(Status::StringExpected));
    assert_eq!(env.get_value_string_utf16(number), Err(Status::StringExpected));
}

#[test]
fn test_external_strings_are_copied() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let released = Arc::new(AtomicI32::new(0));
    let counter = released.clone();
    let (latin1, copied) = env
        .create_external_string_latin1(
            b"host".to_vec(),
            Some(Box::new(move |_: &mut Env, data: NativeData| {
                let bytes = data.downcast::<Vec<u8>>().unwrap();
                counter.fetch_add(bytes.len() as i32, Ordering::SeqCst);
            })),
        )
        .unwrap();
    assert!(copied);
    assert_eq!(released.load(Ordering::SeqCst), 4);
    assert_eq!(env.get_value_string_utf8(latin1).unwrap(), "host");

    let (utf16, copied) = env
        .create_external_string_utf16("wide".encode_utf16().collect(), None)
        .unwrap();
    assert!(copied);
    assert_eq!(env.get_value_string_utf8(utf16).unwrap(), "wide");
}
