//! Binary data, BigInt and Date tests
//!
//! Array buffers, typed arrays and data views created by the host and used
//! from script, plus the BigInt and Date value families.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use otter_jsvm::{
    CompileOptions, Env, InitOptions, NativeData, Status, TypedArrayType, Value, ValueType, Vm,
    VmOptions,
};

fn setup() -> Vm {
    otter_jsvm::init(InitOptions::default()).unwrap();
    Vm::create(VmOptions::default()).unwrap()
}

fn eval(env: &mut Env, source: &str) -> Result<Value, Status> {
    let compiled = env.compile_script(source, CompileOptions::default())?;
    env.run_script(compiled.script)
}

fn eval_string(env: &mut Env, source: &str) -> String {
    let value = eval(env, source).unwrap();
    env.get_value_string_utf8(value).unwrap()
}

fn eval_number(env: &mut Env, source: &str) -> f64 {
    let value = eval(env, source).unwrap();
    env.get_value_double(value).unwrap()
}

fn set_global(env: &mut Env, name: &str, value: Value) {
    let global = env.get_global().unwrap();
    env.set_named_property(global, name, value).unwrap();
}

/// Clear the pending exception and return `name: message`
fn thrown(env: &mut Env) -> String {
    let error = env.get_and_clear_last_exception().unwrap().unwrap();
    let name = env.get_named_property(error, "name").unwrap();
    let message = env.get_named_property(error, "message").unwrap();
    format!(
        "{}: {}",
        env.get_value_string_utf8(name).unwrap(),
        env.get_value_string_utf8(message).unwrap()
    )
}

// ============================================================================
// ArrayBuffer
// ============================================================================

#[test]
fn test_arraybuffer_bytes() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let buffer = env.create_arraybuffer(4).unwrap();
    assert_eq!(env.is_arraybuffer(buffer), Ok(true));
    assert_eq!(env.get_arraybuffer_info(buffer).unwrap(), &[0, 0, 0, 0]);

    env.get_arraybuffer_info_mut(buffer).unwrap()[2] = 7;
    assert_eq!(env.get_arraybuffer_info(buffer).unwrap(), &[0, 0, 7, 0]);

    set_global(env, "buffer", buffer);
    assert_eq!(eval_number(env, "buffer.byteLength"), 4.0);

    let object = env.create_object().unwrap();
    assert_eq!(env.is_arraybuffer(object), Ok(false));
    assert_eq!(env.get_arraybuffer_info(object).err(), Some(Status::ArraybufferExpected));
    assert_eq!(env.detach_arraybuffer(object), Err(Status::ArraybufferExpected));
}

#[test]
fn test_arraybuffer_over_limit_throws() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    assert_eq!(env.create_arraybuffer(usize::MAX), Err(Status::PendingException));
    assert_eq!(thrown(env), "RangeError: Array buffer allocation failed");
}

#[test]
fn test_detach_and_pin() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let buffer = env.create_arraybuffer(8).unwrap();
    assert_eq!(env.is_detached_arraybuffer(buffer), Ok(false));
    env.detach_arraybuffer(buffer).unwrap();
    assert_eq!(env.is_detached_arraybuffer(buffer), Ok(true));
    assert!(env.get_arraybuffer_info(buffer).unwrap().is_empty());
    // Detaching twice is harmless
    assert_eq!(env.detach_arraybuffer(buffer), Ok(()));

    let pinned = env.create_arraybuffer(8).unwrap();
    env.pin_arraybuffer(pinned).unwrap();
    assert_eq!(env.detach_arraybuffer(pinned), Err(Status::DetachableArraybufferExpected));
    assert_eq!(env.is_detached_arraybuffer(pinned), Ok(false));

    let number = env.create_int32(1).unwrap();
    assert_eq!(env.is_detached_arraybuffer(number), Ok(false));
}

#[test]
fn test_external_buffer_finalized_on_detach() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let released = Arc::new(AtomicUsize::new(0));
    let counter = released.clone();
    let buffer = env
        .create_external_arraybuffer(
            vec![1, 2, 3],
            Some(Box::new(move |_: &mut Env, data: NativeData| {
                let bytes = data.downcast::<Vec<u8>>().unwrap();
                counter.store(bytes.len(), Ordering::SeqCst);
            })),
        )
        .unwrap();
    assert_eq!(env.get_arraybuffer_info(buffer).unwrap(), &[1, 2, 3]);
    assert_eq!(released.load(Ordering::SeqCst), 0);

    env.detach_arraybuffer(buffer).unwrap();
    assert_eq!(released.load(Ordering::SeqCst), 3);
}

#[test]
fn test_external_buffer_finalized_on_teardown() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let released = Arc::new(AtomicUsize::new(0));
    let counter = released.clone();
    {
        let env = vm.env_mut(id).unwrap();
        env.create_external_arraybuffer(
            vec![0; 16],
            Some(Box::new(move |_: &mut Env, _: NativeData| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .unwrap();
    }
    vm.destroy().unwrap();
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

// ============================================================================
// TypedArray
// ============================================================================

#[test]
fn test_typedarray_views_buffer() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let buffer = env.create_arraybuffer(8).unwrap();
    let view = env.create_typedarray(TypedArrayType::Uint8, 4, buffer, 2).unwrap();
    assert_eq!(env.is_typedarray(view), Ok(true));
    assert_eq!(env.is_typedarray(buffer), Ok(false));
    assert_eq!(env.type_of(view), Ok(ValueType::Object));

    let info = env.get_typedarray_info(view).unwrap();
    assert_eq!(info.kind, TypedArrayType::Uint8);
    assert_eq!(info.length, 4);
    assert_eq!(info.byte_offset, 2);
    assert_eq!(env.strict_equals(info.buffer, buffer), Ok(true));

    set_global(env, "view", view);
    assert_eq!(eval_number(env, "view[0] = 258; view[1] = -1; view[0] + view[1]"), 257.0);
    assert_eq!(env.get_arraybuffer_info(buffer).unwrap(), &[0, 0, 2, 255, 0, 0, 0, 0]);
    assert_eq!(eval_number(env, "view.length + view.byteOffset"), 6.0);
    assert_eq!(eval_string(env, "typeof view[4]"), "undefined");
    assert_eq!(eval_string(env, "JSON.stringify(view)"), r#"{"0":2,"1":255,"2":0,"3":0}"#);
}

#[test]
fn test_typedarray_elements_are_little_endian() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let buffer = env.create_arraybuffer(8).unwrap();
    env.get_arraybuffer_info_mut(buffer)
        .unwrap()
        .copy_from_slice(&[1, 0, 0, 0, 0, 1, 0, 0]);
    let view = env.create_typedarray(TypedArrayType::Int32, 2, buffer, 0).unwrap();
    set_global(env, "view", view);
    assert_eq!(eval_number(env, "view[0] + view[1]"), 257.0);
}

#[test]
fn test_typedarray_bounds() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let buffer = env.create_arraybuffer(8).unwrap();
    assert_eq!(
        env.create_typedarray(TypedArrayType::Uint16, 1, buffer, 1),
        Err(Status::PendingException)
    );
    assert_eq!(thrown(env), "RangeError: start offset of Uint16Array should be a multiple of 2");

    assert_eq!(
        env.create_typedarray(TypedArrayType::Float64, 2, buffer, 0),
        Err(Status::PendingException)
    );
    assert_eq!(thrown(env), "RangeError: Invalid typed array length: 2");

    let object = env.create_object().unwrap();
    assert_eq!(
        env.create_typedarray(TypedArrayType::Uint8, 1, object, 0),
        Err(Status::ArraybufferExpected)
    );
    assert_eq!(env.get_typedarray_info(object).err(), Some(Status::InvalidArg));
}

#[test]
fn test_typedarray_after_detach() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let buffer = env.create_arraybuffer(4).unwrap();
    let view = env.create_typedarray(TypedArrayType::Int8, 4, buffer, 0).unwrap();
    env.detach_arraybuffer(buffer).unwrap();

    assert_eq!(env.get_typedarray_info(view).unwrap().length, 0);
    set_global(env, "view", view);
    assert_eq!(eval_number(env, "view.length"), 0.0);
    assert_eq!(eval_string(env, "typeof view[0]"), "undefined");

    assert_eq!(
        env.create_typedarray(TypedArrayType::Int8, 0, buffer, 0),
        Err(Status::PendingException)
    );
    assert_eq!(thrown(env), "TypeError: Cannot perform Construct on a detached ArrayBuffer");
}

#[test]
fn test_bigint_typedarray() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let buffer = env.create_arraybuffer(16).unwrap();
    let view = env.create_typedarray(TypedArrayType::BigInt64, 2, buffer, 0).unwrap();
    set_global(env, "view", view);

    let value = eval(env, "view[1] = BigInt(-2); view[1]").unwrap();
    assert_eq!(env.get_value_bigint_int64(value), Ok((-2, true)));
    assert_eq!(&env.get_arraybuffer_info(buffer).unwrap()[8..], &[0xFE, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);

    assert_eq!(eval(env, "view[0] = 1").err(), Some(Status::PendingException));
    assert_eq!(thrown(env), "TypeError: Cannot convert 1 to a BigInt");
}

// ============================================================================
// DataView
// ============================================================================

#[test]
fn test_dataview_accessors() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let buffer = env.create_arraybuffer(8).unwrap();
    let view = env.create_dataview(4, buffer, 2).unwrap();
    assert_eq!(env.is_dataview(view), Ok(true));
    assert_eq!(env.is_dataview(buffer), Ok(false));
    let info = env.get_dataview_info(view).unwrap();
    assert_eq!((info.byte_length, info.byte_offset), (4, 2));
    assert_eq!(env.strict_equals(info.buffer, buffer), Ok(true));

    set_global(env, "dv", view);
    // Big-endian unless asked otherwise
    assert_eq!(eval_number(env, "dv.setUint16(0, 4660); dv.getUint8(0)"), 18.0);
    assert_eq!(eval_number(env, "dv.setUint16(0, 4660, true); dv.getUint8(0)"), 52.0);
    assert_eq!(&env.get_arraybuffer_info(buffer).unwrap()[2..4], &[0x34, 0x12]);
    assert_eq!(eval_number(env, "dv.setFloat32(0, 1.5); dv.getFloat32(0)"), 1.5);

    assert_eq!(eval(env, "dv.getUint32(1)").err(), Some(Status::PendingException));
    assert_eq!(thrown(env), "RangeError: Offset is outside the bounds of the DataView");
}

#[test]
fn test_dataview_bounds() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let buffer = env.create_arraybuffer(8).unwrap();
    assert_eq!(env.create_dataview(1, buffer, 9), Err(Status::PendingException));
    assert_eq!(thrown(env), "RangeError: Start offset 9 is outside the bounds of the buffer");
    assert_eq!(env.create_dataview(4, buffer, 6), Err(Status::PendingException));
    assert_eq!(thrown(env), "RangeError: Invalid DataView length 4");

    let object = env.create_object().unwrap();
    assert_eq!(env.create_dataview(0, object, 0), Err(Status::ArraybufferExpected));
    assert_eq!(env.get_dataview_info(object).err(), Some(Status::InvalidArg));
}

// ============================================================================
// BigInt
// ============================================================================

#[test]
fn test_bigint_host_conversions() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let small = env.create_bigint_int64(-5).unwrap();
    assert_eq!(env.type_of(small), Ok(ValueType::Bigint));
    assert_eq!(env.get_value_bigint_int64(small), Ok((-5, true)));
    assert_eq!(env.get_value_bigint_uint64(small), Ok((u64::MAX - 4, false)));
    assert_eq!(env.get_value_bigint_words(small), Ok((true, vec![5])));

    let large = env.create_bigint_uint64(u64::MAX).unwrap();
    assert_eq!(env.get_value_bigint_uint64(large), Ok((u64::MAX, true)));
    assert_eq!(env.get_value_bigint_int64(large), Ok((-1, false)));

    let wide = env.create_bigint_words(true, &[0, 1]).unwrap();
    assert_eq!(env.get_value_bigint_words(wide), Ok((true, vec![0, 1])));
    assert_eq!(env.get_value_bigint_int64(wide), Ok((0, false)));

    // Negative zero normalizes to zero
    let zero = env.create_bigint_words(true, &[0]).unwrap();
    assert_eq!(env.get_value_bigint_words(zero), Ok((false, vec![])));

    let number = env.create_int32(1).unwrap();
    assert_eq!(env.get_value_bigint_int64(number), Err(Status::BigintExpected));
    assert_eq!(env.get_value_bigint_words(number), Err(Status::BigintExpected));
}

#[test]
fn test_bigint_in_script() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let power = eval(env, "BigInt(2) ** BigInt(64)").unwrap();
    assert_eq!(env.get_value_bigint_words(power), Ok((false, vec![0, 1])));
    assert_eq!(eval_string(env, "(BigInt(2) ** BigInt(64)).toString()"), "18446744073709551616");
    assert_eq!(eval_string(env, "BigInt('0xff').toString(2)"), "11111111");
    assert_eq!(eval_string(env, "typeof BigInt(1)"), "bigint");
    assert_eq!(eval_string(env, "'' + (BigInt(7) / BigInt(2) === BigInt(3))"), "true");
    assert_eq!(eval_string(env, "'' + (BigInt(1) == 1 && BigInt(2) > 1.5)"), "true");

    let host = env.create_bigint_int64(41).unwrap();
    set_global(env, "n", host);
    assert_eq!(eval_string(env, "(n + BigInt(1)).toString()"), "42");

    assert_eq!(eval(env, "BigInt(1) + 1").err(), Some(Status::PendingException));
    assert_eq!(
        thrown(env),
        "TypeError: Cannot mix BigInt and other types, use explicit conversions"
    );
    assert_eq!(eval(env, "BigInt(1.5)").err(), Some(Status::PendingException));
    assert_eq!(
        thrown(env),
        "RangeError: The number 1.5 cannot be converted to a BigInt because it is not an integer"
    );
    assert_eq!(eval(env, "BigInt(1) / BigInt(0)").err(), Some(Status::PendingException));
    assert_eq!(thrown(env), "RangeError: Division by zero");
    assert_eq!(eval(env, "JSON.stringify(BigInt(1))").err(), Some(Status::PendingException));
    assert_eq!(thrown(env), "TypeError: Do not know how to serialize a BigInt");
}

// ============================================================================
// Date
// ============================================================================

#[test]
fn test_date_values() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let date = env.create_date(1_700_000_000_123.9).unwrap();
    assert_eq!(env.is_date(date), Ok(true));
    assert_eq!(env.get_date_value(date), Ok(1_700_000_000_123.0));

    let invalid = env.create_date(f64::INFINITY).unwrap();
    assert!(env.get_date_value(invalid).unwrap().is_nan());

    let object = env.create_object().unwrap();
    assert_eq!(env.is_date(object), Ok(false));
    assert_eq!(env.get_date_value(object), Err(Status::DateExpected));

    set_global(env, "date", date);
    set_global(env, "invalid", invalid);
    assert_eq!(eval_string(env, "date.toISOString()"), "2023-11-14T22:13:20.123Z");
    assert_eq!(eval_number(env, "date.getTime() - date.valueOf()"), 0.0);
    assert_eq!(
        eval_string(env, "JSON.stringify({ when: date, never: invalid })"),
        r#"{"when":"2023-11-14T22:13:20.123Z","never":null}"#
    );
    assert_eq!(eval_string(env, "invalid.toString()"), "Invalid Date");

    assert_eq!(eval(env, "invalid.toISOString()").err(), Some(Status::PendingException));
    assert_eq!(thrown(env), "RangeError: Invalid time value");
}
