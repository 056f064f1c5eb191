//! Native data tests
//!
//! Wrapping, external values, type tags, finalizers and per-Env instance
//! data.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use otter_jsvm::{Env, Finalizer, InitOptions, NativeData, Status, TypeTag, ValueType, Vm, VmOptions};

fn setup() -> Vm {
    otter_jsvm::init(InitOptions::default()).unwrap();
    Vm::create(VmOptions::default()).unwrap()
}

fn counting_finalizer(counter: &Arc<AtomicUsize>) -> Finalizer {
    let counter = counter.clone();
    Box::new(move |_: &mut Env, _: NativeData| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

#[derive(Debug, PartialEq)]
struct Point {
    x: i32,
    y: i32,
}

const POINT_TAG: TypeTag = TypeTag::new(0x1234_5678_9abc_def0, 0x0fed_cba9_8765_4321);
const OTHER_TAG: TypeTag = TypeTag::new(1, 2);

// ============================================================================
// Wrap
// ============================================================================

#[test]
fn test_wrap_and_unwrap() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let object = env.create_object().unwrap();
    env.wrap(object, Box::new(Point { x: 1, y: 2 }), None).unwrap();
    assert_eq!(env.unwrap_as::<Point>(object), Ok(&Point { x: 1, y: 2 }));
    assert_eq!(env.unwrap_as::<String>(object).err(), Some(Status::InvalidArg));

    assert_eq!(
        env.wrap(object, Box::new(Point { x: 3, y: 4 }), None),
        Err(Status::InvalidArg)
    );

    let plain = env.create_object().unwrap();
    assert_eq!(env.unwrap(plain).err(), Some(Status::InvalidArg));
    let number = env.create_int32(1).unwrap();
    assert_eq!(env.unwrap(number).err(), Some(Status::ObjectExpected));
}

#[test]
fn test_remove_wrap_skips_finalizer() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let finalized = Arc::new(AtomicUsize::new(0));
    let env = vm.env_mut(id).unwrap();

    let object = env.create_object().unwrap();
    env.wrap(
        object,
        Box::new(Point { x: 5, y: 6 }),
        Some(counting_finalizer(&finalized)),
    )
    .unwrap();
    let data = env.remove_wrap(object).unwrap();
    assert_eq!(data.downcast_ref::<Point>(), Some(&Point { x: 5, y: 6 }));
    assert_eq!(env.unwrap(object).err(), Some(Status::InvalidArg));
    assert_eq!(env.remove_wrap(object).err(), Some(Status::InvalidArg));

    // The object can be wrapped again
    env.wrap(object, Box::new(7u8), None).unwrap();
    vm.destroy_env(id).unwrap();
    assert_eq!(finalized.load(Ordering::SeqCst), 0);
}

#[test]
fn test_wrap_finalizer_runs_on_collection() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let finalized = Arc::new(AtomicUsize::new(0));
    let env = vm.env_mut(id).unwrap();

    let scope = env.open_handle_scope().unwrap();
    let object = env.create_object().unwrap();
    env.wrap(object, Box::new(1u32), Some(counting_finalizer(&finalized)))
        .unwrap();
    env.add_finalizer(object, Box::new(2u32), counting_finalizer(&finalized))
        .unwrap();
    env.collect_garbage().unwrap();
    assert_eq!(finalized.load(Ordering::SeqCst), 0);
    env.close_handle_scope(scope).unwrap();

    env.collect_garbage().unwrap();
    assert_eq!(finalized.load(Ordering::SeqCst), 2);
}

#[test]
fn test_finalizers_run_when_env_destroyed() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let finalized = Arc::new(AtomicUsize::new(0));
    let env = vm.env_mut(id).unwrap();

    let object = env.create_object().unwrap();
    env.wrap(object, Box::new(()), Some(counting_finalizer(&finalized)))
        .unwrap();
    env.create_external(Box::new(()), Some(counting_finalizer(&finalized)))
        .unwrap();

    vm.destroy_env(id).unwrap();
    assert_eq!(finalized.load(Ordering::SeqCst), 2);
}

#[test]
fn test_finalizer_receives_data_and_env() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let seen = Arc::new(AtomicUsize::new(0));
    let sink = seen.clone();
    let env = vm.env_mut(id).unwrap();

    let object = env.create_object().unwrap();
    let finalizer: Finalizer = Box::new(move |env: &mut Env, data: NativeData| {
        // Finalizers may create values in their own frame
        let value = env.create_int32(1).unwrap();
        assert_eq!(env.get_value_int32(value), Ok(1));
        if let Ok(n) = data.downcast::<usize>() {
            sink.store(*n, Ordering::SeqCst);
        }
    });
    env.wrap(object, Box::new(17usize), Some(finalizer)).unwrap();
    vm.destroy_env(id).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 17);
}

#[test]
fn test_post_finalizer_runs_at_next_safepoint() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let finalized = Arc::new(AtomicUsize::new(0));
    let env = vm.env_mut(id).unwrap();

    env.post_finalizer(Box::new(()), counting_finalizer(&finalized))
        .unwrap();
    assert_eq!(finalized.load(Ordering::SeqCst), 0);
    env.create_object().unwrap();
    assert_eq!(finalized.load(Ordering::SeqCst), 1);
}

// ============================================================================
// External values
// ============================================================================

#[test]
fn test_external_values() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let external = env
        .create_external(Box::new(String::from("payload")), None)
        .unwrap();
    assert_eq!(env.type_of(external), Ok(ValueType::External));
    let data = env.get_value_external(external).unwrap();
    assert_eq!(data.downcast_ref::<String>().map(String::as_str), Some("payload"));

    let prototype = env.get_prototype(external).unwrap();
    assert_eq!(env.type_of(prototype), Ok(ValueType::Null));

    let object = env.create_object().unwrap();
    assert_eq!(env.get_value_external(object).err(), Some(Status::InvalidArg));
    let number = env.create_int32(1).unwrap();
    assert_eq!(
        env.get_value_external(number).err(),
        Some(Status::ObjectExpected)
    );
}

// ============================================================================
// Type tags
// ============================================================================

#[test]
fn test_type_tags() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let tagged = env.create_object().unwrap();
    let untagged = env.create_object().unwrap();
    env.type_tag_object(tagged, POINT_TAG).unwrap();

    assert_eq!(env.check_object_type_tag(tagged, POINT_TAG), Ok(true));
    assert_eq!(env.check_object_type_tag(tagged, OTHER_TAG), Ok(false));
    assert_eq!(env.check_object_type_tag(untagged, POINT_TAG), Ok(false));
    assert_eq!(
        env.type_tag_object(tagged, OTHER_TAG),
        Err(Status::InvalidArg)
    );

    let number = env.create_int32(1).unwrap();
    assert_eq!(
        env.check_object_type_tag(number, POINT_TAG),
        Err(Status::ObjectExpected)
    );
}

// ============================================================================
// Instance data and memory
// ============================================================================

#[test]
fn test_instance_data() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    let env = vm.env_mut(id).unwrap();

    assert!(env.get_instance_data().is_none());
    env.set_instance_data(Box::new(1u64), Some(counting_finalizer(&first)))
        .unwrap();
    assert_eq!(env.get_instance_data_as::<u64>(), Some(&1));

    // Replacing drops the old data without finalizing it
    env.set_instance_data(Box::new(2u64), Some(counting_finalizer(&second)))
        .unwrap();
    assert_eq!(env.get_instance_data_as::<u64>(), Some(&2));
    assert_eq!(env.get_instance_data_as::<u32>(), None);

    vm.destroy_env(id).unwrap();
    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 1);
}

#[test]
fn test_external_memory_accounting() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    assert_eq!(env.adjust_external_memory(4096), Ok(4096));
    assert_eq!(env.adjust_external_memory(-1024), Ok(3072));
    assert_eq!(env.heap_statistics().external_memory, 3072);
    assert!(env.heap_statistics().heap_size_limit > 0);
}
