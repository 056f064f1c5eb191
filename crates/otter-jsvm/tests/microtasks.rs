//! Microtask, promise and macrotask tests
//!
//! Microtasks drain automatically when the outermost script call returns
//! under the `Auto` policy and only at explicit checkpoints under
//! `Explicit`. Macrotasks run one per `pump_message_loop` call.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use otter_jsvm::{
    CompileOptions, Env, InitOptions, MicrotaskPolicy, PromiseRejectEvent, PropertyAttributes,
    PropertyDescriptor, Status, Value, Vm, VmOptions, callback,
};

fn setup() -> Vm {
    otter_jsvm::init(InitOptions::default()).unwrap();
    Vm::create(VmOptions::default()).unwrap()
}

fn eval(env: &mut Env, source: &str) -> Result<Value, Status> {
    let compiled = env.compile_script(source, CompileOptions::default())?;
    env.run_script(compiled.script)
}

fn counting_task(counter: &Arc<AtomicUsize>) -> otter_jsvm::NativeTask {
    let counter = counter.clone();
    Box::new(move |_env: &mut Env| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

// ============================================================================
// Policies
// ============================================================================

#[test]
fn test_auto_policy_drains_after_script() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let ran = Arc::new(AtomicUsize::new(0));
    env.enqueue_microtask(counting_task(&ran)).unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 0);

    eval(env, "1").unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(vm.pending_microtask_count(), 0);
}

#[test]
fn test_explicit_policy_waits_for_checkpoint() {
    let mut vm = setup();
    vm.set_microtask_policy(MicrotaskPolicy::Explicit).unwrap();
    assert_eq!(vm.microtask_policy(), MicrotaskPolicy::Explicit);
    let id = vm.create_env(&[]).unwrap();

    let ran = Arc::new(AtomicUsize::new(0));
    let env = vm.env_mut(id).unwrap();
    env.enqueue_microtask(counting_task(&ran)).unwrap();
    eval(env, "1").unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(vm.pending_microtask_count(), 1);

    vm.perform_microtask_checkpoint().unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(vm.pending_microtask_count(), 0);
}

#[test]
fn test_policy_change_applies_to_later_work() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();

    let early = Arc::new(AtomicUsize::new(0));
    let late = Arc::new(AtomicUsize::new(0));
    vm.env_mut(id)
        .unwrap()
        .enqueue_microtask(counting_task(&early))
        .unwrap();
    vm.set_microtask_policy(MicrotaskPolicy::Explicit).unwrap();
    let env = vm.env_mut(id).unwrap();
    env.enqueue_microtask(counting_task(&late)).unwrap();

    eval(env, "1").unwrap();
    assert_eq!(early.load(Ordering::SeqCst), 1);
    assert_eq!(late.load(Ordering::SeqCst), 0);

    vm.perform_microtask_checkpoint().unwrap();
    assert_eq!(late.load(Ordering::SeqCst), 1);
}

#[test]
fn test_microtasks_run_in_order_including_nested() {
    let mut vm = setup();
    vm.set_microtask_policy(MicrotaskPolicy::Explicit).unwrap();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let first = order.clone();
    let nested = order.clone();
    env.enqueue_microtask(Box::new(move |env: &mut Env| {
        first.lock().push("first");
        env.enqueue_microtask(Box::new(move |_: &mut Env| {
            nested.lock().push("nested");
            Ok(())
        }))
    }))
    .unwrap();
    let second = order.clone();
    env.enqueue_microtask(Box::new(move |_: &mut Env| {
        second.lock().push("second");
        Ok(())
    }))
    .unwrap();

    vm.perform_microtask_checkpoint().unwrap();
    assert_eq!(*order.lock(), vec!["first", "second", "nested"]);
}

fn message(env: &mut Env) -> String {
    let error = env.get_and_clear_last_exception().unwrap().unwrap();
    let message = env.get_named_property(error, "message").unwrap();
    env.get_value_string_utf8(message).unwrap()
}

#[test]
fn test_failing_microtask_leaves_exception_pending() {
    let mut vm = setup();
    vm.set_microtask_policy(MicrotaskPolicy::Explicit).unwrap();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let after = Arc::new(AtomicUsize::new(0));
    env.enqueue_microtask(Box::new(|env: &mut Env| {
        env.throw_error(None, "microtask failed")
    }))
    .unwrap();
    env.enqueue_microtask(counting_task(&after)).unwrap();

    assert_eq!(
        vm.perform_microtask_checkpoint(),
        Err(Status::PendingException)
    );
    // The drain stops at the failure; later work waits for the next one
    assert_eq!(after.load(Ordering::SeqCst), 0);
    assert_eq!(vm.pending_microtask_count(), 1);

    let env = vm.env_mut(id).unwrap();
    assert!(env.is_exception_pending());
    assert_eq!(message(env), "microtask failed");

    vm.perform_microtask_checkpoint().unwrap();
    assert_eq!(after.load(Ordering::SeqCst), 1);
}

#[test]
fn test_every_microtask_exception_surfaces() {
    let mut vm = setup();
    vm.set_microtask_policy(MicrotaskPolicy::Explicit).unwrap();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    for text in ["first", "second"] {
        env.enqueue_microtask(Box::new(move |env: &mut Env| env.throw_error(None, text)))
            .unwrap();
    }

    let mut seen = Vec::new();
    while vm.pending_microtask_count() > 0 {
        assert_eq!(
            vm.perform_microtask_checkpoint(),
            Err(Status::PendingException)
        );
        seen.push(message(vm.env_mut(id).unwrap()));
    }
    assert_eq!(seen, vec!["first", "second"]);
    vm.perform_microtask_checkpoint().unwrap();
}

#[test]
fn test_throwing_script_microtasks_under_auto_policy() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    // JSON.parse(undefined) throws a SyntaxError when each microtask runs
    assert_eq!(
        eval(env, "queueMicrotask(JSON.parse); queueMicrotask(JSON.parse); 0"),
        Err(Status::PendingException)
    );
    env.get_and_clear_last_exception().unwrap().unwrap();
    assert_eq!(vm.pending_microtask_count(), 1);

    // The next script run drains the second one and reports it too
    let env = vm.env_mut(id).unwrap();
    assert_eq!(eval(env, "1"), Err(Status::PendingException));
    assert!(env.get_and_clear_last_exception().unwrap().is_some());
    assert_eq!(vm.pending_microtask_count(), 0);
}

#[test]
fn test_checkpoint_skips_env_with_pending_exception() {
    let mut vm = setup();
    vm.set_microtask_policy(MicrotaskPolicy::Explicit).unwrap();
    let blocked = vm.create_env(&[]).unwrap();
    let clear = vm.create_env(&[]).unwrap();

    let blocked_ran = Arc::new(AtomicUsize::new(0));
    let clear_ran = Arc::new(AtomicUsize::new(0));
    let env = vm.env_mut(blocked).unwrap();
    env.enqueue_microtask(counting_task(&blocked_ran)).unwrap();
    env.throw_error(None, "stuck").unwrap();
    vm.env_mut(clear)
        .unwrap()
        .enqueue_microtask(counting_task(&clear_ran))
        .unwrap();

    assert_eq!(
        vm.perform_microtask_checkpoint(),
        Err(Status::PendingException)
    );
    assert_eq!(blocked_ran.load(Ordering::SeqCst), 0);
    assert_eq!(clear_ran.load(Ordering::SeqCst), 1);

    vm.env_mut(blocked)
        .unwrap()
        .get_and_clear_last_exception()
        .unwrap();
    vm.perform_microtask_checkpoint().unwrap();
    assert_eq!(blocked_ran.load(Ordering::SeqCst), 1);
}

#[test]
fn test_queue_microtask_from_script() {
    let mut vm = setup();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let record = callback(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    });
    let id = vm
        .create_env(&[PropertyDescriptor::method(
            "record",
            record,
            PropertyAttributes::DEFAULT_METHOD,
        )])
        .unwrap();
    let env = vm.env_mut(id).unwrap();

    eval(env, "queueMicrotask(record); queueMicrotask(record); 0").unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Promises
// ============================================================================

#[test]
fn test_resolve_runs_then_reaction() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    let on_fulfilled = callback(move |env, info| {
        let value = env.get_value_int32(info.arg(0).ok_or(Status::InvalidArg)?)?;
        *sink.lock() = Some(value);
        Ok(None)
    });

    let (deferred, promise) = env.create_promise().unwrap();
    assert_eq!(env.is_promise(promise), Ok(true));
    let handler = env.create_function("onFulfilled", on_fulfilled, None).unwrap();
    let derived = env.promise_then(promise, Some(handler), None).unwrap();
    assert_eq!(env.is_promise(derived), Ok(true));

    let value = env.create_int32(42).unwrap();
    env.resolve_deferred(deferred, value).unwrap();
    assert_eq!(*seen.lock(), Some(42));

    // A deferred settles once
    assert_eq!(env.resolve_deferred(deferred, value), Err(Status::InvalidArg));
}

#[test]
fn test_then_requires_callable_handlers() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let (_, promise) = env.create_promise().unwrap();
    let object = env.create_object().unwrap();
    assert_eq!(
        env.promise_then(promise, Some(object), None),
        Err(Status::FunctionExpected)
    );
    assert_eq!(
        env.promise_then(object, None, None),
        Err(Status::InvalidArg)
    );
}

#[test]
fn test_script_then_on_host_promise() {
    let mut vm = setup();
    let seen = Arc::new(Mutex::new(String::new()));
    let sink = seen.clone();
    let record = callback(move |env, info| {
        let text = env.get_value_string_utf8(info.arg(0).ok_or(Status::InvalidArg)?)?;
        sink.lock().push_str(&text);
        Ok(None)
    });
    let id = vm
        .create_env(&[PropertyDescriptor::method(
            "record",
            record,
            PropertyAttributes::DEFAULT_METHOD,
        )])
        .unwrap();
    let env = vm.env_mut(id).unwrap();

    let (deferred, promise) = env.create_promise().unwrap();
    let global = env.get_global().unwrap();
    env.set_named_property(global, "pending", promise).unwrap();
    eval(env, "pending.then(record)").unwrap();
    assert!(seen.lock().is_empty());

    let value = env.create_string_utf8("done").unwrap();
    env.resolve_deferred(deferred, value).unwrap();
    assert_eq!(seen.lock().as_str(), "done");
}

#[test]
fn test_unhandled_rejection_reported() {
    let mut vm = setup();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    vm.set_handler_for_promise_reject(move |env, message| {
        let reason = env.get_value_string_utf8(message.reason).ok();
        sink.lock().push((message.event, reason));
    })
    .unwrap();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let (deferred, promise) = env.create_promise().unwrap();
    let reason = env.create_string_utf8("nope").unwrap();
    env.reject_deferred(deferred, reason).unwrap();

    let catch = callback(|_, _| Ok(None));
    let handler = env.create_function("onRejected", catch, None).unwrap();
    env.promise_then(promise, None, Some(handler)).unwrap();

    let events = events.lock();
    assert_eq!(events.len(), 2);
    assert_eq!(
        events[0],
        (PromiseRejectEvent::RejectWithNoHandler, Some("nope".to_string()))
    );
    assert_eq!(events[1].0, PromiseRejectEvent::HandlerAddedAfterReject);
}

// ============================================================================
// Macrotasks
// ============================================================================

#[test]
fn test_pump_runs_one_task_at_a_time() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();

    let ran = Arc::new(AtomicUsize::new(0));
    let env = vm.env_mut(id).unwrap();
    env.post_task(counting_task(&ran)).unwrap();
    env.post_task(counting_task(&ran)).unwrap();
    assert_eq!(vm.pending_task_count(), 2);

    assert_eq!(vm.pump_message_loop(), Ok(true));
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(vm.pump_message_loop(), Ok(true));
    assert_eq!(vm.pump_message_loop(), Ok(false));
    assert_eq!(ran.load(Ordering::SeqCst), 2);
}

#[test]
fn test_task_queue_bound() {
    otter_jsvm::init(InitOptions::default()).unwrap();
    let mut vm = Vm::create(VmOptions::default().max_pending_tasks(1)).unwrap();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let ran = Arc::new(AtomicUsize::new(0));
    env.post_task(counting_task(&ran)).unwrap();
    assert_eq!(env.post_task(counting_task(&ran)), Err(Status::QueueFull));
}

#[test]
fn test_tasks_of_destroyed_env_are_dropped() {
    let mut vm = setup();
    let gone = vm.create_env(&[]).unwrap();
    let alive = vm.create_env(&[]).unwrap();

    let gone_ran = Arc::new(AtomicUsize::new(0));
    let alive_ran = Arc::new(AtomicUsize::new(0));
    vm.env_mut(gone)
        .unwrap()
        .post_task(counting_task(&gone_ran))
        .unwrap();
    vm.env_mut(alive)
        .unwrap()
        .post_task(counting_task(&alive_ran))
        .unwrap();
    vm.destroy_env(gone).unwrap();

    assert_eq!(vm.pump_message_loop(), Ok(true));
    assert_eq!(vm.pump_message_loop(), Ok(false));
    assert_eq!(gone_ran.load(Ordering::SeqCst), 0);
    assert_eq!(alive_ran.load(Ordering::SeqCst), 1);
}

#[test]
fn test_task_drains_microtasks_it_schedules() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();

    let ran = Arc::new(AtomicUsize::new(0));
    let inner = ran.clone();
    vm.env_mut(id)
        .unwrap()
        .post_task(Box::new(move |env: &mut Env| {
            env.enqueue_microtask(counting_task(&inner))
        }))
        .unwrap();

    assert_eq!(vm.pump_message_loop(), Ok(true));
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(vm.pending_microtask_count(), 0);
}
