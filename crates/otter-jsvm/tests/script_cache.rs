//! Script compilation and code cache tests
//!
//! Covers cached-data acceptance and rejection, lazy compilation of long
//! sources, script lifetime under handle scopes and error locations.

use otter_jsvm::{
    CompileOptions, EAGER_COMPILE_THRESHOLD, Env, InitOptions, ScriptOrigin, Status, Vm,
    VmOptions,
};

fn setup() -> Vm {
    otter_jsvm::init(InitOptions::default()).unwrap();
    Vm::create(VmOptions::default()).unwrap()
}

/// A source longer than the eager threshold whose value is `line_count`
fn long_source() -> String {
    let mut source = String::from("var counter = 0;\n");
    let mut lines = 0;
    while source.len() <= EAGER_COMPILE_THRESHOLD {
        source.push_str("counter = counter + 1;\n");
        lines += 1;
    }
    source.push_str(&format!("counter === {lines}"));
    source
}

fn message(env: &mut Env) -> String {
    let error = env.get_and_clear_last_exception().unwrap().unwrap();
    let message = env.get_named_property(error, "message").unwrap();
    env.get_value_string_utf8(message).unwrap()
}

// ============================================================================
// Code cache
// ============================================================================

#[test]
fn test_cache_accepted_for_same_source() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let source = "var a = 20; a * 2 + 2";
    let first = env.compile_script(source, CompileOptions::default()).unwrap();
    let cache = env.create_code_cache(first.script).unwrap();
    assert!(!cache.is_empty());

    let second = env
        .compile_script(source, CompileOptions::default().cached_data(cache))
        .unwrap();
    assert!(!second.cache_rejected);
    let value = env.run_script(second.script).unwrap();
    assert_eq!(env.get_value_int32(value), Ok(42));
}

#[test]
fn test_cache_rejected_for_other_source() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let original = env.compile_script("1 + 1", CompileOptions::default()).unwrap();
    let cache = env.create_code_cache(original.script).unwrap();

    let changed = env
        .compile_script("2 + 2", CompileOptions::default().cached_data(cache))
        .unwrap();
    assert!(changed.cache_rejected);
    let value = env.run_script(changed.script).unwrap();
    assert_eq!(env.get_value_int32(value), Ok(4));
}

#[test]
fn test_cache_rejected_when_corrupt() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    for garbage in [Vec::new(), b"not a cache at all".to_vec(), vec![0xff; 64]] {
        let compiled = env
            .compile_script("3", CompileOptions::default().cached_data(garbage))
            .unwrap();
        assert!(compiled.cache_rejected);
        let value = env.run_script(compiled.script).unwrap();
        assert_eq!(env.get_value_int32(value), Ok(3));
    }
}

// ============================================================================
// Lazy compilation
// ============================================================================

#[test]
fn test_long_source_compiles_on_first_run() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let source = long_source();
    let compiled = env.compile_script(&source, CompileOptions::default()).unwrap();
    assert_eq!(
        env.create_code_cache(compiled.script),
        Err(Status::GenericFailure)
    );

    let value = env.run_script(compiled.script).unwrap();
    assert_eq!(env.get_value_bool(value), Ok(true));
    assert!(env.create_code_cache(compiled.script).is_ok());
}

#[test]
fn test_eager_option_compiles_up_front() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let source = long_source();
    let compiled = env
        .compile_script(&source, CompileOptions::default().eager(true))
        .unwrap();
    assert!(env.create_code_cache(compiled.script).is_ok());
}

#[test]
fn test_lazy_source_still_checked_for_syntax() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let mut source = long_source();
    source.push_str(" +");
    assert_eq!(
        env.compile_script(&source, CompileOptions::default()).err(),
        Some(Status::PendingException)
    );
    assert!(env.is_exception_pending());
    env.get_and_clear_last_exception().unwrap();
    assert_eq!(env.script_count(), 0);
}

// ============================================================================
// Lifetime
// ============================================================================

#[test]
fn test_script_dies_with_its_scope() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let scope = env.open_handle_scope().unwrap();
    let compiled = env.compile_script("5", CompileOptions::default()).unwrap();
    assert_eq!(env.script_count(), 1);
    env.close_handle_scope(scope).unwrap();

    assert_eq!(env.script_count(), 0);
    assert_eq!(env.run_script(compiled.script), Err(Status::InvalidArg));
    assert_eq!(
        env.create_code_cache(compiled.script),
        Err(Status::InvalidArg)
    );
}

#[test]
fn test_retained_script_outlives_scope() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let scope = env.open_handle_scope().unwrap();
    let compiled = env.compile_script("6", CompileOptions::default()).unwrap();
    env.retain_script(compiled.script).unwrap();
    assert_eq!(env.retain_script(compiled.script), Err(Status::InvalidArg));
    env.close_handle_scope(scope).unwrap();

    let scope = env.open_handle_scope().unwrap();
    let value = env.run_script(compiled.script).unwrap();
    assert_eq!(env.get_value_int32(value), Ok(6));

    // Released scripts belong to the innermost scope again
    env.release_script(compiled.script).unwrap();
    assert_eq!(env.release_script(compiled.script), Err(Status::InvalidArg));
    env.close_handle_scope(scope).unwrap();
    assert_eq!(env.run_script(compiled.script), Err(Status::InvalidArg));
}

// ============================================================================
// Origins
// ============================================================================

#[test]
fn test_origin_offsets_error_location() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    let origin = ScriptOrigin {
        resource_name: "page.html".to_string(),
        line: 10,
        column: 4,
    };
    let options = CompileOptions::default().origin(origin);
    assert_eq!(
        env.compile_script("x++", options).err(),
        Some(Status::PendingException)
    );
    assert!(message(env).ends_with("(page.html:11:5)"));

    // Offsets near the top of the range saturate instead of wrapping
    let origin = ScriptOrigin {
        resource_name: "far.js".to_string(),
        line: u32::MAX,
        column: u32::MAX,
    };
    let options = CompileOptions::default().origin(origin.clone());
    assert_eq!(
        env.compile_script("\nwhile (1) {}", options).err(),
        Some(Status::PendingException)
    );
    assert!(message(env).contains(":4294967295:"));

    let options = CompileOptions::default().origin(origin);
    assert_eq!(
        env.compile_script("x++", options).err(),
        Some(Status::PendingException)
    );
    assert!(message(env).ends_with("(far.js:4294967295:4294967295)"));
}

#[test]
fn test_anonymous_resource_name() {
    let mut vm = setup();
    let id = vm.create_env(&[]).unwrap();
    let env = vm.env_mut(id).unwrap();

    assert_eq!(
        env.compile_script("a => a", CompileOptions::default()).err(),
        Some(Status::PendingException)
    );
    assert!(message(env).contains("<anonymous>:1:1"));
}
