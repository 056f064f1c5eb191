//! Embedding host shared by the commands.
//!
//! Owns one VM, installs the host globals and drives tasks and microtasks
//! after each script.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicIsize, Ordering};

use anyhow::{Context, Result};
use otter_jsvm::{
    Callback, CompileOptions, Env, EnvId, JsvmResult, MicrotaskPolicy, PromiseRejectEvent,
    PropertyAttributes, PropertyDescriptor, ScriptOrigin, Status, Value, ValueType, Vm, callback,
};

use crate::config::Config;

/// Native functions installed on every fresh global, in snapshot reference order
fn host_functions() -> Vec<(&'static str, Callback)> {
    vec![("print", callback(print))]
}

fn print(env: &mut Env, info: &otter_jsvm::CallbackInfo) -> JsvmResult<Option<Value>> {
    let mut parts = Vec::with_capacity(info.argc());
    for arg in info.args() {
        parts.push(describe(env, *arg)?);
    }
    println!("{}", parts.join(" "));
    Ok(None)
}

/// Render a value for the terminal
///
/// Plain objects and arrays print as JSON; everything else goes through
/// `ToString`.
pub fn describe(env: &mut Env, value: Value) -> JsvmResult<String> {
    let plain_object = env.type_of(value)? == ValueType::Object && !env.is_error(value)?;
    if plain_object {
        match env.json_stringify(value) {
            Ok(json) if env.type_of(json)? == ValueType::String => {
                return env.get_value_string_utf8(json);
            }
            Ok(_) => {}
            // Cycles throw; fall back to ToString
            Err(Status::PendingException) => {
                env.get_and_clear_last_exception()?;
            }
            Err(status) => return Err(status),
        }
    }
    if env.type_of(value)? == ValueType::Symbol {
        return Ok("Symbol()".to_string());
    }
    let string = env.coerce_to_string(value)?;
    env.get_value_string_utf8(string)
}

/// Render without entering script; used while the engine is mid-operation
fn brief(env: &Env, value: Value) -> String {
    match env.type_of(value) {
        Ok(ValueType::String) => env.get_value_string_utf8(value).unwrap_or_default(),
        Ok(ValueType::Number) => env
            .get_value_double(value)
            .map(|n| n.to_string())
            .unwrap_or_default(),
        Ok(kind) => format!("{kind:?}").to_lowercase(),
        Err(status) => status.to_string(),
    }
}

/// Where a script's compiled form is cached between runs
pub struct CodeCache<'a> {
    /// Cache file, read when present
    pub path: &'a Path,
    /// Write the compiled form back after compiling
    pub write: bool,
}

pub struct Host {
    vm: Vm,
    functions: Vec<(&'static str, Callback)>,
    from_snapshot: bool,
    max_tasks: usize,
    unhandled: Arc<AtomicIsize>,
}

impl Host {
    /// Create the VM described by `config`, optionally from a snapshot blob
    pub fn new(config: &Config, snapshot: Option<Vec<u8>>) -> Result<Self> {
        let functions = host_functions();
        let mut options = config
            .vm
            .clone()
            .external_references(functions.iter().map(|(_, f)| f.clone()).collect());
        let from_snapshot = snapshot.is_some();
        if let Some(blob) = snapshot {
            options = options.snapshot_blob(blob);
        }

        let mut vm = Vm::create(options)
            .map_err(|status| anyhow::anyhow!("failed to create VM: {status}"))?;
        vm.set_microtask_policy(config.host.microtask_policy())?;

        let unhandled = Arc::new(AtomicIsize::new(0));
        let counter = unhandled.clone();
        vm.set_handler_for_promise_reject(move |env, message| match message.event {
            PromiseRejectEvent::RejectWithNoHandler => {
                counter.fetch_add(1, Ordering::SeqCst);
                let reason = brief(env, message.reason);
                tracing::warn!(%reason, "promise rejected with no handler");
            }
            PromiseRejectEvent::HandlerAddedAfterReject => {
                counter.fetch_sub(1, Ordering::SeqCst);
            }
        })?;
        vm.set_handler_for_fatal_error(|location, message| {
            tracing::error!(%location, %message, "fatal error");
        })?;
        vm.set_handler_for_oom_error(|location, detail, is_heap| {
            tracing::error!(%location, %detail, is_heap, "out of memory");
        })?;

        Ok(Self {
            vm,
            functions,
            from_snapshot,
            max_tasks: config.host.max_tasks,
            unhandled,
        })
    }

    /// A fresh Env with the host globals, or snapshot context `context`
    pub fn create_env(&mut self, context: usize) -> Result<EnvId> {
        if self.from_snapshot {
            return self
                .vm
                .create_env_from_snapshot(context)
                .map_err(|status| {
                    anyhow::anyhow!("failed to restore snapshot context {context}: {status}")
                });
        }
        let globals: Vec<PropertyDescriptor> = self
            .functions
            .iter()
            .map(|(name, f)| {
                PropertyDescriptor::method(*name, f.clone(), PropertyAttributes::DEFAULT_METHOD)
            })
            .collect();
        Ok(self.vm.create_env(&globals)?)
    }

    /// Compile and run `source`, then drain queued work
    ///
    /// Returns the rendered completion value. An uncaught exception is
    /// returned as an error carrying its rendered value.
    pub fn execute(
        &mut self,
        id: EnvId,
        source: &str,
        resource: &str,
        cache: Option<CodeCache<'_>>,
    ) -> Result<String> {
        let env = self.vm.env_mut(id)?;
        let scope = env.open_handle_scope()?;
        let result = run_in_scope(env, source, resource, cache);
        env.close_handle_scope(scope)?;
        let rendered = result?;
        self.drain()?;
        Ok(rendered)
    }

    /// Pump tasks and microtasks until both queues are empty
    pub fn drain(&mut self) -> Result<()> {
        let mut pumped = 0usize;
        loop {
            if self.vm.microtask_policy() == MicrotaskPolicy::Explicit
                || self.vm.pending_microtask_count() > 0
            {
                self.checkpoint()?;
            }
            if self.max_tasks != 0 && pumped >= self.max_tasks {
                tracing::warn!(pending = self.vm.pending_task_count(), "task limit reached");
                break;
            }
            match self.vm.pump_message_loop() {
                Ok(true) => pumped += 1,
                Ok(false) => break,
                Err(Status::PendingException) => return Err(self.uncaught()),
                Err(status) => return Err(status.into()),
            }
        }
        tracing::debug!(tasks = pumped, "event loop idle");

        let unhandled = self.unhandled.load(Ordering::SeqCst);
        if unhandled > 0 {
            anyhow::bail!("{unhandled} promise rejection(s) were never handled");
        }
        Ok(())
    }

    fn checkpoint(&mut self) -> Result<()> {
        match self.vm.perform_microtask_checkpoint() {
            Ok(()) => Ok(()),
            Err(Status::PendingException) => Err(self.uncaught()),
            Err(status) => Err(status.into()),
        }
    }

    /// Clear the first pending exception and turn it into an error
    fn uncaught(&mut self) -> anyhow::Error {
        for id in self.vm.env_ids() {
            let Ok(env) = self.vm.env_mut(id) else {
                continue;
            };
            if env.is_exception_pending() {
                return take_exception(env);
            }
        }
        anyhow::anyhow!("{}", Status::PendingException)
    }

    /// Serialize the given Envs
    pub fn snapshot(&self, envs: &[EnvId]) -> Result<Vec<u8>> {
        self.vm
            .create_snapshot(envs)
            .map_err(|status| anyhow::anyhow!("failed to create snapshot: {status}"))
    }

    /// Tear the VM down, running every finalizer
    pub fn shutdown(mut self) -> Result<()> {
        self.vm.destroy()?;
        Ok(())
    }
}

fn run_in_scope(
    env: &mut Env,
    source: &str,
    resource: &str,
    cache: Option<CodeCache<'_>>,
) -> Result<String> {
    let mut options = CompileOptions::default().origin(ScriptOrigin::new(resource));
    if let Some(cache) = &cache
        && cache.path.exists()
    {
        let data = std::fs::read(cache.path)
            .with_context(|| format!("failed to read {}", cache.path.display()))?;
        options = options.cached_data(data).eager(true);
    } else if cache.is_some() {
        options = options.eager(true);
    }

    let compiled = match env.compile_script(source, options) {
        Ok(compiled) => compiled,
        Err(Status::PendingException) => return Err(take_exception(env)),
        Err(status) => return Err(status.into()),
    };
    if compiled.cache_rejected {
        tracing::info!(resource, "code cache rejected; recompiled");
    }
    if let Some(cache) = &cache
        && cache.write
    {
        let data = env.create_code_cache(compiled.script)?;
        std::fs::write(cache.path, &data)
            .with_context(|| format!("failed to write {}", cache.path.display()))?;
        tracing::debug!(path = %cache.path.display(), bytes = data.len(), "code cache written");
    }

    match env.run_script(compiled.script) {
        Ok(value) => Ok(describe(env, value)?),
        Err(Status::PendingException) => Err(take_exception(env)),
        Err(status) => Err(status.into()),
    }
}

fn take_exception(env: &mut Env) -> anyhow::Error {
    let rendered = env
        .get_and_clear_last_exception()
        .ok()
        .flatten()
        .and_then(|exception| describe(env, exception).ok());
    match rendered {
        Some(text) => anyhow::anyhow!("Uncaught {text}"),
        None => anyhow::anyhow!("{}", env.get_last_error_info().message),
    }
}
