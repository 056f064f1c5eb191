//! Virtual machines
//!
//! A [`Vm`] owns its Envs, the microtask and macrotask queues they share,
//! the fatal-condition handlers and the startup snapshot. State that Envs
//! must reach while running lives in [`VmShared`] behind an `Arc`; everything
//! else stays on the `Vm` and is only reachable through `&mut Vm`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::callback::Callback;
use crate::config::{DEFAULT_MAX_PENDING_TASKS, HeapLimits, VmOptions};
use crate::env::{Env, EnvId};
use crate::microtask::{MicrotaskPolicy, MicrotaskQueue, Task};
use crate::process::{self, ProcessFlags};
use crate::promise::PromiseRejectMessage;
use crate::property::{Accessor, PropertyDescriptor, PropertyName};
use crate::snapshot::SnapshotBlob;
use crate::status::{JsvmResult, Status};

/// Called when an Env exceeds its heap limit: `(location, detail, is_heap_oom)`
pub type OomHandler = Arc<dyn Fn(&str, &str, bool) + Send + Sync>;

/// Called on unrecoverable engine errors: `(location, message)`
pub type FatalErrorHandler = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Called when a promise is rejected without a handler, or gains one late
pub type PromiseRejectHandler = Arc<dyn Fn(&mut Env, &PromiseRejectMessage) + Send + Sync>;

static NEXT_VM_ID: AtomicU32 = AtomicU32::new(1);

#[derive(Default)]
struct Handlers {
    oom: Option<OomHandler>,
    fatal: Option<FatalErrorHandler>,
    promise_reject: Option<PromiseRejectHandler>,
}

/// VM state reachable from its Envs
pub(crate) struct VmShared {
    pub id: u32,
    terminated: AtomicBool,
    policy: AtomicU8,
    pub microtasks: Mutex<MicrotaskQueue>,
    pub tasks: Mutex<VecDeque<Task>>,
    pub max_pending_tasks: usize,
    handlers: RwLock<Handlers>,
    pub external_references: Vec<Callback>,
    pub flags: ProcessFlags,
    pub limits: HeapLimits,
}

impl VmShared {
    /// Whether a fatal condition stopped script execution for good
    #[inline]
    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub(crate) fn microtask_policy(&self) -> MicrotaskPolicy {
        MicrotaskPolicy::from_u8(self.policy.load(Ordering::Acquire))
    }

    /// Report an out-of-memory condition and stop script execution
    pub(crate) fn out_of_memory(&self, location: &str, detail: &str, is_heap: bool) {
        self.terminated.store(true, Ordering::Release);
        let handler = self.handlers.read().oom.clone();
        match handler {
            Some(handler) => handler(location, detail, is_heap),
            None => tracing::error!(vm = self.id, location, detail, "out of memory"),
        }
    }

    /// Report an unrecoverable engine error and stop script execution
    pub(crate) fn fatal_error(&self, location: &str, message: &str) {
        self.terminated.store(true, Ordering::Release);
        let handler = self.handlers.read().fatal.clone();
        match handler {
            Some(handler) => handler(location, message),
            None => tracing::error!(vm = self.id, location, message, "fatal engine error"),
        }
    }

    pub(crate) fn promise_reject_handler(&self) -> Option<PromiseRejectHandler> {
        self.handlers.read().promise_reject.clone()
    }

    /// Drop queued work of a destroyed Env
    pub(crate) fn forget_env(&self, env: EnvId) {
        self.microtasks.lock().remove_env(env);
        self.tasks.lock().retain(|task| task.env != env);
    }
}

/// An open VM scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VmScope {
    vm: u32,
    serial: u32,
}

/// An open Env scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvScope {
    env: EnvId,
    serial: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenScope {
    Vm(u32),
    Env(EnvId, u32),
}

#[derive(Default)]
struct EnvSlot {
    generation: u32,
    env: Option<Box<Env>>,
}

/// A virtual machine and the Envs it owns
pub struct Vm {
    shared: Arc<VmShared>,
    slots: Vec<EnvSlot>,
    /// Live Env indices in creation order
    order: Vec<u32>,
    free: Vec<u32>,
    snapshot: Option<SnapshotBlob>,
    scopes: Vec<OpenScope>,
    next_scope_serial: u32,
    closing: bool,
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("id", &self.shared.id)
            .field("envs", &self.order.len())
            .field("open_scopes", &self.scopes.len())
            .field("closing", &self.closing)
            .finish()
    }
}

impl Vm {
    /// Create a VM
    ///
    /// Fails with `GenericFailure` before [`init`](crate::init) or when the
    /// snapshot blob does not decode.
    pub fn create(options: VmOptions) -> JsvmResult<Self> {
        if !process::is_initialized() {
            tracing::warn!("vm created before process initialization");
            return Err(Status::GenericFailure);
        }
        let flags = process::process_flags().cloned().unwrap_or_default();
        let limits = HeapLimits::resolve(&options, flags.max_old_space_size);
        let snapshot = options
            .snapshot_blob
            .as_deref()
            .map(SnapshotBlob::from_bytes)
            .transpose()?;

        let id = NEXT_VM_ID.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(VmShared {
            id,
            terminated: AtomicBool::new(false),
            policy: AtomicU8::new(MicrotaskPolicy::Auto.to_u8()),
            microtasks: Mutex::new(MicrotaskQueue::default()),
            tasks: Mutex::new(VecDeque::new()),
            max_pending_tasks: options
                .max_pending_tasks
                .unwrap_or(DEFAULT_MAX_PENDING_TASKS),
            handlers: RwLock::new(Handlers::default()),
            external_references: options.external_references,
            flags,
            limits,
        });
        tracing::debug!(
            vm = id,
            hard_limit = limits.hard_limit,
            snapshot_contexts = snapshot.as_ref().map_or(0, |s| s.contexts.len()),
            "vm created"
        );

        Ok(Self {
            shared,
            slots: Vec::new(),
            order: Vec::new(),
            free: Vec::new(),
            snapshot,
            scopes: Vec::new(),
            next_scope_serial: 1,
            closing: false,
        })
    }

    fn check_open(&self) -> JsvmResult<()> {
        if self.closing {
            Err(Status::Closing)
        } else {
            Ok(())
        }
    }

    /// Whether a fatal condition stopped script execution in this VM
    pub fn is_terminated(&self) -> bool {
        self.shared.is_terminated()
    }

    // ==================== Envs ====================

    fn insert_env(&mut self) -> (EnvId, &mut Env) {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(EnvSlot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let id = EnvId {
            vm: self.shared.id,
            index,
            generation: self.slots[index as usize].generation,
        };
        let env = Box::new(Env::new(id, self.shared.clone()));
        self.order.push(index);
        let env: &mut Env = self.slots[index as usize].env.insert(env);
        (id, env)
    }

    /// Remove an Env without tearing it down
    fn take_env(&mut self, id: EnvId) -> Option<Box<Env>> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let env = slot.env.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.order.retain(|index| *index != id.index);
        Some(env)
    }

    /// Create an Env whose global object carries `properties`
    ///
    /// Descriptors are applied in order. Data values and value-named
    /// properties need an existing Env and are rejected with `InvalidArg`.
    pub fn create_env(&mut self, properties: &[PropertyDescriptor]) -> JsvmResult<EnvId> {
        self.check_open()?;
        let needs_env = properties.iter().any(|p| {
            matches!(p.kind, Accessor::Value(_)) || matches!(p.name, PropertyName::Value(_))
        });
        if needs_env {
            return Err(Status::InvalidArg);
        }

        let (id, env) = self.insert_env();
        let global = env.global;
        let mut result = Ok(());
        for descriptor in properties {
            result = env.op(|env| env.apply_descriptor(global, descriptor));
            if result.is_err() {
                break;
            }
        }
        if let Err(status) = result {
            if let Some(mut env) = self.take_env(id) {
                env.teardown();
            }
            return Err(status);
        }
        Ok(id)
    }

    /// Create an Env from context `index` of the startup snapshot
    pub fn create_env_from_snapshot(&mut self, index: usize) -> JsvmResult<EnvId> {
        self.check_open()?;
        let context = self
            .snapshot
            .as_ref()
            .and_then(|s| s.contexts.get(index))
            .cloned()
            .ok_or(Status::InvalidArg)?;

        let (id, env) = self.insert_env();
        if let Err(status) = env.op(|env| env.restore_context(&context)) {
            if let Some(mut env) = self.take_env(id) {
                env.teardown();
            }
            return Err(status);
        }
        Ok(id)
    }

    /// Number of contexts in the startup snapshot
    pub fn snapshot_context_count(&self) -> usize {
        self.snapshot.as_ref().map_or(0, |s| s.contexts.len())
    }

    /// Look up a live Env
    pub fn env(&self, id: EnvId) -> JsvmResult<&Env> {
        self.check_open()?;
        if id.vm != self.shared.id {
            return Err(Status::InvalidArg);
        }
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.env.as_deref())
            .ok_or(Status::InvalidArg)
    }

    /// Look up a live Env for mutation
    pub fn env_mut(&mut self, id: EnvId) -> JsvmResult<&mut Env> {
        self.check_open()?;
        if id.vm != self.shared.id {
            return Err(Status::InvalidArg);
        }
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.env.as_deref_mut())
            .ok_or(Status::InvalidArg)
    }

    /// Live Envs in creation order
    pub fn env_ids(&self) -> Vec<EnvId> {
        self.order
            .iter()
            .filter_map(|index| {
                let slot = self.slots.get(*index as usize)?;
                slot.env.as_ref().map(|env| env.id())
            })
            .collect()
    }

    /// Destroy an Env, running every pending finalizer
    ///
    /// Fails with `HandleScopeMismatch` while a handle scope or Env scope of
    /// the Env is open.
    pub fn destroy_env(&mut self, id: EnvId) -> JsvmResult<()> {
        let env = self.env(id)?;
        let env_scope_open = self
            .scopes
            .iter()
            .any(|s| matches!(s, OpenScope::Env(open, _) if *open == id));
        if env.open_scope_count() > 0 || env_scope_open {
            tracing::warn!(env = env.key, "env destroyed with open scopes");
            return Err(Status::HandleScopeMismatch);
        }
        if let Some(mut env) = self.take_env(id) {
            env.teardown();
        }
        Ok(())
    }

    // ==================== Scopes ====================

    fn next_serial(&mut self) -> u32 {
        let serial = self.next_scope_serial;
        self.next_scope_serial = self.next_scope_serial.wrapping_add(1).max(1);
        serial
    }

    fn close_scope(&mut self, scope: OpenScope) -> JsvmResult<()> {
        if self.scopes.last() != Some(&scope) {
            tracing::warn!(vm = self.shared.id, ?scope, "scope closed out of order");
            return Err(Status::HandleScopeMismatch);
        }
        self.scopes.pop();
        Ok(())
    }

    /// Enter this VM on the calling thread
    pub fn open_vm_scope(&mut self) -> JsvmResult<VmScope> {
        self.check_open()?;
        let serial = self.next_serial();
        self.scopes.push(OpenScope::Vm(serial));
        Ok(VmScope {
            vm: self.shared.id,
            serial,
        })
    }

    /// Leave the innermost VM scope
    pub fn close_vm_scope(&mut self, scope: VmScope) -> JsvmResult<()> {
        self.check_open()?;
        if scope.vm != self.shared.id {
            return Err(Status::InvalidArg);
        }
        self.close_scope(OpenScope::Vm(scope.serial))
    }

    /// Make `env` the current Env on the calling thread
    pub fn open_env_scope(&mut self, env: EnvId) -> JsvmResult<EnvScope> {
        self.env(env)?;
        let serial = self.next_serial();
        self.scopes.push(OpenScope::Env(env, serial));
        Ok(EnvScope { env, serial })
    }

    /// Leave the innermost Env scope
    pub fn close_env_scope(&mut self, scope: EnvScope) -> JsvmResult<()> {
        self.check_open()?;
        self.close_scope(OpenScope::Env(scope.env, scope.serial))
    }

    /// Number of open VM and Env scopes
    pub fn open_scope_count(&self) -> usize {
        self.scopes.len()
    }

    // ==================== Microtasks and tasks ====================

    /// Choose when microtasks scheduled from now on run
    pub fn set_microtask_policy(&mut self, policy: MicrotaskPolicy) -> JsvmResult<()> {
        self.check_open()?;
        self.shared.policy.store(policy.to_u8(), Ordering::Release);
        Ok(())
    }

    /// Current microtask policy
    pub fn microtask_policy(&self) -> MicrotaskPolicy {
        self.shared.microtask_policy()
    }

    /// Number of queued microtasks across every Env
    pub fn pending_microtask_count(&self) -> usize {
        self.shared.microtasks.lock().len()
    }

    /// Run every queued microtask, Env by Env in creation order
    ///
    /// An Env with a pending exception keeps its microtasks queued. The
    /// first failure is returned after every Env had its turn.
    pub fn perform_microtask_checkpoint(&mut self) -> JsvmResult<()> {
        self.check_open()?;
        let mut first = None;
        for id in self.env_ids() {
            let env = self.env_mut(id)?;
            let result = if env.shared.is_terminated() {
                Err(Status::CannotRunJs)
            } else if env.exception.is_pending() {
                Err(Status::PendingException)
            } else {
                env.drain_microtasks(false)
            };
            if let Err(status) = env.finish(result) {
                first.get_or_insert(status);
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Run one queued task; `false` when the queue was empty
    pub fn pump_message_loop(&mut self) -> JsvmResult<bool> {
        self.check_open()?;
        loop {
            let next = self.shared.tasks.lock().pop_front();
            let Some(task) = next else {
                return Ok(false);
            };
            let Ok(env) = self.env_mut(task.env) else {
                continue;
            };
            env.run_task(task.run)?;
            return Ok(true);
        }
    }

    /// Number of queued tasks
    pub fn pending_task_count(&self) -> usize {
        self.shared.tasks.lock().len()
    }

    // ==================== Snapshots ====================

    /// Serialize the global state of `envs`
    pub fn create_snapshot(&self, envs: &[EnvId]) -> JsvmResult<Vec<u8>> {
        self.check_open()?;
        let mut contexts = Vec::with_capacity(envs.len());
        for id in envs {
            contexts.push(self.env(*id)?.capture_context()?);
        }
        let bytes = SnapshotBlob { contexts }.to_bytes()?;
        tracing::debug!(vm = self.shared.id, contexts = envs.len(), bytes = bytes.len(), "snapshot created");
        Ok(bytes)
    }

    // ==================== Handlers ====================

    /// Called with location, detail and whether the heap was exhausted
    pub fn set_handler_for_oom_error<F>(&mut self, handler: F) -> JsvmResult<()>
    where
        F: Fn(&str, &str, bool) + Send + Sync + 'static,
    {
        self.check_open()?;
        self.shared.handlers.write().oom = Some(Arc::new(handler));
        Ok(())
    }

    /// Called with location and message before an unrecoverable failure
    pub fn set_handler_for_fatal_error<F>(&mut self, handler: F) -> JsvmResult<()>
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.check_open()?;
        self.shared.handlers.write().fatal = Some(Arc::new(handler));
        Ok(())
    }

    /// Observe rejections without a handler and handlers added late
    pub fn set_handler_for_promise_reject<F>(&mut self, handler: F) -> JsvmResult<()>
    where
        F: Fn(&mut Env, &PromiseRejectMessage) + Send + Sync + 'static,
    {
        self.check_open()?;
        self.shared.handlers.write().promise_reject = Some(Arc::new(handler));
        Ok(())
    }

    // ==================== Teardown ====================

    fn teardown_envs(&mut self) {
        for index in std::mem::take(&mut self.order) {
            if let Some(mut env) = self
                .slots
                .get_mut(index as usize)
                .and_then(|slot| slot.env.take())
            {
                env.teardown();
            }
        }
        self.slots.clear();
        self.free.clear();
    }

    /// Destroy every Env and close the VM
    ///
    /// Fails with `HandleScopeMismatch`, changing nothing, while any scope is
    /// open. Afterwards every operation on the VM returns `Closing`.
    pub fn destroy(&mut self) -> JsvmResult<()> {
        self.check_open()?;
        let env_scopes = self
            .order
            .iter()
            .filter_map(|index| self.slots.get(*index as usize)?.env.as_ref())
            .any(|env| env.open_scope_count() > 0);
        if env_scopes || !self.scopes.is_empty() {
            tracing::warn!(vm = self.shared.id, "vm destroyed with open scopes");
            return Err(Status::HandleScopeMismatch);
        }
        self.teardown_envs();
        self.closing = true;
        tracing::debug!(vm = self.shared.id, "vm destroyed");
        Ok(())
    }
}

impl Drop for Vm {
    fn drop(&mut self) {
        if !self.closing {
            self.teardown_envs();
            self.closing = true;
        }
    }
}
