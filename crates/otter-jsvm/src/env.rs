//! Execution environments
//!
//! An [`Env`] is an isolated global context inside a [`Vm`](crate::Vm). It
//! owns its heap, handle arena, reference table, pending exception and
//! compiled scripts. Every host operation goes through one of two entry
//! points:
//!
//! - `op` for operations that never run script
//! - `script_op` for operations that may run script; these refuse to start
//!   while an exception is pending or the VM is terminated, and drain
//!   automatic microtasks when the outermost one returns
//!
//! Both convert script throws into the pending-exception slot and record the
//! last error. Garbage collection only happens at safepoints between host
//! operations, never while script or a native callback is on the stack.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use indexmap::IndexMap;
use otter_jsvm_gc::{GcConfig, GcHeap, HeapId};

use crate::builtins;
use crate::callback::{Finalizer, NativeData};
use crate::exception::{Abrupt, Completion, ExceptionState};
use crate::handle_scope::{EscapableHandleScope, HandleArena, HandleScope};
use crate::object::{HeapCell, JsObject, ObjectKind, PropertyKey};
use crate::promise::DeferredTable;
use crate::reference::ReferenceTable;
use crate::script::ScriptTable;
use crate::status::{JsvmResult, Status};
use crate::value::{JsValue, Value};
use crate::vm::VmShared;

/// Identifies an Env inside its VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvId {
    pub(crate) vm: u32,
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

static NEXT_ENV_KEY: AtomicU32 = AtomicU32::new(1);

/// Heap usage of one Env
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStatistics {
    /// Bytes held by live heap cells
    pub used_heap_size: usize,
    /// Hard limit; exceeding it is an out-of-memory condition
    pub heap_size_limit: usize,
    /// Host-reported external memory
    pub external_memory: i64,
    /// Live heap cells
    pub live_objects: usize,
    /// Completed collections
    pub collection_count: usize,
}

/// Objects every Env starts with
pub(crate) struct Intrinsics {
    pub object_prototype: HeapId,
    pub function_prototype: HeapId,
    pub array_prototype: HeapId,
    pub string_prototype: HeapId,
    pub number_prototype: HeapId,
    pub boolean_prototype: HeapId,
    pub symbol_prototype: HeapId,
    pub promise_prototype: HeapId,
    pub bigint_prototype: HeapId,
    pub date_prototype: HeapId,
    pub array_buffer_prototype: HeapId,
    pub typed_array_prototype: HeapId,
    pub data_view_prototype: HeapId,
    pub error_prototypes: [HeapId; 5],
    pub error_constructors: [HeapId; 5],
}

impl Intrinsics {
    /// Intrinsics by stable name, as recorded in snapshots
    pub(crate) fn named(&self) -> Vec<(String, HeapId)> {
        let mut named = vec![
            ("Object.prototype".to_string(), self.object_prototype),
            ("Function.prototype".to_string(), self.function_prototype),
            ("Array.prototype".to_string(), self.array_prototype),
            ("String.prototype".to_string(), self.string_prototype),
            ("Number.prototype".to_string(), self.number_prototype),
            ("Boolean.prototype".to_string(), self.boolean_prototype),
            ("Symbol.prototype".to_string(), self.symbol_prototype),
            ("Promise.prototype".to_string(), self.promise_prototype),
            ("BigInt.prototype".to_string(), self.bigint_prototype),
            ("Date.prototype".to_string(), self.date_prototype),
            ("ArrayBuffer.prototype".to_string(), self.array_buffer_prototype),
            ("TypedArray.prototype".to_string(), self.typed_array_prototype),
            ("DataView.prototype".to_string(), self.data_view_prototype),
        ];
        for kind in crate::exception::ErrorKind::ALL {
            named.push((
                format!("{}.prototype", kind.name()),
                self.error_prototypes[kind.index()],
            ));
            named.push((kind.name().to_string(), self.error_constructors[kind.index()]));
        }
        named
    }

    fn ids(&self) -> impl Iterator<Item = HeapId> + '_ {
        [
            self.object_prototype,
            self.function_prototype,
            self.array_prototype,
            self.string_prototype,
            self.number_prototype,
            self.boolean_prototype,
            self.symbol_prototype,
            self.promise_prototype,
            self.bigint_prototype,
            self.date_prototype,
            self.array_buffer_prototype,
            self.typed_array_prototype,
            self.data_view_prototype,
        ]
        .into_iter()
        .chain(self.error_prototypes)
        .chain(self.error_constructors)
    }
}

/// An isolated global execution context
pub struct Env {
    pub(crate) id: EnvId,
    pub(crate) key: u32,
    pub(crate) shared: Arc<VmShared>,
    pub(crate) heap: GcHeap<HeapCell>,
    pub(crate) handles: HandleArena,
    pub(crate) references: ReferenceTable,
    pub(crate) exception: ExceptionState,
    pub(crate) scripts: ScriptTable,
    pub(crate) deferreds: DeferredTable,
    pub(crate) intrinsics: Intrinsics,
    pub(crate) global: HeapId,
    pub(crate) builtin_globals: Vec<PropertyKey>,
    pub(crate) symbol_registry: IndexMap<Arc<str>, HeapId>,
    pub(crate) finalization_queue: VecDeque<(NativeData, Finalizer)>,
    pub(crate) instance_data: Option<(NativeData, Option<Finalizer>)>,
    pub(crate) external_memory: i64,
    pub(crate) call_depth: u32,
    pub(crate) js_depth: u32,
    pub(crate) resources: Vec<Arc<str>>,
    pub(crate) gc_requested: bool,
    pub(crate) finalizing: bool,
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Env")
            .field("id", &self.id)
            .field("live_objects", &self.heap.len())
            .field("scope_depth", &self.handles.depth())
            .field("references", &self.references.len())
            .field("exception_pending", &self.exception.is_pending())
            .finish()
    }
}

impl Env {
    pub(crate) fn new(id: EnvId, shared: Arc<VmShared>) -> Self {
        let limits = shared.limits;
        let mut heap = GcHeap::with_config(GcConfig {
            initial_trigger: limits.initial_trigger,
            max_trigger: limits.max_trigger,
            initial_slots: limits.initial_slots,
        });
        let (intrinsics, global) = builtins::create_intrinsics(&mut heap);
        let key = NEXT_ENV_KEY.fetch_add(1, Ordering::Relaxed);

        let mut env = Self {
            id,
            key,
            shared,
            heap,
            handles: HandleArena::new(key),
            references: ReferenceTable::new(key),
            exception: ExceptionState::default(),
            scripts: ScriptTable::new(key),
            deferreds: DeferredTable::new(key),
            intrinsics,
            global,
            builtin_globals: Vec::new(),
            symbol_registry: IndexMap::new(),
            finalization_queue: VecDeque::new(),
            instance_data: None,
            external_memory: 0,
            call_depth: 0,
            js_depth: 0,
            resources: Vec::new(),
            gc_requested: false,
            finalizing: false,
        };
        if let Err(abrupt) = builtins::install_globals(&mut env) {
            tracing::error!(env = key, ?abrupt, "failed to install globals");
        }
        env.builtin_globals = env
            .object(global)
            .map(JsObject::own_keys)
            .unwrap_or_default();

        tracing::debug!(env = key, vm = env.shared.id, "env created");
        env
    }

    /// Identifier of this Env inside its VM
    pub fn id(&self) -> EnvId {
        self.id
    }

    // ==================== Boundary ====================

    /// Run a host operation that never enters script
    pub(crate) fn op<T>(&mut self, f: impl FnOnce(&mut Self) -> Completion<T>) -> JsvmResult<T> {
        let result = f(self);
        let result = self.settle(result);
        self.finish(result)
    }

    /// Run a host operation that may enter script
    pub(crate) fn script_op<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Completion<T>,
    ) -> JsvmResult<T> {
        let result = if self.shared.is_terminated() {
            Err(Abrupt::Status(Status::CannotRunJs))
        } else if self.exception.is_pending() {
            Err(Abrupt::Status(Status::PendingException))
        } else {
            self.js_depth += 1;
            let result = f(self);
            self.js_depth -= 1;
            result
        };

        let mut result = self.settle(result);
        if self.js_depth == 0 && result.is_ok() && !self.exception.is_pending() {
            if let Err(status) = self.drain_microtasks(true) {
                result = Err(status);
            }
        }
        self.finish(result)
    }

    fn settle<T>(&mut self, result: Completion<T>) -> JsvmResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(Abrupt::Throw(value)) => {
                self.exception.throw(value);
                Err(Status::PendingException)
            }
            Err(Abrupt::Status(status)) => Err(status),
        }
    }

    pub(crate) fn finish<T>(&mut self, result: JsvmResult<T>) -> JsvmResult<T> {
        if let Err(status) = &result {
            self.exception.record(*status);
        }
        self.safepoint();
        result
    }

    /// Convert the outcome of host code run by the engine
    ///
    /// A pending exception always wins; an error status without one is
    /// raised in script as an `Error` carrying the status message.
    pub(crate) fn host_outcome<T>(&mut self, result: JsvmResult<T>) -> Completion<T> {
        if let Some(exception) = self.exception.take() {
            return Err(Abrupt::Throw(exception));
        }
        match result {
            Ok(value) => Ok(value),
            Err(Status::CannotRunJs) => Err(Abrupt::Status(Status::CannotRunJs)),
            Err(_) if self.shared.is_terminated() => Err(Abrupt::Status(Status::CannotRunJs)),
            Err(status) => Err(self.error_abrupt(
                crate::exception::ErrorKind::Error,
                &status.to_string(),
            )),
        }
    }

    // ==================== Values ====================

    /// The value behind a handle
    pub(crate) fn get(&self, value: Value) -> JsvmResult<JsValue> {
        self.handles.get(value).cloned()
    }

    /// Allocate a handle in the innermost scope
    pub(crate) fn push(&mut self, value: JsValue) -> Value {
        self.handles.push(value)
    }

    pub(crate) fn object(&self, id: HeapId) -> Option<&JsObject> {
        self.heap.get(id).and_then(HeapCell::as_object)
    }

    pub(crate) fn object_mut(&mut self, id: HeapId) -> Option<&mut JsObject> {
        self.heap.get_mut(id).and_then(HeapCell::as_object_mut)
    }

    /// The object behind a handle, or `ObjectExpected`
    pub(crate) fn object_arg(&self, value: Value) -> JsvmResult<HeapId> {
        match self.get(value)? {
            JsValue::Object(id) if self.object(id).is_some() => Ok(id),
            _ => Err(Status::ObjectExpected),
        }
    }

    pub(crate) fn alloc(&mut self, cell: HeapCell) -> Completion<HeapId> {
        let id = self.heap.alloc(cell);
        let used = self.heap.total_bytes() as i64 + self.external_memory.max(0);
        if used as usize > self.shared.limits.hard_limit {
            self.shared.out_of_memory(
                "Env::alloc",
                &format!("heap limit of {} bytes reached", self.shared.limits.hard_limit),
                true,
            );
            return Err(Abrupt::Status(Status::CannotRunJs));
        }
        Ok(id)
    }

    pub(crate) fn alloc_object(
        &mut self,
        kind: ObjectKind,
        prototype: Option<HeapId>,
    ) -> Completion<HeapId> {
        self.alloc(HeapCell::Object(JsObject::new(kind, prototype)))
    }

    /// Resource name of the innermost running script
    pub(crate) fn current_resource(&self) -> Arc<str> {
        self.resources
            .last()
            .cloned()
            .unwrap_or_else(|| Arc::from("<anonymous>"))
    }

    // ==================== Handle scopes ====================

    /// Open a handle scope
    pub fn open_handle_scope(&mut self) -> JsvmResult<HandleScope> {
        Ok(self.handles.open())
    }

    /// Close the innermost handle scope
    ///
    /// Fails with `HandleScopeMismatch`, leaving every scope open, when
    /// `scope` is not the innermost one.
    pub fn close_handle_scope(&mut self, scope: HandleScope) -> JsvmResult<()> {
        self.op(|env| {
            let serial = env
                .handles
                .close(scope.arena, scope.depth, scope.serial, false)
                .inspect_err(|status| {
                    tracing::warn!(env = env.key, ?status, "handle scope closed out of order");
                })?;
            env.scripts.release_frames(&[serial]);
            Ok(())
        })
    }

    /// Open a handle scope that may promote one handle to its parent
    pub fn open_escapable_handle_scope(&mut self) -> JsvmResult<EscapableHandleScope> {
        Ok(self.handles.open_escapable())
    }

    /// Close the innermost escapable handle scope
    pub fn close_escapable_handle_scope(&mut self, scope: EscapableHandleScope) -> JsvmResult<()> {
        self.op(|env| {
            let serial = env
                .handles
                .close(scope.arena, scope.depth, scope.serial, true)
                .inspect_err(|status| {
                    tracing::warn!(env = env.key, ?status, "handle scope closed out of order");
                })?;
            env.scripts.release_frames(&[serial]);
            Ok(())
        })
    }

    /// Promote `value` into the parent of `scope`; allowed once per scope
    pub fn escape_handle(
        &mut self,
        scope: EscapableHandleScope,
        value: Value,
    ) -> JsvmResult<Value> {
        self.op(|env| Ok(env.handles.escape(scope, value)?))
    }

    /// Number of open handle scopes
    pub fn open_scope_count(&self) -> usize {
        self.handles.depth()
    }

    pub(crate) fn unwind_handles(&mut self, depth: usize) {
        let closed = self.handles.unwind_to(depth);
        if !closed.is_empty() {
            self.scripts.release_frames(&closed);
        }
    }

    // ==================== Instance data ====================

    /// Associate native data with this Env
    ///
    /// A previous association is replaced; its finalizer is not run.
    pub fn set_instance_data(
        &mut self,
        data: NativeData,
        finalizer: Option<Finalizer>,
    ) -> JsvmResult<()> {
        if self.instance_data.is_some() {
            tracing::debug!(env = self.key, "instance data superseded without finalization");
        }
        self.instance_data = Some((data, finalizer));
        Ok(())
    }

    /// Native data set by [`set_instance_data`](Self::set_instance_data)
    pub fn get_instance_data(&self) -> Option<&(dyn Any + Send)> {
        self.instance_data.as_ref().map(|(data, _)| data.as_ref())
    }

    /// Instance data downcast to `T`
    pub fn get_instance_data_as<T: Any + Send>(&self) -> Option<&T> {
        self.instance_data
            .as_ref()
            .and_then(|(data, _)| data.downcast_ref::<T>())
    }

    // ==================== Memory ====================

    /// Report native memory kept alive by script objects; returns the new total
    pub fn adjust_external_memory(&mut self, change: i64) -> JsvmResult<i64> {
        self.external_memory = self.external_memory.saturating_add(change);
        Ok(self.external_memory)
    }

    /// Request a full collection
    ///
    /// Runs immediately when called from the host; from inside script or a
    /// native callback it runs at the next safepoint.
    pub fn collect_garbage(&mut self) -> JsvmResult<()> {
        if self.js_depth > 0 || self.finalizing {
            self.gc_requested = true;
            return Ok(());
        }
        self.collect();
        self.run_finalizers();
        Ok(())
    }

    /// Heap usage of this Env
    pub fn heap_statistics(&self) -> HeapStatistics {
        let stats = self.heap.stats();
        HeapStatistics {
            used_heap_size: stats.total_bytes,
            heap_size_limit: self.shared.limits.hard_limit,
            external_memory: self.external_memory,
            live_objects: stats.live_objects,
            collection_count: stats.collection_count,
        }
    }

    pub(crate) fn safepoint(&mut self) {
        if self.js_depth > 0 || self.finalizing {
            return;
        }
        if self.gc_requested || self.heap.should_collect() {
            self.collect();
        }
        self.run_finalizers();
    }

    fn gc_roots(&self) -> Vec<HeapId> {
        let mut roots: Vec<HeapId> = Vec::new();
        roots.push(self.global);
        roots.extend(self.intrinsics.ids());
        roots.extend(self.handles.roots());
        roots.extend(self.references.roots());
        roots.extend(self.deferreds.roots());
        roots.extend(self.symbol_registry.values().copied());
        roots.extend(self.exception.pending().and_then(JsValue::heap_id));
        roots.extend(self.shared.microtasks.lock().roots_for(self.id));
        roots
    }

    pub(crate) fn collect(&mut self) {
        self.gc_requested = false;
        let roots = self.gc_roots();
        let dead = self.heap.collect(roots);
        let freed = dead.len();
        for (_, cell) in dead {
            self.queue_finalizers(cell);
        }
        tracing::debug!(
            env = self.key,
            freed,
            live = self.heap.len(),
            bytes = self.heap.total_bytes(),
            "gc cycle"
        );
    }

    fn queue_finalizers(&mut self, cell: HeapCell) {
        let HeapCell::Object(object) = cell else {
            return;
        };
        if let ObjectKind::ArrayBuffer(buffer) = object.kind
            && let (Some(bytes), Some(finalizer)) = (buffer.bytes, buffer.finalizer)
        {
            self.finalization_queue.push_back((Box::new(bytes), finalizer));
        }
        let Some(native) = object.native else {
            return;
        };
        let native = *native;
        if let Some((data, Some(finalizer))) = native.wrap {
            self.finalization_queue.push_back((data, finalizer));
        }
        if let Some((data, Some(finalizer))) = native.external {
            self.finalization_queue.push_back((data, finalizer));
        }
        self.finalization_queue.extend(native.finalizers);
    }

    /// Run queued finalizers in FIFO order, each in its own engine frame
    pub(crate) fn run_finalizers(&mut self) {
        if self.finalizing || self.finalization_queue.is_empty() {
            return;
        }
        self.finalizing = true;
        self.js_depth += 1;
        let mut ran = 0usize;
        while let Some((data, finalizer)) = self.finalization_queue.pop_front() {
            let depth = self.handles.enter_engine_frame();
            finalizer(self, data);
            self.unwind_handles(depth);
            ran += 1;
        }
        self.js_depth -= 1;
        self.finalizing = false;
        tracing::trace!(env = self.key, ran, "finalizers run");
    }

    /// Release everything this Env owns, running every pending finalizer
    pub(crate) fn teardown(&mut self) {
        self.shared.forget_env(self.id);
        self.references.clear();
        self.deferreds.clear();
        self.symbol_registry.clear();

        for (_, cell) in self.heap.drain() {
            self.queue_finalizers(cell);
        }
        self.run_finalizers();

        if let Some((data, Some(finalizer))) = self.instance_data.take() {
            let depth = self.handles.enter_engine_frame();
            finalizer(self, data);
            self.unwind_handles(depth);
        }
        // Finalizers may have allocated; nothing survives the Env
        self.heap.drain();
        self.finalization_queue.clear();
        self.handles.clear();
        self.scripts.clear();
        tracing::debug!(env = self.key, vm = self.shared.id, "env destroyed");
    }
}
