//! Promises and deferreds
//!
//! Only the engine-side half of promises exists: the host creates them
//! through [`Env::create_promise`] and settles them through the returned
//! [`Deferred`]. Script sees them as objects with `then` and `catch`.

use otter_jsvm_gc::HeapId;

use crate::env::Env;
use crate::exception::{Abrupt, Completion};
use crate::microtask::Job;
use crate::object::ObjectKind;
use crate::status::{JsvmResult, Status};
use crate::value::{JsValue, Value};

/// Settlement state
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PromiseState {
    Pending,
    Fulfilled(JsValue),
    Rejected(JsValue),
}

/// A registered `then` reaction
#[derive(Debug, Clone, Copy)]
pub(crate) struct Reaction {
    /// Callable handler; `None` passes the settlement through
    pub handler: Option<HeapId>,
    /// Promise settled with the handler's outcome
    pub derived: Option<HeapId>,
}

/// Payload of promise objects
#[derive(Debug)]
pub(crate) struct PromiseData {
    pub state: PromiseState,
    pub fulfill_reactions: Vec<Reaction>,
    pub reject_reactions: Vec<Reaction>,
    pub handled: bool,
}

impl PromiseData {
    fn new() -> Self {
        Self {
            state: PromiseState::Pending,
            fulfill_reactions: Vec::new(),
            reject_reactions: Vec::new(),
            handled: false,
        }
    }

    pub(crate) fn trace(&self, tracer: &mut dyn FnMut(HeapId)) {
        if let PromiseState::Fulfilled(value) | PromiseState::Rejected(value) = &self.state {
            if let Some(id) = value.heap_id() {
                tracer(id);
            }
        }
        for reaction in self.fulfill_reactions.iter().chain(&self.reject_reactions) {
            reaction
                .handler
                .iter()
                .chain(reaction.derived.iter())
                .for_each(|id| tracer(*id));
        }
    }
}

/// Why the promise-reject handler was called
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromiseRejectEvent {
    /// A promise was rejected while nothing handled it
    RejectWithNoHandler,
    /// A handler was attached to an already rejected, unhandled promise
    HandlerAddedAfterReject,
}

/// Argument of the promise-reject handler
#[derive(Debug, Clone, Copy)]
pub struct PromiseRejectMessage {
    /// What happened
    pub event: PromiseRejectEvent,
    /// The promise concerned
    pub promise: Value,
    /// Rejection reason; `undefined` for `HandlerAddedAfterReject`
    pub reason: Value,
}

/// The resolving half of a promise; settles it exactly once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Deferred {
    pub(crate) table: u32,
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

#[derive(Debug, Default)]
struct DeferredSlot {
    generation: u32,
    promise: Option<HeapId>,
}

/// Unsettled deferreds; their promises stay alive until settled
#[derive(Debug)]
pub(crate) struct DeferredTable {
    key: u32,
    slots: Vec<DeferredSlot>,
    free: Vec<u32>,
}

impl DeferredTable {
    pub(crate) fn new(key: u32) -> Self {
        Self {
            key,
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    fn insert(&mut self, promise: HeapId) -> Deferred {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(DeferredSlot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.promise = Some(promise);
        Deferred {
            table: self.key,
            index,
            generation: slot.generation,
        }
    }

    /// Consume a deferred, returning its promise
    fn take(&mut self, deferred: Deferred) -> JsvmResult<HeapId> {
        if deferred.table != self.key {
            return Err(Status::InvalidArg);
        }
        let slot = self
            .slots
            .get_mut(deferred.index as usize)
            .filter(|s| s.generation == deferred.generation)
            .ok_or(Status::InvalidArg)?;
        let promise = slot.promise.take().ok_or(Status::InvalidArg)?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(deferred.index);
        Ok(promise)
    }

    pub(crate) fn roots(&self) -> impl Iterator<Item = HeapId> + '_ {
        self.slots.iter().filter_map(|s| s.promise)
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }
}

impl Env {
    // ==================== Engine side ====================

    pub(crate) fn is_promise_id(&self, id: HeapId) -> bool {
        self.object(id)
            .is_some_and(|o| matches!(o.kind, ObjectKind::Promise(_)))
    }

    fn promise_mut(&mut self, id: HeapId) -> Option<&mut PromiseData> {
        match self.object_mut(id).map(|o| &mut o.kind) {
            Some(ObjectKind::Promise(data)) => Some(data),
            _ => None,
        }
    }

    pub(crate) fn new_promise(&mut self) -> Completion<HeapId> {
        let prototype = Some(self.intrinsics.promise_prototype);
        self.alloc_object(ObjectKind::Promise(PromiseData::new()), prototype)
    }

    /// Resolve `promise` with `value`, adopting the state of promise values
    pub(crate) fn resolve_promise(&mut self, promise: HeapId, value: JsValue) -> Completion<()> {
        if value.as_object() == Some(promise) {
            let error = self.type_error("Chaining cycle detected for promise #<Promise>");
            return match error {
                Abrupt::Throw(reason) => self.reject_promise(promise, reason),
                status => Err(status),
            };
        }
        match value.as_object() {
            Some(source) if self.is_promise_id(source) => {
                self.perform_then_raw(source, None, None, Some(promise));
                Ok(())
            }
            _ => self.settle_promise(promise, PromiseState::Fulfilled(value)),
        }
    }

    pub(crate) fn reject_promise(&mut self, promise: HeapId, reason: JsValue) -> Completion<()> {
        self.settle_promise(promise, PromiseState::Rejected(reason))
    }

    fn settle_promise(&mut self, promise: HeapId, state: PromiseState) -> Completion<()> {
        let Some(data) = self.promise_mut(promise) else {
            return Err(Abrupt::Status(Status::InvalidArg));
        };
        if data.state != PromiseState::Pending {
            return Ok(());
        }
        let (rejected, argument) = match &state {
            PromiseState::Rejected(reason) => (true, reason.clone()),
            PromiseState::Fulfilled(value) => (false, value.clone()),
            PromiseState::Pending => return Ok(()),
        };
        data.state = state;
        let fulfill = std::mem::take(&mut data.fulfill_reactions);
        let reject = std::mem::take(&mut data.reject_reactions);
        let handled = data.handled;

        let reactions = if rejected { reject } else { fulfill };
        for reaction in reactions {
            self.schedule(Job::Reaction {
                handler: reaction.handler,
                derived: reaction.derived,
                argument: argument.clone(),
                rejected,
            });
        }
        if rejected && !handled {
            self.report_rejection(
                promise,
                PromiseRejectEvent::RejectWithNoHandler,
                argument,
            );
        }
        Ok(())
    }

    /// Register reactions; returns the derived promise
    pub(crate) fn perform_then(
        &mut self,
        promise: HeapId,
        on_fulfilled: JsValue,
        on_rejected: JsValue,
    ) -> Completion<HeapId> {
        let derived = self.new_promise()?;
        let handler = |env: &Env, f: &JsValue| f.as_object().filter(|_| env.is_callable(f));
        let on_fulfilled = handler(self, &on_fulfilled);
        let on_rejected = handler(self, &on_rejected);
        self.perform_then_raw(promise, on_fulfilled, on_rejected, Some(derived));
        Ok(derived)
    }

    fn perform_then_raw(
        &mut self,
        promise: HeapId,
        on_fulfilled: Option<HeapId>,
        on_rejected: Option<HeapId>,
        derived: Option<HeapId>,
    ) {
        let Some(data) = self.promise_mut(promise) else {
            return;
        };
        let was_handled = std::mem::replace(&mut data.handled, true);
        match data.state.clone() {
            PromiseState::Pending => {
                data.fulfill_reactions.push(Reaction {
                    handler: on_fulfilled,
                    derived,
                });
                data.reject_reactions.push(Reaction {
                    handler: on_rejected,
                    derived,
                });
            }
            PromiseState::Fulfilled(value) => self.schedule(Job::Reaction {
                handler: on_fulfilled,
                derived,
                argument: value,
                rejected: false,
            }),
            PromiseState::Rejected(reason) => {
                self.schedule(Job::Reaction {
                    handler: on_rejected,
                    derived,
                    argument: reason,
                    rejected: true,
                });
                if !was_handled {
                    self.report_rejection(
                        promise,
                        PromiseRejectEvent::HandlerAddedAfterReject,
                        JsValue::Undefined,
                    );
                }
            }
        }
    }

    fn report_rejection(&mut self, promise: HeapId, event: PromiseRejectEvent, reason: JsValue) {
        let Some(handler) = self.shared.promise_reject_handler() else {
            if event == PromiseRejectEvent::RejectWithNoHandler {
                tracing::trace!(env = self.key, "promise rejected with no handler");
            }
            return;
        };
        let depth = self.handles.enter_engine_frame();
        let message = PromiseRejectMessage {
            event,
            promise: self.push(JsValue::Object(promise)),
            reason: self.push(reason),
        };
        handler(self, &message);
        self.unwind_handles(depth);
    }

    // ==================== Host surface ====================

    /// Create a pending promise and the deferred that settles it
    pub fn create_promise(&mut self) -> JsvmResult<(Deferred, Value)> {
        self.op(|env| {
            let promise = env.new_promise()?;
            let deferred = env.deferreds.insert(promise);
            Ok((deferred, env.push(JsValue::Object(promise))))
        })
    }

    /// Resolve the promise of `deferred`; a deferred settles once
    pub fn resolve_deferred(&mut self, deferred: Deferred, value: Value) -> JsvmResult<()> {
        let value = self.get(value)?;
        let promise = self.deferreds.take(deferred)?;
        self.op(|env| env.resolve_promise(promise, value))?;
        self.auto_checkpoint()
    }

    /// Reject the promise of `deferred`; a deferred settles once
    pub fn reject_deferred(&mut self, deferred: Deferred, reason: Value) -> JsvmResult<()> {
        let reason = self.get(reason)?;
        let promise = self.deferreds.take(deferred)?;
        self.op(|env| env.reject_promise(promise, reason))?;
        self.auto_checkpoint()
    }

    /// Whether the value is a promise
    pub fn is_promise(&self, value: Value) -> JsvmResult<bool> {
        Ok(self
            .get(value)?
            .as_object()
            .is_some_and(|id| self.is_promise_id(id)))
    }

    /// `promise.then(on_fulfilled, on_rejected)`; returns the derived promise
    pub fn promise_then(
        &mut self,
        promise: Value,
        on_fulfilled: Option<Value>,
        on_rejected: Option<Value>,
    ) -> JsvmResult<Value> {
        let id = self.object_arg(promise)?;
        if !self.is_promise_id(id) {
            return Err(Status::InvalidArg);
        }
        let handler = |value: Option<Value>| -> JsvmResult<JsValue> {
            let Some(value) = value else {
                return Ok(JsValue::Undefined);
            };
            let value = self.get(value)?;
            if self.is_callable(&value) {
                Ok(value)
            } else {
                Err(Status::FunctionExpected)
            }
        };
        let on_fulfilled = handler(on_fulfilled)?;
        let on_rejected = handler(on_rejected)?;
        self.op(|env| {
            let derived = env.perform_then(id, on_fulfilled, on_rejected)?;
            Ok(env.push(JsValue::Object(derived)))
        })
    }
}
