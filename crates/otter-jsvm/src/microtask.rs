//! Microtask and macrotask queues
//!
//! Both queues live on the VM and are shared by its Envs. Every entry is
//! tagged with the Env that scheduled it; microtasks additionally remember
//! whether the policy was `Auto` when they were scheduled, so a policy change
//! only affects work scheduled afterwards.

use std::collections::VecDeque;

use otter_jsvm_gc::HeapId;

use crate::callback::NativeTask;
use crate::env::{Env, EnvId};
use crate::exception::{Abrupt, Completion};
use crate::status::{JsvmResult, Status};
use crate::value::JsValue;

/// When queued microtasks run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MicrotaskPolicy {
    /// Drained when the outermost host-to-script call on the Env returns
    #[default]
    Auto,
    /// Drained only by `Vm::perform_microtask_checkpoint`
    Explicit,
}

impl MicrotaskPolicy {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Self::Auto => 0,
            Self::Explicit => 1,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Auto,
            _ => Self::Explicit,
        }
    }
}

/// Queued work
pub(crate) enum Job {
    /// Host closure
    Native(NativeTask),
    /// Script function queued with `queueMicrotask`
    Call { function: JsValue, args: Vec<JsValue> },
    /// Promise reaction
    Reaction {
        handler: Option<HeapId>,
        derived: Option<HeapId>,
        argument: JsValue,
        rejected: bool,
    },
}

impl Job {
    fn trace(&self, roots: &mut Vec<HeapId>) {
        match self {
            Self::Native(_) => {}
            Self::Call { function, args } => {
                roots.extend(function.heap_id());
                roots.extend(args.iter().filter_map(JsValue::heap_id));
            }
            Self::Reaction {
                handler,
                derived,
                argument,
                ..
            } => {
                roots.extend(*handler);
                roots.extend(*derived);
                roots.extend(argument.heap_id());
            }
        }
    }
}

pub(crate) struct Microtask {
    env: EnvId,
    auto: bool,
    job: Job,
}

/// VM-wide FIFO of microtasks
#[derive(Default)]
pub(crate) struct MicrotaskQueue {
    queue: VecDeque<Microtask>,
}

impl MicrotaskQueue {
    fn push(&mut self, task: Microtask) {
        self.queue.push_back(task);
    }

    /// Remove the oldest entry for `env`
    fn pop_for(&mut self, env: EnvId, auto_only: bool) -> Option<Job> {
        let position = self
            .queue
            .iter()
            .position(|t| t.env == env && (t.auto || !auto_only))?;
        self.queue.remove(position).map(|t| t.job)
    }

    /// Heap ids kept alive by `env`'s queued work
    pub(crate) fn roots_for(&self, env: EnvId) -> Vec<HeapId> {
        let mut roots = Vec::new();
        for task in self.queue.iter().filter(|t| t.env == env) {
            task.job.trace(&mut roots);
        }
        roots
    }

    /// Drop everything `env` scheduled
    pub(crate) fn remove_env(&mut self, env: EnvId) {
        self.queue.retain(|t| t.env != env);
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    fn count_for(&self, env: EnvId) -> usize {
        self.queue.iter().filter(|t| t.env == env).count()
    }
}

/// A macrotask waiting for `Vm::pump_message_loop`
pub(crate) struct Task {
    pub env: EnvId,
    pub run: NativeTask,
}

impl Env {
    /// Queue a host microtask
    pub fn enqueue_microtask(&mut self, task: NativeTask) -> JsvmResult<()> {
        self.schedule(Job::Native(task));
        Ok(())
    }

    /// Queue a macrotask; fails with `QueueFull` at the VM's bound
    pub fn post_task(&mut self, task: NativeTask) -> JsvmResult<()> {
        let mut tasks = self.shared.tasks.lock();
        if tasks.len() >= self.shared.max_pending_tasks {
            tracing::warn!(env = self.key, pending = tasks.len(), "task queue full");
            return Err(Status::QueueFull);
        }
        tasks.push_back(Task {
            env: self.id,
            run: task,
        });
        Ok(())
    }

    pub(crate) fn schedule(&mut self, job: Job) {
        let auto = self.shared.microtask_policy() == MicrotaskPolicy::Auto;
        self.shared.microtasks.lock().push(Microtask {
            env: self.id,
            auto,
            job,
        });
    }

    /// Run host code inside an engine frame, converting its outcome
    fn run_native(&mut self, task: NativeTask) -> Completion<()> {
        let depth = self.handles.enter_engine_frame();
        let result = task(self);
        let outcome = self.host_outcome(result);
        self.unwind_handles(depth);
        outcome
    }

    fn run_job(&mut self, job: Job) -> Completion<()> {
        match job {
            Job::Native(task) => self.run_native(task),
            Job::Call { function, args } => {
                self.call(&function, JsValue::Undefined, &args)?;
                Ok(())
            }
            Job::Reaction {
                handler,
                derived,
                argument,
                rejected,
            } => {
                let outcome = match handler {
                    Some(handler) => {
                        match self.call(&JsValue::Object(handler), JsValue::Undefined, &[argument]) {
                            Ok(value) => Ok(value),
                            Err(Abrupt::Throw(reason)) => Err(reason),
                            Err(status) => return Err(status),
                        }
                    }
                    None if rejected => Err(argument),
                    None => Ok(argument),
                };
                let Some(derived) = derived else {
                    return Ok(());
                };
                match outcome {
                    Ok(value) => self.resolve_promise(derived, value),
                    Err(reason) => self.reject_promise(derived, reason),
                }
            }
        }
    }

    /// Run this Env's queued microtasks, including ones they schedule
    ///
    /// Stops at the first microtask that throws: its exception becomes the
    /// pending exception and the rest stay queued for the next drain.
    pub(crate) fn drain_microtasks(&mut self, auto_only: bool) -> JsvmResult<()> {
        let mut failure = None;
        let mut ran = 0usize;
        self.js_depth += 1;
        while failure.is_none() {
            let next = self.shared.microtasks.lock().pop_for(self.id, auto_only);
            let Some(job) = next else {
                break;
            };
            ran += 1;
            failure = match self.run_job(job) {
                Ok(()) => None,
                Err(Abrupt::Throw(value)) => {
                    self.exception.throw(value);
                    Some(Status::PendingException)
                }
                Err(Abrupt::Status(status)) => Some(status),
            };
        }
        if failure.is_some() {
            let left = self.shared.microtasks.lock().count_for(self.id);
            if left > 0 {
                tracing::debug!(env = self.key, left, "microtask drain stopped at a failure");
            }
        }
        self.js_depth -= 1;
        if ran > 0 {
            tracing::trace!(env = self.key, ran, "microtasks drained");
        }
        failure.map_or(Ok(()), Err)
    }

    /// Drain automatic microtasks when no script is on the stack
    pub(crate) fn auto_checkpoint(&mut self) -> JsvmResult<()> {
        if self.js_depth > 0 || self.exception.is_pending() || self.shared.is_terminated() {
            return Ok(());
        }
        let result = self.drain_microtasks(true);
        self.finish(result)
    }

    /// Run a macrotask popped by the message loop
    pub(crate) fn run_task(&mut self, task: NativeTask) -> JsvmResult<()> {
        self.script_op(|env| env.run_native(task))
    }
}
