//! Re-entrant VM lock for multi-threaded hosts
//!
//! A [`Vm`] is `Send` but must only be driven by one thread at a time.
//! [`SharedVm`] adds the acquire/release protocol on top: a thread takes the
//! lock any number of times and other threads block until it has released
//! it as often.

use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

use crate::status::{JsvmResult, Status};
use crate::vm::Vm;

#[derive(Debug, Default)]
struct LockState {
    owner: Option<ThreadId>,
    count: u32,
}

/// A VM shared between threads
pub struct SharedVm {
    state: Mutex<LockState>,
    released: Condvar,
    vm: Mutex<Vm>,
}

impl std::fmt::Debug for SharedVm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SharedVm")
            .field("owner", &state.owner)
            .field("count", &state.count)
            .finish()
    }
}

/// Releases one level of the lock when dropped
struct Held<'a>(&'a SharedVm);

impl Drop for Held<'_> {
    fn drop(&mut self) {
        if let Err(status) = self.0.release_lock() {
            tracing::error!(?status, "vm lock released by a non-owner");
        }
    }
}

impl SharedVm {
    /// Share `vm`; no thread holds the lock yet
    pub fn new(vm: Vm) -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            released: Condvar::new(),
            vm: Mutex::new(vm),
        }
    }

    /// Block until the calling thread holds the lock
    pub fn acquire_lock(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        while state.owner.is_some_and(|owner| owner != me) {
            self.released.wait(&mut state);
        }
        state.owner = Some(me);
        state.count += 1;
    }

    /// Release one level of the lock; only the holding thread may release
    pub fn release_lock(&self) -> JsvmResult<()> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner != Some(me) || state.count == 0 {
            return Err(Status::GenericFailure);
        }
        state.count -= 1;
        if state.count == 0 {
            state.owner = None;
            self.released.notify_one();
        }
        Ok(())
    }

    /// Whether the calling thread holds the lock
    pub fn is_locked(&self) -> bool {
        self.state.lock().owner == Some(thread::current().id())
    }

    /// Run `f` with the VM while holding the lock
    ///
    /// A nested `with` on the same thread would need a second mutable
    /// borrow of the VM and is refused with `WouldDeadlock`.
    pub fn with<R>(&self, f: impl FnOnce(&mut Vm) -> R) -> JsvmResult<R> {
        self.acquire_lock();
        let _held = Held(self);
        let Some(mut vm) = self.vm.try_lock() else {
            tracing::warn!("nested SharedVm::with refused");
            return Err(Status::WouldDeadlock);
        };
        Ok(f(&mut vm))
    }

    /// Take the VM back
    pub fn into_inner(self) -> Vm {
        self.vm.into_inner()
    }
}
