//! Handle scopes
//!
//! Every value handed to the host lives in a slot of the Env's handle arena.
//! Slots are grouped in LIFO frames; closing a frame truncates the arena to
//! the frame start. Each frame carries a unique serial that is stamped into
//! the handles created inside it, so a handle outliving its frame is detected
//! even after its slot index has been reused.

use otter_jsvm_gc::HeapId;

use crate::status::{JsvmResult, Status};
use crate::value::{JsValue, Value};

/// An open handle scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleScope {
    pub(crate) arena: u32,
    pub(crate) depth: u32,
    pub(crate) serial: u32,
}

/// An open handle scope that may promote one handle to its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EscapableHandleScope {
    pub(crate) arena: u32,
    pub(crate) depth: u32,
    pub(crate) serial: u32,
}

#[derive(Debug)]
struct Slot {
    value: JsValue,
    serial: u32,
}

#[derive(Debug)]
struct EscapeSlot {
    index: usize,
    used: bool,
}

#[derive(Debug)]
struct Frame {
    start: usize,
    serial: u32,
    escape: Option<EscapeSlot>,
}

/// Per-Env stack of handle frames
///
/// Frame 0 is the base frame; it lives as long as the Env and is never
/// closed.
#[derive(Debug)]
pub(crate) struct HandleArena {
    key: u32,
    slots: Vec<Slot>,
    frames: Vec<Frame>,
    next_serial: u32,
}

impl HandleArena {
    pub(crate) fn new(key: u32) -> Self {
        Self {
            key,
            slots: Vec::new(),
            frames: vec![Frame {
                start: 0,
                serial: 0,
                escape: None,
            }],
            next_serial: 1,
        }
    }

    /// Number of frames above the base frame
    #[inline]
    pub(crate) fn depth(&self) -> usize {
        self.frames.len() - 1
    }

    /// Serial of the innermost frame
    #[inline]
    pub(crate) fn current_serial(&self) -> u32 {
        self.frames.last().map_or(0, |f| f.serial)
    }

    fn push_frame(&mut self, escape: Option<EscapeSlot>) -> (u32, u32) {
        let serial = self.next_serial;
        self.next_serial = self.next_serial.wrapping_add(1).max(1);
        self.frames.push(Frame {
            start: self.slots.len(),
            serial,
            escape,
        });
        (self.depth() as u32, serial)
    }

    pub(crate) fn open(&mut self) -> HandleScope {
        let (depth, serial) = self.push_frame(None);
        HandleScope {
            arena: self.key,
            depth,
            serial,
        }
    }

    /// Open an escapable frame; its escape slot is reserved in the parent
    /// frame up front
    pub(crate) fn open_escapable(&mut self) -> EscapableHandleScope {
        let reserved = self.push(JsValue::Undefined);
        let (depth, serial) = self.push_frame(Some(EscapeSlot {
            index: reserved.index as usize,
            used: false,
        }));
        EscapableHandleScope {
            arena: self.key,
            depth,
            serial,
        }
    }

    /// Close the innermost frame, returning its serial
    ///
    /// Nothing is modified unless the frame is the innermost one and of the
    /// requested kind.
    pub(crate) fn close(
        &mut self,
        arena: u32,
        depth: u32,
        serial: u32,
        escapable: bool,
    ) -> JsvmResult<u32> {
        if arena != self.key {
            return Err(Status::InvalidArg);
        }
        let top = self.depth();
        if depth == 0 || depth as usize != top {
            return Err(Status::HandleScopeMismatch);
        }
        let frame = &self.frames[top];
        if frame.serial != serial || frame.escape.is_some() != escapable {
            return Err(Status::HandleScopeMismatch);
        }

        let start = frame.start;
        self.frames.pop();
        self.slots.truncate(start);
        Ok(serial)
    }

    pub(crate) fn escape(
        &mut self,
        scope: EscapableHandleScope,
        value: Value,
    ) -> JsvmResult<Value> {
        if scope.arena != self.key {
            return Err(Status::InvalidArg);
        }
        let depth = scope.depth as usize;
        let open = depth > 0
            && self
                .frames
                .get(depth)
                .is_some_and(|f| f.serial == scope.serial);
        if !open {
            return Err(Status::HandleScopeMismatch);
        }

        let js = self.get(value)?.clone();
        let parent_serial = self.frames[depth - 1].serial;
        let Some(slot) = self.frames[depth].escape.as_mut() else {
            return Err(Status::InvalidArg);
        };
        if slot.used {
            return Err(Status::EscapeCalledTwice);
        }
        slot.used = true;
        let index = slot.index;

        self.slots[index] = Slot {
            value: js,
            serial: parent_serial,
        };
        Ok(Value {
            arena: self.key,
            index: index as u32,
            serial: parent_serial,
        })
    }

    /// Allocate a handle in the innermost frame
    pub(crate) fn push(&mut self, value: JsValue) -> Value {
        let serial = self.current_serial();
        let index = self.slots.len() as u32;
        self.slots.push(Slot { value, serial });
        Value {
            arena: self.key,
            index,
            serial,
        }
    }

    pub(crate) fn get(&self, value: Value) -> JsvmResult<&JsValue> {
        if value.arena != self.key {
            return Err(Status::InvalidArg);
        }
        match self.slots.get(value.index as usize) {
            Some(slot) if slot.serial == value.serial => Ok(&slot.value),
            _ => Err(Status::InvalidArg),
        }
    }

    /// Open a frame on behalf of the engine; returns the depth to unwind to
    pub(crate) fn enter_engine_frame(&mut self) -> usize {
        let depth = self.depth();
        self.push_frame(None);
        depth
    }

    /// Close every frame above `depth`, returning the closed serials
    pub(crate) fn unwind_to(&mut self, depth: usize) -> Vec<u32> {
        let mut closed = Vec::new();
        while self.depth() > depth {
            if let Some(frame) = self.frames.pop() {
                self.slots.truncate(frame.start);
                closed.push(frame.serial);
            }
        }
        closed
    }

    /// Release every handle, including the base frame's
    pub(crate) fn clear(&mut self) {
        self.frames.truncate(1);
        self.slots.clear();
    }

    pub(crate) fn roots(&self) -> impl Iterator<Item = HeapId> + '_ {
        self.slots.iter().filter_map(|s| s.value.heap_id())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_truncates_slots() {
        let mut arena = HandleArena::new(7);
        let outer = arena.push(JsValue::Null);
        let scope = arena.open();
        let inner = arena.push(JsValue::Bool(true));
        assert_eq!(arena.len(), 2);

        assert_eq!(
            arena.close(scope.arena, scope.depth, scope.serial, false),
            Ok(scope.serial)
        );
        assert_eq!(arena.len(), 1);
        assert_eq!(arena.get(outer), Ok(&JsValue::Null));
        assert_eq!(arena.get(inner), Err(Status::InvalidArg));
    }

    #[test]
    fn test_stale_handle_with_reused_index() {
        let mut arena = HandleArena::new(1);
        let first = arena.open();
        let stale = arena.push(JsValue::from(1));
        arena
            .close(first.arena, first.depth, first.serial, false)
            .unwrap();

        let _second = arena.open();
        let fresh = arena.push(JsValue::from(2));
        assert_eq!(stale.index, fresh.index);
        assert_eq!(arena.get(stale), Err(Status::InvalidArg));
        assert_eq!(arena.get(fresh), Ok(&JsValue::from(2)));
    }

    #[test]
    fn test_out_of_order_close_is_mismatch() {
        let mut arena = HandleArena::new(1);
        let a = arena.open();
        let b = arena.open();
        assert_eq!(
            arena.close(a.arena, a.depth, a.serial, false),
            Err(Status::HandleScopeMismatch)
        );
        assert_eq!(arena.depth(), 2);
        assert!(arena.close(b.arena, b.depth, b.serial, false).is_ok());
        assert!(arena.close(a.arena, a.depth, a.serial, false).is_ok());
        assert_eq!(arena.depth(), 0);
    }

    #[test]
    fn test_escape_lands_in_parent() {
        let mut arena = HandleArena::new(3);
        let scope = arena.open_escapable();
        let value = arena.push(JsValue::from("kept"));
        let escaped = arena.escape(scope, value).unwrap();
        assert_eq!(arena.escape(scope, value), Err(Status::EscapeCalledTwice));

        arena
            .close(scope.arena, scope.depth, scope.serial, true)
            .unwrap();
        assert_eq!(arena.get(escaped), Ok(&JsValue::from("kept")));
        assert_eq!(arena.get(value), Err(Status::InvalidArg));
    }

    #[test]
    fn test_unwind_reports_closed_frames() {
        let mut arena = HandleArena::new(1);
        let depth = arena.enter_engine_frame();
        let a = arena.open();
        let _b = arena.open();
        let closed = arena.unwind_to(depth);
        assert_eq!(closed.len(), 3);
        assert!(closed.contains(&a.serial));
        assert_eq!(arena.depth(), 0);
    }
}
