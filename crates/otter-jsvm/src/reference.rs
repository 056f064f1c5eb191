//! Reference table: durable, explicitly counted handles

use otter_jsvm_gc::HeapId;

use crate::env::Env;
use crate::status::{JsvmResult, Status};
use crate::value::{JsValue, Value};

/// A durable reference to a value
///
/// Survives handle scope closure until deleted. While its count is zero the
/// referenced object is held weakly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reference {
    pub(crate) table: u32,
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

#[derive(Debug)]
struct Entry {
    value: JsValue,
    count: u32,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Debug)]
pub(crate) struct ReferenceTable {
    key: u32,
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl ReferenceTable {
    pub(crate) fn new(key: u32) -> Self {
        Self {
            key,
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub(crate) fn create(&mut self, value: JsValue, count: u32) -> Reference {
        let entry = Entry { value, count };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].entry = Some(entry);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                (self.slots.len() - 1) as u32
            }
        };
        Reference {
            table: self.key,
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    fn entry_mut(&mut self, r: Reference) -> JsvmResult<&mut Entry> {
        if r.table != self.key {
            return Err(Status::InvalidArg);
        }
        self.slots
            .get_mut(r.index as usize)
            .filter(|s| s.generation == r.generation)
            .and_then(|s| s.entry.as_mut())
            .ok_or(Status::InvalidArg)
    }

    fn entry(&self, r: Reference) -> JsvmResult<&Entry> {
        if r.table != self.key {
            return Err(Status::InvalidArg);
        }
        self.slots
            .get(r.index as usize)
            .filter(|s| s.generation == r.generation)
            .and_then(|s| s.entry.as_ref())
            .ok_or(Status::InvalidArg)
    }

    pub(crate) fn increment(&mut self, r: Reference) -> JsvmResult<u32> {
        let entry = self.entry_mut(r)?;
        entry.count = entry.count.saturating_add(1);
        Ok(entry.count)
    }

    pub(crate) fn decrement(&mut self, r: Reference) -> JsvmResult<u32> {
        let entry = self.entry_mut(r)?;
        entry.count = entry.count.saturating_sub(1);
        Ok(entry.count)
    }

    pub(crate) fn count(&self, r: Reference) -> JsvmResult<u32> {
        self.entry(r).map(|e| e.count)
    }

    /// The referenced value; `None` once a weakly held object is gone
    pub(crate) fn get(
        &self,
        r: Reference,
        is_live: impl Fn(HeapId) -> bool,
    ) -> JsvmResult<Option<JsValue>> {
        let entry = self.entry(r)?;
        match entry.value.heap_id() {
            Some(id) if !is_live(id) => Ok(None),
            _ => Ok(Some(entry.value.clone())),
        }
    }

    pub(crate) fn delete(&mut self, r: Reference) -> JsvmResult<()> {
        self.entry(r)?;
        let slot = &mut self.slots[r.index as usize];
        slot.entry = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(r.index);
        Ok(())
    }

    /// Heap ids held strongly (count above zero)
    pub(crate) fn roots(&self) -> impl Iterator<Item = HeapId> + '_ {
        self.slots
            .iter()
            .filter_map(|s| s.entry.as_ref())
            .filter(|e| e.count > 0)
            .filter_map(|e| e.value.heap_id())
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }
}

// ==================== Host surface ====================

impl Env {
    /// Create a reference; a count of 0 holds the value weakly
    pub fn create_reference(&mut self, value: Value, initial_count: u32) -> JsvmResult<Reference> {
        let value = self.get(value)?;
        Ok(self.references.create(value, initial_count))
    }

    /// Create a strong reference; a count of 0 is rejected
    pub fn create_data_reference(
        &mut self,
        value: Value,
        initial_count: u32,
    ) -> JsvmResult<Reference> {
        if initial_count == 0 {
            return Err(Status::InvalidArg);
        }
        self.create_reference(value, initial_count)
    }

    /// Increment the count, returning the new one
    pub fn reference_ref(&mut self, reference: Reference) -> JsvmResult<u32> {
        self.references.increment(reference)
    }

    /// Decrement the count, stopping at 0, returning the new one
    pub fn reference_unref(&mut self, reference: Reference) -> JsvmResult<u32> {
        self.references.decrement(reference)
    }

    /// Current count of `reference`
    pub fn reference_count(&self, reference: Reference) -> JsvmResult<u32> {
        self.references.count(reference)
    }

    /// The referenced value, or `None` once it has been collected
    pub fn get_reference_value(&mut self, reference: Reference) -> JsvmResult<Option<Value>> {
        let heap = &self.heap;
        let value = self.references.get(reference, |id| heap.is_live(id))?;
        Ok(value.map(|v| self.push(v)))
    }

    /// Remove the entry regardless of its count
    pub fn delete_reference(&mut self, reference: Reference) -> JsvmResult<()> {
        self.references.delete(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_saturate_at_zero() {
        let mut table = ReferenceTable::new(1);
        let r = table.create(JsValue::Null, 1);
        assert_eq!(table.decrement(r), Ok(0));
        assert_eq!(table.decrement(r), Ok(0));
        assert_eq!(table.increment(r), Ok(1));
        assert_eq!(table.count(r), Ok(1));
    }

    #[test]
    fn test_delete_invalidates_and_reuses_slot() {
        let mut table = ReferenceTable::new(1);
        let first = table.create(JsValue::from(1), 5);
        table.delete(first).unwrap();
        assert_eq!(table.delete(first), Err(Status::InvalidArg));

        let second = table.create(JsValue::from(2), 0);
        assert_eq!(second.index, first.index);
        assert_eq!(table.count(first), Err(Status::InvalidArg));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_foreign_reference_rejected() {
        let mut a = ReferenceTable::new(1);
        let b = ReferenceTable::new(2);
        let r = a.create(JsValue::Null, 1);
        assert_eq!(b.count(r), Err(Status::InvalidArg));
    }
}
