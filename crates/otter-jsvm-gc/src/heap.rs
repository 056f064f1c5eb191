//! Slot heap and mark/sweep collection

use std::time::{Duration, Instant};

use crate::trace::GcTraceable;

/// Generation-checked id of a heap slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapId {
    index: u32,
    generation: u32,
}

impl HeapId {
    /// Slot index
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Slot generation at allocation time
    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

/// Collection trigger configuration
#[derive(Debug, Clone, Copy)]
pub struct GcConfig {
    /// Bytes that trigger the first collection, and the lower bound afterwards
    pub initial_trigger: usize,
    /// Upper bound for the trigger after a collection
    pub max_trigger: usize,
    /// Number of slots to reserve up front
    pub initial_slots: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            initial_trigger: 1024 * 1024,
            max_trigger: 16 * 1024 * 1024,
            initial_slots: 0,
        }
    }
}

/// Collection statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct GcStats {
    /// Collections performed so far
    pub collection_count: usize,
    /// Live objects
    pub live_objects: usize,
    /// Bytes accounted to live objects plus allocations since the last cycle
    pub total_bytes: usize,
    /// Objects freed by the last collection
    pub last_freed: usize,
    /// Bytes reclaimed by the last collection
    pub last_reclaimed: usize,
    /// Pause of the last collection
    pub last_pause: Duration,
    /// Accumulated pause time
    pub total_pause: Duration,
}

struct Slot<T> {
    generation: u32,
    marked: bool,
    value: Option<T>,
}

/// A non-moving mark/sweep heap
pub struct GcHeap<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    config: GcConfig,
    trigger: usize,
    total_bytes: usize,
    live_objects: usize,
    stats: GcStats,
}

impl<T: GcTraceable> GcHeap<T> {
    /// Create an empty heap with the default configuration
    pub fn new() -> Self {
        Self::with_config(GcConfig::default())
    }

    /// Create an empty heap
    pub fn with_config(config: GcConfig) -> Self {
        let max_trigger = config.max_trigger.max(config.initial_trigger);
        Self {
            slots: Vec::with_capacity(config.initial_slots),
            free: Vec::new(),
            config: GcConfig {
                max_trigger,
                ..config
            },
            trigger: config.initial_trigger,
            total_bytes: 0,
            live_objects: 0,
            stats: GcStats::default(),
        }
    }

    /// Allocate a value
    pub fn alloc(&mut self, value: T) -> HeapId {
        let size = value.heap_size();
        self.total_bytes += size;
        self.live_objects += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            slot.marked = false;
            return HeapId {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            marked: false,
            value: Some(value),
        });
        HeapId {
            index,
            generation: 0,
        }
    }

    fn slot(&self, id: HeapId) -> Option<&Slot<T>> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation && slot.value.is_some())
    }

    /// Borrow a live value
    pub fn get(&self, id: HeapId) -> Option<&T> {
        self.slot(id).and_then(|slot| slot.value.as_ref())
    }

    /// Mutably borrow a live value
    pub fn get_mut(&mut self, id: HeapId) -> Option<&mut T> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Whether `id` still names a live value
    pub fn is_live(&self, id: HeapId) -> bool {
        self.slot(id).is_some()
    }

    /// Number of live values
    pub fn len(&self) -> usize {
        self.live_objects
    }

    /// Whether the heap holds no values
    pub fn is_empty(&self) -> bool {
        self.live_objects == 0
    }

    /// Bytes accounted to the heap
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Whether allocation has crossed the current trigger
    pub fn should_collect(&self) -> bool {
        self.total_bytes >= self.trigger
    }

    /// Current collection trigger in bytes
    pub fn trigger(&self) -> usize {
        self.trigger
    }

    /// Collection statistics
    pub fn stats(&self) -> GcStats {
        GcStats {
            live_objects: self.live_objects,
            total_bytes: self.total_bytes,
            ..self.stats
        }
    }

    /// Iterate over live values
    pub fn iter(&self) -> impl Iterator<Item = (HeapId, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    HeapId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }

    /// Perform a full mark/sweep collection
    ///
    /// Returns the swept values in slot order. Stale root ids are ignored.
    pub fn collect(&mut self, roots: impl IntoIterator<Item = HeapId>) -> Vec<(HeapId, T)> {
        let start = Instant::now();

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "otter::gc",
            heap_bytes = self.total_bytes,
            objects = self.live_objects,
            "GC cycle starting"
        );

        self.mark(roots);
        let swept = self.sweep();

        let live_bytes: usize = self
            .slots
            .iter()
            .filter_map(|slot| slot.value.as_ref())
            .map(GcTraceable::heap_size)
            .sum();
        let reclaimed = self.total_bytes.saturating_sub(live_bytes);
        self.total_bytes = live_bytes;
        self.trigger = (live_bytes.saturating_mul(2))
            .clamp(self.config.initial_trigger, self.config.max_trigger);

        let elapsed = start.elapsed();
        self.stats.collection_count += 1;
        self.stats.last_freed = swept.len();
        self.stats.last_reclaimed = reclaimed;
        self.stats.last_pause = elapsed;
        self.stats.total_pause += elapsed;

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "otter::gc",
            collection = self.stats.collection_count,
            reclaimed_bytes = reclaimed,
            pause_us = elapsed.as_micros() as u64,
            live_bytes,
            live_objects = self.live_objects,
            freed_objects = swept.len(),
            next_trigger = self.trigger,
            "GC cycle complete"
        );

        swept
    }

    fn mark(&mut self, roots: impl IntoIterator<Item = HeapId>) {
        for slot in &mut self.slots {
            slot.marked = false;
        }

        let mut worklist: Vec<HeapId> = roots.into_iter().collect();
        while let Some(id) = worklist.pop() {
            let Some(slot) = self.slots.get_mut(id.index as usize) else {
                continue;
            };
            if slot.generation != id.generation || slot.marked {
                continue;
            }
            let Some(value) = slot.value.as_ref() else {
                continue;
            };
            slot.marked = true;
            if T::NEEDS_TRACE {
                value.trace(&mut |child| worklist.push(child));
            }
        }
    }

    fn sweep(&mut self) -> Vec<(HeapId, T)> {
        let mut swept = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.marked || slot.value.is_none() {
                continue;
            }
            if let Some(value) = slot.value.take() {
                swept.push((
                    HeapId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    value,
                ));
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
                self.live_objects -= 1;
            }
        }
        swept
    }

    /// Remove every value, returning them in slot order
    pub fn drain(&mut self) -> Vec<(HeapId, T)> {
        self.collect(std::iter::empty::<HeapId>())
    }
}

impl<T: GcTraceable> Default for GcHeap<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_get() {
        let mut heap: GcHeap<String> = GcHeap::new();
        let id = heap.alloc("hello".to_string());
        assert_eq!(heap.get(id).map(String::as_str), Some("hello"));
        assert_eq!(heap.len(), 1);
        assert!(heap.total_bytes() > 0);
    }

    #[test]
    fn test_freed_slot_is_reused_with_new_generation() {
        let mut heap: GcHeap<String> = GcHeap::new();
        let old = heap.alloc("a".to_string());
        heap.collect([]);
        let new = heap.alloc("b".to_string());

        assert_eq!(old.index(), new.index());
        assert_ne!(old.generation(), new.generation());
        assert!(heap.get(old).is_none());
        assert_eq!(heap.get(new).map(String::as_str), Some("b"));
    }
}
