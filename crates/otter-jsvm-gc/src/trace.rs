//! Tracing trait for heap payloads

use crate::heap::HeapId;

/// Trait for values stored in a [`GcHeap`](crate::GcHeap)
pub trait GcTraceable {
    /// Whether this type contains heap references that need tracing
    const NEEDS_TRACE: bool;

    /// Report every [`HeapId`] this value keeps alive
    fn trace(&self, tracer: &mut dyn FnMut(HeapId));

    /// Approximate number of bytes this value accounts for
    fn heap_size(&self) -> usize {
        std::mem::size_of_val(self)
    }
}

impl GcTraceable for () {
    const NEEDS_TRACE: bool = false;
    fn trace(&self, _tracer: &mut dyn FnMut(HeapId)) {}
}

impl GcTraceable for String {
    const NEEDS_TRACE: bool = false;
    fn trace(&self, _tracer: &mut dyn FnMut(HeapId)) {}

    fn heap_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.capacity()
    }
}

impl<T: GcTraceable> GcTraceable for Vec<T> {
    const NEEDS_TRACE: bool = T::NEEDS_TRACE;

    fn trace(&self, tracer: &mut dyn FnMut(HeapId)) {
        if T::NEEDS_TRACE {
            for item in self {
                item.trace(tracer);
            }
        }
    }

    fn heap_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.iter().map(GcTraceable::heap_size).sum::<usize>()
    }
}

impl GcTraceable for HeapId {
    const NEEDS_TRACE: bool = true;

    fn trace(&self, tracer: &mut dyn FnMut(HeapId)) {
        tracer(*self);
    }
}
