//! # Otter JSVM Garbage Collector
//!
//! Stop-the-world mark/sweep collector over a slot heap.
//!
//! ## Design
//!
//! - **Slots, not pointers**: Objects are addressed by [`HeapId`], an index
//!   plus a generation. A freed slot bumps its generation, so stale ids are
//!   detected instead of aliasing a new object
//! - **Explicit roots**: The embedder passes every root to [`GcHeap::collect`];
//!   nothing is scanned conservatively
//! - **Sweep hands back payloads**: Dead values are returned to the caller,
//!   which queues their finalizers

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod heap;
pub mod trace;

pub use heap::{GcConfig, GcHeap, GcStats, HeapId};
pub use trace::GcTraceable;
