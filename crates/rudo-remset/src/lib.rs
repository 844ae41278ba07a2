//! Reference tracking for a generational, incrementally marking, compacting
//! garbage collector.
//!
//! `rudo-remset` provides the bookkeeping a collector needs to find
//! cross-generation and cross-region references without rescanning the
//! heap:
//!
//! - **Store buffer**: the write barrier appends old-to-young slot addresses
//!   in O(1); they are drained into remembered sets at minor collection.
//! - **Remembered sets**: per-region slot bitmaps, one per
//!   [`RememberedSetKind`], addressed through the typed [`RememberedSet`].
//! - **Invalidated slots**: objects whose layout changed while marking was
//!   in progress are registered per region; [`InvalidatedSlotsFilter`] stops
//!   remembered-set scans from visiting stale slots inside them, and
//!   [`InvalidatedSlotsCleanup`] shrinks the registry as the sweeper
//!   reclaims memory.
//!
//! Addresses are `(RegionId, offset)` pairs. All region-scoped structures
//! work on plain offsets.
//!
//! # Quick Start
//!
//! ```
//! use rudo_remset::{Heap, InvalidatedSlotsFilter, Space};
//!
//! let mut heap = Heap::default();
//! let array = heap.allocate(Space::Old, 256);
//!
//! heap.start_incremental_marking();
//! heap.notify_object_layout_change(array);
//!
//! let region = heap.region(array.region()).unwrap();
//! let mut filter = InvalidatedSlotsFilter::old_to_old(region);
//! assert!(!filter.is_valid(array.start()));
//! assert!(filter.is_valid(array.end()));
//! ```
//!
//! # Features
//!
//! - `tracing`: structured spans and events through the `tracing` crate.
//! - `paranoid-invalidation`: re-checks that registered objects stay
//!   disjoint after every registry update, in release builds too.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod address;
mod config;
mod heap;
pub mod invalidated_slots;
mod marking;
mod metrics;
mod region;
mod remembered_set;
pub mod slot_set;
mod store_buffer;
mod sweeper;
mod tracing;

pub use address::{
    align_to_tagged, Address, RegionId, REGION_HEADER_SIZE, REGION_SIZE, TAGGED_SIZE,
    TAGGED_SIZE_LOG2,
};
pub use config::{HeapConfig, DEFAULT_LARGE_OBJECT_THRESHOLD, DEFAULT_STORE_BUFFER_CHUNK_CAPACITY};
pub use heap::{Heap, HeapObject, MinorCollectionStats, Space};
pub use invalidated_slots::{InvalidatedSlots, InvalidatedSlotsCleanup, InvalidatedSlotsFilter};
pub use marking::{IncrementalMarking, MarkPhase};
pub use metrics::{MetricsSnapshot, RemsetMetrics};
pub use region::{Generation, ObjectLayout, Region, SweepState};
pub use remembered_set::{
    OldToNew, OldToOld, RememberedSet, RememberedSetKind, RememberedSetType,
};
pub use slot_set::{EmptyBucketMode, SlotCallbackResult, SlotSet};
pub use store_buffer::{
    DrainStats, FlushKind, FlushStats, SharedStoreBuffer, StoreBuffer, StoreBufferSink,
};
pub use sweeper::SweepOutcome;
pub use crate::tracing::CollectionId;
