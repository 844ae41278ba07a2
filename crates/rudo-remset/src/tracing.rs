//! Reference-tracking tracing support.
//!
//! When the `tracing` feature is enabled, this module provides structured
//! spans and events for minor collections, sweeping and the old-to-old
//! pointer-update pass. Callers gate every use on the feature.

#[cfg(feature = "tracing")]
pub mod internal {
    use crate::address::RegionId;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tracing::{span, Level};

    /// Stable identifier for one collection.
    ///
    /// Correlates all events emitted while a collection runs. Monotonically
    /// increasing, starting at 1.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CollectionId(pub u64);

    static NEXT_COLLECTION_ID: AtomicU64 = AtomicU64::new(1);

    /// Generate the next collection ID.
    pub fn next_collection_id() -> CollectionId {
        CollectionId(NEXT_COLLECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Span covering a whole minor collection.
    pub fn trace_minor_collection(id: CollectionId) -> span::EnteredSpan {
        span!(Level::DEBUG, "minor_gc", collection_id = id.0).entered()
    }

    /// Span covering the old-to-old pointer-update pass.
    pub fn trace_pointer_update(id: CollectionId) -> span::EnteredSpan {
        span!(Level::DEBUG, "update_old_to_old", collection_id = id.0).entered()
    }

    /// Span covering the sweep of one region.
    pub fn trace_sweep_region(region: RegionId) -> span::EnteredSpan {
        span!(Level::DEBUG, "sweep_region", region = region.0).entered()
    }

    pub fn log_store_buffer_flush(overflow: bool, captured: usize, recorded: usize) {
        tracing::debug!(overflow, captured, recorded, "store_buffer_flush");
    }

    pub fn log_invalidated_object(region: RegionId, start: usize, size: usize, kind: &str) {
        tracing::trace!(region = region.0, start, size, kind, "invalidated_object");
    }

    pub fn log_slots_filtered(region: RegionId, filtered: usize, kept: usize) {
        tracing::debug!(region = region.0, filtered, kept, "remembered_set_scan");
    }

    pub fn log_region_swept(freed_ranges: usize, freed_bytes: usize) {
        tracing::debug!(freed_ranges, freed_bytes, "region_swept");
    }

    pub fn log_promotion(region: RegionId, recorded: usize) {
        tracing::debug!(region = region.0, recorded, "region_promoted");
    }
}

#[cfg(not(feature = "tracing"))]
pub mod internal {
    /// Stub type when tracing is disabled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CollectionId(pub u64);
}

pub use internal::CollectionId;
