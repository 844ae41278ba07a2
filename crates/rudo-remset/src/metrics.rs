//! Reference-tracking counters.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Point-in-time copy of a heap's [`RemsetMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Slots pushed into the store buffer by the write barrier.
    pub store_buffer_inserts: usize,
    /// Flushes forced by both chunks filling up.
    pub store_buffer_overflows: usize,
    /// Flushes performed at minor collection.
    pub store_buffer_flushes: usize,
    /// Slots added to old-to-new remembered sets by flushes.
    pub old_to_new_recorded: usize,
    /// Slots added to old-to-old remembered sets by the barrier.
    pub old_to_old_recorded: usize,
    /// Objects registered as having invalidated slots.
    pub invalidations_registered: usize,
    /// Registrations skipped because marking was inactive or the region
    /// was an evacuation candidate.
    pub invalidations_skipped: usize,
    /// Recorded slots dropped because they lay inside an invalidated object.
    pub slots_filtered: usize,
    /// Regions swept.
    pub regions_swept: usize,
    /// Minor collections run.
    pub minor_collections: usize,
}

/// Cumulative counters for one heap.
#[derive(Debug, Default)]
pub struct RemsetMetrics {
    store_buffer_inserts: AtomicUsize,
    store_buffer_overflows: AtomicUsize,
    store_buffer_flushes: AtomicUsize,
    old_to_new_recorded: AtomicUsize,
    old_to_old_recorded: AtomicUsize,
    invalidations_registered: AtomicUsize,
    invalidations_skipped: AtomicUsize,
    slots_filtered: AtomicUsize,
    regions_swept: AtomicUsize,
    minor_collections: AtomicUsize,
    last_minor_pause_ns: AtomicUsize,
}

macro_rules! counter {
    ($record:ident, $total:ident, $field:ident, $doc:literal) => {
        #[inline]
        pub(crate) fn $record(&self, n: usize) {
            self.$field.fetch_add(n, Ordering::Relaxed);
        }

        #[doc = $doc]
        #[inline]
        #[must_use]
        pub fn $total(&self) -> usize {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl RemsetMetrics {
    /// Create a zeroed counter set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            store_buffer_inserts: AtomicUsize::new(0),
            store_buffer_overflows: AtomicUsize::new(0),
            store_buffer_flushes: AtomicUsize::new(0),
            old_to_new_recorded: AtomicUsize::new(0),
            old_to_old_recorded: AtomicUsize::new(0),
            invalidations_registered: AtomicUsize::new(0),
            invalidations_skipped: AtomicUsize::new(0),
            slots_filtered: AtomicUsize::new(0),
            regions_swept: AtomicUsize::new(0),
            minor_collections: AtomicUsize::new(0),
            last_minor_pause_ns: AtomicUsize::new(0),
        }
    }

    counter!(
        record_store_buffer_inserts,
        store_buffer_inserts,
        store_buffer_inserts,
        "Slots pushed into the store buffer."
    );
    counter!(
        record_store_buffer_overflows,
        store_buffer_overflows,
        store_buffer_overflows,
        "Overflow flushes of the store buffer."
    );
    counter!(
        record_store_buffer_flushes,
        store_buffer_flushes,
        store_buffer_flushes,
        "Normal flushes of the store buffer."
    );
    counter!(
        record_old_to_new,
        old_to_new_recorded,
        old_to_new_recorded,
        "Slots added to old-to-new remembered sets."
    );
    counter!(
        record_old_to_old,
        old_to_old_recorded,
        old_to_old_recorded,
        "Slots added to old-to-old remembered sets."
    );
    counter!(
        record_invalidation,
        invalidations_registered,
        invalidations_registered,
        "Accepted invalidated-object registrations."
    );
    counter!(
        record_invalidation_skipped,
        invalidations_skipped,
        invalidations_skipped,
        "Registrations that were no-ops."
    );
    counter!(
        record_slots_filtered,
        slots_filtered,
        slots_filtered,
        "Recorded slots dropped as invalidated."
    );
    counter!(
        record_regions_swept,
        regions_swept,
        regions_swept,
        "Regions swept."
    );
    counter!(
        record_minor_collection,
        minor_collections,
        minor_collections,
        "Minor collections run."
    );

    pub(crate) fn record_minor_pause(&self, pause: Duration) {
        let ns = usize::try_from(pause.as_nanos()).unwrap_or(usize::MAX);
        self.last_minor_pause_ns.store(ns, Ordering::Relaxed);
    }

    /// Duration of the most recent minor collection.
    #[must_use]
    pub fn last_minor_pause(&self) -> Duration {
        Duration::from_nanos(self.last_minor_pause_ns.load(Ordering::Relaxed) as u64)
    }

    /// Copy all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            store_buffer_inserts: self.store_buffer_inserts(),
            store_buffer_overflows: self.store_buffer_overflows(),
            store_buffer_flushes: self.store_buffer_flushes(),
            old_to_new_recorded: self.old_to_new_recorded(),
            old_to_old_recorded: self.old_to_old_recorded(),
            invalidations_registered: self.invalidations_registered(),
            invalidations_skipped: self.invalidations_skipped(),
            slots_filtered: self.slots_filtered(),
            regions_swept: self.regions_swept(),
            minor_collections: self.minor_collections(),
        }
    }
}
