//! Heap configuration.

use crate::address::{align_to_tagged, REGION_HEADER_SIZE, REGION_SIZE, TAGGED_SIZE};

/// Entries per store-buffer chunk. The buffer holds two chunks.
pub const DEFAULT_STORE_BUFFER_CHUNK_CAPACITY: usize = 16 * 1024;

/// Objects larger than this get a dedicated large region.
pub const DEFAULT_LARGE_OBJECT_THRESHOLD: usize = (REGION_SIZE - REGION_HEADER_SIZE) / 2;

/// Tunables for a [`Heap`](crate::Heap).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Size of a regular region in bytes, header included.
    pub region_size: usize,
    /// Capacity of each of the two store-buffer chunks, in entries.
    pub store_buffer_chunk_capacity: usize,
    /// Allocation size above which objects get their own region.
    pub large_object_threshold: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            region_size: REGION_SIZE,
            store_buffer_chunk_capacity: DEFAULT_STORE_BUFFER_CHUNK_CAPACITY,
            large_object_threshold: DEFAULT_LARGE_OBJECT_THRESHOLD,
        }
    }
}

impl HeapConfig {
    /// Set the regular region size. Rounded up to tagged alignment.
    #[must_use]
    pub const fn with_region_size(mut self, region_size: usize) -> Self {
        self.region_size = align_to_tagged(region_size);
        self
    }

    /// Set the per-chunk store buffer capacity.
    #[must_use]
    pub const fn with_store_buffer_chunk_capacity(mut self, capacity: usize) -> Self {
        self.store_buffer_chunk_capacity = capacity;
        self
    }

    /// Set the large-object threshold. Objects that do not fit in a regular
    /// region get a large region whatever the threshold.
    #[must_use]
    pub const fn with_large_object_threshold(mut self, threshold: usize) -> Self {
        self.large_object_threshold = threshold;
        self
    }

    /// Usable bytes in a regular region.
    #[must_use]
    pub const fn region_area_size(&self) -> usize {
        self.region_size.saturating_sub(REGION_HEADER_SIZE)
    }

    /// Debug-checks the configuration for values the heap cannot work with.
    pub(crate) fn debug_validate(&self) {
        debug_assert!(
            self.region_size > REGION_HEADER_SIZE + TAGGED_SIZE,
            "region size {} leaves no object area",
            self.region_size
        );
        debug_assert!(
            self.store_buffer_chunk_capacity > 0,
            "store buffer chunks need at least one entry"
        );
    }
}
