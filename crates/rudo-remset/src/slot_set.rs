//! Bucketed slot bitmap backing a region's remembered set.
//!
//! One bit per tagged slot. Bits are grouped into 32-bit cells and cells into
//! buckets of 32 cells (1024 slots, 8KB of region memory). Buckets are
//! allocated on first insert, so a sparse set over a multi-megabyte large
//! region only pays for the buckets it touches.

use crate::address::{TAGGED_SIZE, TAGGED_SIZE_LOG2};

const BITS_PER_CELL: usize = 32;
const CELLS_PER_BUCKET: usize = 32;

/// Slots covered by one bucket.
pub const SLOTS_PER_BUCKET: usize = BITS_PER_CELL * CELLS_PER_BUCKET;

/// Region bytes covered by one bucket.
pub const BUCKET_SPAN: usize = SLOTS_PER_BUCKET * TAGGED_SIZE;

/// Returned by iteration callbacks to keep or drop the visited slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotCallbackResult {
    /// Leave the slot in the set.
    Keep,
    /// Remove the slot from the set.
    Remove,
}

/// What to do with buckets that become empty during iteration or removal.
///
/// Freeing reclaims memory now; keeping avoids re-allocating the bucket if
/// the same part of the region is recorded again soon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyBucketMode {
    /// Keep empty buckets allocated.
    KeepEmptyBuckets,
    /// Release buckets whose cells are all zero.
    FreeEmptyBuckets,
}

#[derive(Debug, Clone)]
struct Bucket {
    cells: [u32; CELLS_PER_BUCKET],
}

impl Bucket {
    const fn new() -> Self {
        Self {
            cells: [0; CELLS_PER_BUCKET],
        }
    }

    fn is_empty(&self) -> bool {
        self.cells.iter().all(|&cell| cell == 0)
    }
}

/// Sparse set of slot offsets within one region.
#[derive(Debug, Clone, Default)]
pub struct SlotSet {
    buckets: Vec<Option<Box<Bucket>>>,
    len: usize,
}

#[inline]
const fn slot_index(offset: usize) -> usize {
    offset >> TAGGED_SIZE_LOG2
}

#[inline]
const fn split(slot: usize) -> (usize, usize, u32) {
    let bucket = slot / SLOTS_PER_BUCKET;
    let cell = (slot % SLOTS_PER_BUCKET) / BITS_PER_CELL;
    #[allow(clippy::cast_possible_truncation)]
    let bit = (slot % BITS_PER_CELL) as u32;
    (bucket, cell, bit)
}

impl SlotSet {
    /// Create a set able to address `region_size` bytes without growing.
    #[must_use]
    pub fn new(region_size: usize) -> Self {
        let bucket_count = region_size.div_ceil(BUCKET_SPAN);
        let mut buckets = Vec::with_capacity(bucket_count);
        buckets.resize_with(bucket_count, || None);
        Self { buckets, len: 0 }
    }

    /// Number of recorded slots.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether no slot is recorded.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of buckets currently allocated.
    #[must_use]
    pub fn allocated_buckets(&self) -> usize {
        self.buckets.iter().filter(|b| b.is_some()).count()
    }

    /// Record `offset`. Returns `true` if it was not already present.
    pub fn insert(&mut self, offset: usize) -> bool {
        debug_assert!(
            offset % TAGGED_SIZE == 0,
            "slot offset {offset:#x} is not tagged-aligned"
        );
        let (bucket_index, cell, bit) = split(slot_index(offset));
        if bucket_index >= self.buckets.len() {
            // Large regions may be handed offsets past the nominal span.
            self.buckets.resize_with(bucket_index + 1, || None);
        }
        let bucket = self.buckets[bucket_index].get_or_insert_with(|| Box::new(Bucket::new()));
        let mask = 1u32 << bit;
        if bucket.cells[cell] & mask != 0 {
            return false;
        }
        bucket.cells[cell] |= mask;
        self.len += 1;
        true
    }

    /// Whether `offset` is recorded.
    #[must_use]
    pub fn contains(&self, offset: usize) -> bool {
        let (bucket_index, cell, bit) = split(slot_index(offset));
        self.buckets
            .get(bucket_index)
            .and_then(Option::as_ref)
            .is_some_and(|bucket| bucket.cells[cell] & (1u32 << bit) != 0)
    }

    /// Remove `offset`. Returns `true` if it was present.
    pub fn remove(&mut self, offset: usize) -> bool {
        let (bucket_index, cell, bit) = split(slot_index(offset));
        let Some(Some(bucket)) = self.buckets.get_mut(bucket_index) else {
            return false;
        };
        let mask = 1u32 << bit;
        if bucket.cells[cell] & mask == 0 {
            return false;
        }
        bucket.cells[cell] &= !mask;
        self.len -= 1;
        true
    }

    /// Remove every slot in `[start, end)`. Returns the number removed.
    pub fn remove_range(&mut self, start: usize, end: usize, mode: EmptyBucketMode) -> usize {
        if start >= end {
            return 0;
        }
        let end_slot = end.div_ceil(TAGGED_SIZE);
        let mut slot = start.div_ceil(TAGGED_SIZE);
        let mut removed = 0;

        while slot < end_slot {
            let (bucket_index, cell, bit) = split(slot);
            if bucket_index >= self.buckets.len() {
                break;
            }
            let bucket_end_slot = (bucket_index + 1) * SLOTS_PER_BUCKET;
            let Some(bucket) = self.buckets[bucket_index].as_mut() else {
                slot = bucket_end_slot;
                continue;
            };

            let cell_end_slot = slot - bit as usize + BITS_PER_CELL;
            let upto = end_slot.min(cell_end_slot);
            let width = upto - slot;
            let mask = if width == BITS_PER_CELL {
                u32::MAX
            } else {
                ((1u32 << width) - 1) << bit
            };
            removed += (bucket.cells[cell] & mask).count_ones() as usize;
            bucket.cells[cell] &= !mask;
            slot = upto;

            let leaving_bucket = slot >= bucket_end_slot || slot >= end_slot;
            if leaving_bucket && mode == EmptyBucketMode::FreeEmptyBuckets && bucket.is_empty() {
                self.buckets[bucket_index] = None;
            }
        }

        self.len -= removed;
        removed
    }

    /// Visit every recorded offset in ascending order.
    ///
    /// Slots for which `callback` returns [`SlotCallbackResult::Remove`] are
    /// dropped. Returns the number of slots kept.
    pub fn iterate<F>(&mut self, mut callback: F, mode: EmptyBucketMode) -> usize
    where
        F: FnMut(usize) -> SlotCallbackResult,
    {
        let mut kept = 0;
        let mut removed = 0;
        for (bucket_index, entry) in self.buckets.iter_mut().enumerate() {
            let Some(bucket) = entry.as_mut() else {
                continue;
            };
            for (cell_index, cell) in bucket.cells.iter_mut().enumerate() {
                let mut remaining = *cell;
                while remaining != 0 {
                    let bit = remaining.trailing_zeros();
                    remaining &= remaining - 1;
                    let slot =
                        bucket_index * SLOTS_PER_BUCKET + cell_index * BITS_PER_CELL + bit as usize;
                    match callback(slot << TAGGED_SIZE_LOG2) {
                        SlotCallbackResult::Keep => kept += 1,
                        SlotCallbackResult::Remove => {
                            *cell &= !(1u32 << bit);
                            removed += 1;
                        }
                    }
                }
            }
            if mode == EmptyBucketMode::FreeEmptyBuckets && bucket.is_empty() {
                *entry = None;
            }
        }
        self.len -= removed;
        kept
    }

    /// Recorded offsets in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.buckets
            .iter()
            .enumerate()
            .filter_map(|(index, bucket)| bucket.as_ref().map(|b| (index, b)))
            .flat_map(|(bucket_index, bucket)| {
                bucket
                    .cells
                    .iter()
                    .enumerate()
                    .flat_map(move |(cell_index, &cell)| {
                        let base = bucket_index * SLOTS_PER_BUCKET + cell_index * BITS_PER_CELL;
                        CellBits(cell).map(move |bit| (base + bit as usize) << TAGGED_SIZE_LOG2)
                    })
            })
    }

    /// Release every bucket that holds no slot.
    pub fn free_empty_buckets(&mut self) {
        for entry in &mut self.buckets {
            if entry.as_ref().is_some_and(|bucket| bucket.is_empty()) {
                *entry = None;
            }
        }
    }
}

/// Iterator over the set bit positions of a cell.
struct CellBits(u32);

impl Iterator for CellBits {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.0 == 0 {
            return None;
        }
        let bit = self.0.trailing_zeros();
        self.0 &= self.0 - 1;
        Some(bit)
    }
}
