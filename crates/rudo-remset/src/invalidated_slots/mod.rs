//! Invalidated-object tracking.
//!
//! When an object's layout changes while slots inside it may already be
//! recorded in a remembered set (a trim, an in-place type change, a switch
//! from fast to dictionary properties), those recorded slots can no longer
//! be trusted. The object's pre-change extent is registered here, per region
//! and per remembered-set kind; [`InvalidatedSlotsFilter`] then answers
//! whether a recorded slot is still safe to visit, and
//! [`InvalidatedSlotsCleanup`] shrinks registrations as the sweeper
//! reclaims memory.
//!
//! Registered ranges are kept pairwise disjoint. A range that overlaps an
//! existing entry is merged into it.

mod cleanup;
mod filter;

pub use cleanup::InvalidatedSlotsCleanup;
pub use filter::InvalidatedSlotsFilter;

use crate::address::TAGGED_SIZE;
use std::collections::BTreeMap;

/// Registry of invalidated objects of one region for one remembered-set kind.
///
/// Maps the start offset of each registered object to the byte size it had
/// when registered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidatedSlots {
    objects: BTreeMap<usize, usize>,
}

impl InvalidatedSlots {
    /// Create an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            objects: BTreeMap::new(),
        }
    }

    /// Number of registered objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Registered `(start, size)` pairs in ascending start order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.objects.iter().map(|(&start, &size)| (start, size))
    }

    /// Whether an entry starts exactly at `start`.
    #[must_use]
    pub fn contains_start(&self, start: usize) -> bool {
        self.objects.contains_key(&start)
    }

    /// Registered size of the entry starting at `start`.
    #[must_use]
    pub fn size_of(&self, start: usize) -> Option<usize> {
        self.objects.get(&start).copied()
    }

    /// The entry whose range contains `offset`, as `(start, size)`.
    #[must_use]
    pub fn lookup(&self, offset: usize) -> Option<(usize, usize)> {
        self.objects
            .range(..=offset)
            .next_back()
            .filter(|&(&start, &size)| offset < start + size)
            .map(|(&start, &size)| (start, size))
    }

    /// Record the object `[start, start + size)` as invalidated.
    ///
    /// Re-registering the same start keeps the larger size. A range starting
    /// inside an existing entry extends that entry if it reaches further,
    /// and entries the new range overlaps are absorbed into it.
    pub fn register(&mut self, start: usize, size: usize) {
        debug_assert!(size > 0, "empty invalidated object at {start:#x}");
        debug_assert_eq!(start % TAGGED_SIZE, 0, "unaligned object start {start:#x}");

        let end = start + size;
        let (merged_start, mut merged_end) = match self.lookup(start) {
            Some((existing, existing_size)) if end <= existing + existing_size => return,
            Some((existing, _)) => (existing, end),
            None => (start, end),
        };

        let absorbed: Vec<(usize, usize)> = self
            .objects
            .range(merged_start + 1..merged_end)
            .map(|(&s, &sz)| (s, sz))
            .collect();
        for (s, sz) in absorbed {
            merged_end = merged_end.max(s + sz);
            self.objects.remove(&s);
        }
        self.objects.insert(merged_start, merged_end - merged_start);
        self.verify();
    }

    /// Entries intersecting `[start, end)`, ascending.
    pub(crate) fn overlapping(&self, start: usize, end: usize) -> Vec<(usize, usize)> {
        let head = self
            .objects
            .range(..start)
            .next_back()
            .filter(|&(&s, &sz)| s + sz > start)
            .map(|(&s, &sz)| (s, sz));
        head.into_iter()
            .chain(self.objects.range(start..end).map(|(&s, &sz)| (s, sz)))
            .collect()
    }

    pub(crate) fn remove(&mut self, start: usize) -> Option<usize> {
        self.objects.remove(&start)
    }

    pub(crate) fn insert_unchecked(&mut self, start: usize, size: usize) {
        debug_assert!(size > 0);
        self.objects.insert(start, size);
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.objects.clear();
    }

    /// Checks that entries are pairwise disjoint.
    pub(crate) fn verify(&self) {
        if cfg!(any(debug_assertions, feature = "paranoid-invalidation")) {
            let mut prev_end = 0;
            for (&start, &size) in &self.objects {
                assert!(
                    start >= prev_end,
                    "invalidated object {start:#x} overlaps its predecessor ending at {prev_end:#x}"
                );
                prev_end = start + size;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(slots: &InvalidatedSlots) -> Vec<(usize, usize)> {
        slots.iter().collect()
    }

    #[test]
    fn test_register_disjoint() {
        let mut slots = InvalidatedSlots::new();
        slots.register(256, 64);
        slots.register(512, 32);
        assert_eq!(entries(&slots), vec![(256, 64), (512, 32)]);
        assert_eq!(slots.lookup(256), Some((256, 64)));
        assert_eq!(slots.lookup(312), Some((256, 64)));
        assert_eq!(slots.lookup(320), None);
        assert_eq!(slots.lookup(100), None);
    }

    #[test]
    fn test_reregister_keeps_larger_size() {
        let mut slots = InvalidatedSlots::new();
        slots.register(256, 64);
        slots.register(256, 32);
        assert_eq!(slots.size_of(256), Some(64));
        slots.register(256, 128);
        assert_eq!(slots.size_of(256), Some(128));
        assert_eq!(slots.len(), 1);
    }

    #[test]
    fn test_contained_registration_is_noop() {
        let mut slots = InvalidatedSlots::new();
        slots.register(256, 256);
        slots.register(320, 64);
        assert_eq!(entries(&slots), vec![(256, 256)]);
    }

    #[test]
    fn test_overlapping_registration_extends() {
        let mut slots = InvalidatedSlots::new();
        slots.register(256, 64);
        slots.register(288, 64);
        assert_eq!(entries(&slots), vec![(256, 96)]);
    }

    #[test]
    fn test_registration_absorbs_successors() {
        let mut slots = InvalidatedSlots::new();
        slots.register(512, 16);
        slots.register(600, 64);
        slots.register(1024, 8);
        slots.register(480, 200);
        assert_eq!(entries(&slots), vec![(480, 200), (1024, 8)]);

        slots.register(400, 88);
        assert_eq!(entries(&slots), vec![(400, 280), (1024, 8)]);
    }

    #[test]
    fn test_overlapping_query() {
        let mut slots = InvalidatedSlots::new();
        slots.register(256, 64);
        slots.register(512, 64);
        slots.register(1024, 64);
        assert_eq!(slots.overlapping(300, 520), vec![(256, 64), (512, 64)]);
        assert!(slots.overlapping(320, 512).is_empty());
        assert_eq!(slots.overlapping(0, 4096).len(), 3);
    }
}
