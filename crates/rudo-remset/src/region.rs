//! Heap regions.
//!
//! A region is a contiguous span of the heap with a fixed header followed by
//! an object area. It owns its remembered sets and invalidated-object
//! registries, and tracks the few pieces of collector state they depend on:
//! generation, evacuation candidacy and sweep progress.

use crate::address::{Address, RegionId, REGION_HEADER_SIZE, TAGGED_SIZE};
use crate::invalidated_slots::InvalidatedSlots;
use crate::marking::IncrementalMarking;
use crate::remembered_set::{RememberedSetKind, RememberedSetType};
use crate::slot_set::SlotSet;
use std::collections::BTreeMap;

/// Generation a region belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    /// Nursery or intermediate. Survivors are promoted after two minor
    /// collections.
    Young,
    /// Old generation.
    Old,
}

/// Progress of the sweeper over a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepState {
    /// Marking finished; dead objects not yet reclaimed.
    Pending,
    /// The sweeper is reclaiming this region.
    InProgress,
    /// All dead memory in the region has been reclaimed.
    Done,
}

/// Objects and reference fields of one region.
///
/// Object extents are keyed by start offset; fields map a slot offset to the
/// address stored there. Bytes not covered by an object are free.
#[derive(Debug, Clone, Default)]
pub struct ObjectLayout {
    objects: BTreeMap<usize, usize>,
    fields: BTreeMap<usize, Address>,
}

impl ObjectLayout {
    /// Number of live objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Size of the object starting at `start`.
    #[must_use]
    pub fn object_size(&self, start: usize) -> Option<usize> {
        self.objects.get(&start).copied()
    }

    /// The object containing `offset`, as `(start, size)`.
    #[must_use]
    pub fn object_containing(&self, offset: usize) -> Option<(usize, usize)> {
        self.objects
            .range(..=offset)
            .next_back()
            .filter(|&(&start, &size)| offset < start + size)
            .map(|(&start, &size)| (start, size))
    }

    /// Live objects as `(start, size)`, ascending.
    pub fn objects(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.objects.iter().map(|(&start, &size)| (start, size))
    }

    pub(crate) fn insert_object(&mut self, start: usize, size: usize) {
        debug_assert!(size > 0);
        debug_assert!(
            self.object_containing(start).is_none(),
            "object at {start:#x} overlaps a live object"
        );
        self.objects.insert(start, size);
    }

    pub(crate) fn remove_object(&mut self, start: usize) -> Option<usize> {
        self.objects.remove(&start)
    }

    /// Address stored in the slot at `offset`.
    #[must_use]
    pub fn field(&self, offset: usize) -> Option<Address> {
        self.fields.get(&offset).copied()
    }

    /// Reference fields in `[start, end)` as `(slot offset, target)`.
    pub fn fields_in(&self, start: usize, end: usize) -> impl Iterator<Item = (usize, Address)> + '_ {
        self.fields
            .range(start..end)
            .map(|(&offset, &target)| (offset, target))
    }

    pub(crate) fn set_field(&mut self, offset: usize, target: Option<Address>) {
        match target {
            Some(target) => {
                self.fields.insert(offset, target);
            }
            None => {
                self.fields.remove(&offset);
            }
        }
    }

    pub(crate) fn clear_fields(&mut self, start: usize, end: usize) {
        let doomed: Vec<usize> = self.fields.range(start..end).map(|(&k, _)| k).collect();
        for offset in doomed {
            self.fields.remove(&offset);
        }
    }

    /// Maximal `[start, end)` ranges of `[area_start, area_end)` not covered
    /// by a live object.
    #[must_use]
    pub fn free_ranges(&self, area_start: usize, area_end: usize) -> Vec<(usize, usize)> {
        let mut ranges = Vec::new();
        let mut cursor = area_start;
        for (&start, &size) in self.objects.range(area_start..area_end) {
            if start > cursor {
                ranges.push((cursor, start));
            }
            cursor = cursor.max(start + size);
        }
        if cursor < area_end {
            ranges.push((cursor, area_end));
        }
        ranges
    }
}

/// One region of the heap.
#[derive(Debug)]
pub struct Region {
    id: RegionId,
    size: usize,
    large: bool,
    generation: Generation,
    /// Minor collections survived while young.
    age: u8,
    evacuation_candidate: bool,
    sweep_state: SweepState,
    /// Bump allocation pointer.
    top: usize,
    slot_sets: [Option<SlotSet>; 2],
    invalidated_slots: [Option<InvalidatedSlots>; 2],
    layout: ObjectLayout,
}

impl Region {
    /// Create an empty region of `size` bytes, header included.
    #[must_use]
    pub fn new(id: RegionId, size: usize, generation: Generation, large: bool) -> Self {
        debug_assert!(size > REGION_HEADER_SIZE);
        debug_assert_eq!(size % TAGGED_SIZE, 0);
        Self {
            id,
            size,
            large,
            generation,
            age: 0,
            evacuation_candidate: false,
            sweep_state: SweepState::Done,
            top: REGION_HEADER_SIZE,
            slot_sets: [None, None],
            invalidated_slots: [None, None],
            layout: ObjectLayout::default(),
        }
    }

    /// Region id.
    #[must_use]
    pub const fn id(&self) -> RegionId {
        self.id
    }

    /// Region size in bytes, header included.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// First offset of the object area.
    #[must_use]
    pub const fn area_start(&self) -> usize {
        REGION_HEADER_SIZE
    }

    /// End of the object area.
    #[must_use]
    pub const fn area_end(&self) -> usize {
        self.size
    }

    /// Whether the region holds a single large object.
    #[must_use]
    pub const fn is_large(&self) -> bool {
        self.large
    }

    /// Current generation.
    #[must_use]
    pub const fn generation(&self) -> Generation {
        self.generation
    }

    /// Whether the region is in the young generation.
    #[must_use]
    pub const fn is_young(&self) -> bool {
        matches!(self.generation, Generation::Young)
    }

    /// Whether the region is in the old generation.
    #[must_use]
    pub const fn is_old(&self) -> bool {
        matches!(self.generation, Generation::Old)
    }

    /// Minor collections survived while young.
    #[must_use]
    pub const fn age(&self) -> u8 {
        self.age
    }

    pub(crate) fn set_age(&mut self, age: u8) {
        self.age = age;
    }

    pub(crate) fn promote(&mut self) {
        self.generation = Generation::Old;
        self.age = 0;
        self.sweep_state = SweepState::Done;
    }

    /// Whether the region is selected for evacuation.
    #[must_use]
    pub const fn is_evacuation_candidate(&self) -> bool {
        self.evacuation_candidate
    }

    /// Select the region for evacuation. Its invalidated-object registries
    /// are dropped; recorded slots inside a candidate are never visited.
    pub(crate) fn mark_evacuation_candidate(&mut self) {
        self.evacuation_candidate = true;
        self.invalidated_slots = [None, None];
    }

    pub(crate) fn clear_evacuation_candidate(&mut self) {
        self.evacuation_candidate = false;
    }

    /// Sweeper progress.
    #[must_use]
    pub const fn sweep_state(&self) -> SweepState {
        self.sweep_state
    }

    /// Whether the sweeper has finished with this region.
    #[must_use]
    pub const fn sweeping_done(&self) -> bool {
        matches!(self.sweep_state, SweepState::Done)
    }

    pub(crate) fn set_sweep_state(&mut self, state: SweepState) {
        self.sweep_state = state;
    }

    /// Whether `offset` lies inside the region.
    #[must_use]
    pub const fn contains_offset(&self, offset: usize) -> bool {
        offset < self.size
    }

    /// Bump-allocate `size` bytes, returning the object start.
    pub(crate) fn allocate(&mut self, size: usize) -> Option<usize> {
        let start = self.top;
        let end = start.checked_add(size)?;
        if end > self.area_end() {
            return None;
        }
        self.top = end;
        self.layout.insert_object(start, size);
        Some(start)
    }

    /// Objects and reference fields.
    #[must_use]
    pub const fn layout(&self) -> &ObjectLayout {
        &self.layout
    }

    pub(crate) fn layout_mut(&mut self) -> &mut ObjectLayout {
        &mut self.layout
    }

    /// The remembered set of `kind`, if one has been created.
    #[must_use]
    pub fn slot_set(&self, kind: RememberedSetKind) -> Option<&SlotSet> {
        self.slot_sets[kind.index()].as_ref()
    }

    pub(crate) fn slot_set_mut(&mut self, kind: RememberedSetKind) -> Option<&mut SlotSet> {
        self.slot_sets[kind.index()].as_mut()
    }

    pub(crate) fn slot_set_or_create(&mut self, kind: RememberedSetKind) -> &mut SlotSet {
        let size = self.size;
        self.slot_sets[kind.index()].get_or_insert_with(|| SlotSet::new(size))
    }

    pub(crate) fn take_slot_set(&mut self, kind: RememberedSetKind) -> Option<SlotSet> {
        self.slot_sets[kind.index()].take()
    }

    pub(crate) fn restore_slot_set(&mut self, kind: RememberedSetKind, set: SlotSet) {
        debug_assert!(self.slot_sets[kind.index()].is_none());
        if !set.is_empty() {
            self.slot_sets[kind.index()] = Some(set);
        }
    }

    /// The invalidated-object registry of `kind`, if one has been created.
    #[must_use]
    pub fn invalidated_slots(&self, kind: RememberedSetKind) -> Option<&InvalidatedSlots> {
        self.invalidated_slots[kind.index()].as_ref()
    }

    pub(crate) fn invalidated_slots_mut(
        &mut self,
        kind: RememberedSetKind,
    ) -> Option<&mut InvalidatedSlots> {
        self.invalidated_slots[kind.index()].as_mut()
    }

    /// Record the object `[start, start + size)` as having invalidated slots
    /// for remembered sets of kind `K`. Returns whether it was recorded.
    ///
    /// A no-op outside incremental marking, on evacuation candidates, and
    /// for old-to-new tracking on young regions.
    pub fn register_object_with_invalidated_slots<K: RememberedSetType>(
        &mut self,
        start: usize,
        size: usize,
        marking: &IncrementalMarking,
    ) -> bool {
        if !marking.is_active() || self.evacuation_candidate {
            return false;
        }
        if K::KIND == RememberedSetKind::OldToNew && self.is_young() {
            return false;
        }
        debug_assert!(
            start >= self.area_start() && start + size <= self.area_end(),
            "object {start:#x}+{size:#x} outside the area of region {}",
            self.id
        );
        self.invalidated_slots[K::KIND.index()]
            .get_or_insert_with(InvalidatedSlots::new)
            .register(start, size);
        true
    }

    /// Drop the registry of kind `K`.
    pub fn release_invalidated_slots<K: RememberedSetType>(&mut self) {
        self.invalidated_slots[K::KIND.index()] = None;
    }
}
