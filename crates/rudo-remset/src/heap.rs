//! The heap driving the reference-tracking structures.
//!
//! `Heap` is a small region-based generational heap: bump allocation into a
//! nursery or an old-space region, tagged reference slots with a write
//! barrier, in-place trimming, incremental-marking phase control, region
//! sweeping, minor collection with aging and promotion, and the old-to-old
//! pointer-update pass of compaction. It exists to drive the store buffer,
//! remembered sets and invalidated-slot tracking the way a real collector
//! does; object payloads other than reference slots are not modelled.

use crate::address::{align_to_tagged, Address, RegionId, REGION_HEADER_SIZE, TAGGED_SIZE};
use crate::config::HeapConfig;
use crate::invalidated_slots::InvalidatedSlotsFilter;
use crate::marking::{IncrementalMarking, MarkPhase};
use crate::metrics::RemsetMetrics;
use crate::region::{Generation, Region, SweepState};
use crate::remembered_set::{OldToNew, OldToOld, RememberedSet, RememberedSetKind, RememberedSetType};
use crate::slot_set::{EmptyBucketMode, SlotCallbackResult};
use crate::store_buffer::{FlushKind, FlushStats, SharedStoreBuffer, StoreBuffer, StoreBufferSink};
use crate::sweeper::{self, SweepOutcome};
use std::sync::Arc;
use std::time::Instant;

#[cfg(feature = "tracing")]
use crate::tracing::internal::{
    log_invalidated_object, log_promotion, log_slots_filtered, log_store_buffer_flush,
    next_collection_id, trace_minor_collection, trace_pointer_update,
};

/// Minor collections a young region survives before promotion.
const PROMOTION_AGE: u8 = 2;

/// Where to allocate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space {
    /// The nursery.
    Young,
    /// Old space.
    Old,
}

impl Space {
    const fn generation(self) -> Generation {
        match self {
            Self::Young => Generation::Young,
            Self::Old => Generation::Old,
        }
    }
}

/// An allocated object: its start address and byte size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapObject {
    address: Address,
    size: usize,
}

impl HeapObject {
    /// Start address.
    #[must_use]
    pub const fn address(self) -> Address {
        self.address
    }

    /// Owning region.
    #[must_use]
    pub const fn region(self) -> RegionId {
        self.address.region
    }

    /// Start offset within the region.
    #[must_use]
    pub const fn start(self) -> usize {
        self.address.offset
    }

    /// Size in bytes.
    #[must_use]
    pub const fn size(self) -> usize {
        self.size
    }

    /// End offset within the region, exclusive.
    #[must_use]
    pub const fn end(self) -> usize {
        self.address.offset + self.size
    }

    /// Number of tagged slots.
    #[must_use]
    pub const fn slot_count(self) -> usize {
        self.size / TAGGED_SIZE
    }

    /// Address of the `index`-th slot.
    #[must_use]
    pub fn slot(self, index: usize) -> Address {
        debug_assert!(
            index < self.slot_count(),
            "slot {index} out of bounds for object of {} slots",
            self.slot_count()
        );
        self.address.add(index * TAGGED_SIZE)
    }
}

/// Outcome of one minor collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MinorCollectionStats {
    /// Store-buffer flush performed on entry.
    pub flush: FlushStats,
    /// Old-to-new slots kept after the scan.
    pub slots_kept: usize,
    /// Slots dropped because they lay inside an invalidated object.
    pub slots_filtered: usize,
    /// Regions promoted to the old generation.
    pub regions_promoted: usize,
}

/// Region table. Region ids are indices and are never reused.
#[derive(Debug, Default)]
struct Regions {
    regions: Vec<Region>,
}

impl Regions {
    fn get(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(id.index())
    }

    fn get_mut(&mut self, id: RegionId) -> Option<&mut Region> {
        self.regions.get_mut(id.index())
    }

    fn add(&mut self, size: usize, generation: Generation, large: bool) -> RegionId {
        let id = RegionId(u32::try_from(self.regions.len()).unwrap_or(u32::MAX));
        self.regions.push(Region::new(id, size, generation, large));
        id
    }

    fn is_young(&self, address: Address) -> bool {
        self.get(address.region).is_some_and(Region::is_young)
    }

    fn young_flags(&self) -> Vec<bool> {
        self.regions.iter().map(Region::is_young).collect()
    }

    fn candidate_flags(&self) -> Vec<bool> {
        self.regions
            .iter()
            .map(Region::is_evacuation_candidate)
            .collect()
    }
}

impl StoreBufferSink for Regions {
    fn record_old_to_new(&mut self, slot: Address) -> bool {
        let Some(host) = self.get(slot.region) else {
            return false;
        };
        if !host.is_old() {
            return false;
        }
        let still_young = host
            .layout()
            .field(slot.offset)
            .is_some_and(|target| self.is_young(target));
        if !still_young {
            return false;
        }
        self.get_mut(slot.region)
            .is_some_and(|host| RememberedSet::<OldToNew>::insert(host, slot.offset))
    }
}

/// A generational, region-based heap.
///
/// ```
/// use rudo_remset::{Heap, OldToNew, RememberedSet, Space};
///
/// let mut heap = Heap::default();
/// let holder = heap.allocate(Space::Old, 64);
/// let young = heap.allocate(Space::Young, 16);
///
/// heap.write_field(holder, 0, Some(young));
/// assert!(!heap.store_buffer().is_empty());
///
/// heap.collect_minor();
/// let region = heap.region(holder.region()).unwrap();
/// assert!(RememberedSet::<OldToNew>::contains(region, holder.start()));
/// ```
#[derive(Debug)]
pub struct Heap {
    config: HeapConfig,
    regions: Regions,
    store_buffer: StoreBuffer,
    shared_store_buffer: Arc<SharedStoreBuffer>,
    marking: IncrementalMarking,
    nursery: Option<RegionId>,
    old_space: Option<RegionId>,
    metrics: RemsetMetrics,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(HeapConfig::default())
    }
}

impl Heap {
    /// Create an empty heap.
    #[must_use]
    pub fn new(config: HeapConfig) -> Self {
        config.debug_validate();
        Self {
            config,
            regions: Regions::default(),
            store_buffer: StoreBuffer::new(config.store_buffer_chunk_capacity),
            shared_store_buffer: Arc::new(SharedStoreBuffer::new()),
            marking: IncrementalMarking::new(),
            nursery: None,
            old_space: None,
            metrics: RemsetMetrics::new(),
        }
    }

    /// Heap configuration.
    #[must_use]
    pub const fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Cumulative counters.
    #[must_use]
    pub const fn metrics(&self) -> &RemsetMetrics {
        &self.metrics
    }

    /// Incremental marking state.
    #[must_use]
    pub const fn marking(&self) -> &IncrementalMarking {
        &self.marking
    }

    /// The heap-wide store buffer.
    #[must_use]
    pub const fn store_buffer(&self) -> &StoreBuffer {
        &self.store_buffer
    }

    /// Handle other threads can push barrier entries into.
    #[must_use]
    pub fn shared_store_buffer(&self) -> Arc<SharedStoreBuffer> {
        Arc::clone(&self.shared_store_buffer)
    }

    /// Region `id`, if it exists.
    #[must_use]
    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(id)
    }

    /// Mutable access for collaborators that run their own cleanup or
    /// remembered-set passes over a region.
    pub fn region_mut(&mut self, id: RegionId) -> Option<&mut Region> {
        self.regions.get_mut(id)
    }

    /// All regions in id order.
    pub fn regions(&self) -> impl Iterator<Item = &Region> + '_ {
        self.regions.regions.iter()
    }

    /// Number of regions ever created.
    #[must_use]
    pub fn region_count(&self) -> usize {
        self.regions.regions.len()
    }

    /// Whether `address` lies in a young region.
    #[must_use]
    pub fn in_young_generation(&self, address: Address) -> bool {
        self.regions.is_young(address)
    }

    /// The live object starting at `address`.
    #[must_use]
    pub fn object_at(&self, address: Address) -> Option<HeapObject> {
        let size = self
            .regions
            .get(address.region)?
            .layout()
            .object_size(address.offset)?;
        Some(HeapObject { address, size })
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    /// Allocate an object of at least `size` bytes in `space`.
    pub fn allocate(&mut self, space: Space, size: usize) -> HeapObject {
        let size = align_to_tagged(size.max(TAGGED_SIZE));
        if size > self.config.large_object_threshold || size > self.config.region_area_size() {
            return self.allocate_large(space, size);
        }

        let current = match space {
            Space::Young => self.nursery,
            Space::Old => self.old_space,
        };
        if let Some(id) = current {
            if let Some(start) = self.regions.get_mut(id).and_then(|r| r.allocate(size)) {
                return HeapObject {
                    address: Address::new(id, start),
                    size,
                };
            }
        }

        let id = self
            .regions
            .add(self.config.region_size, space.generation(), false);
        match space {
            Space::Young => self.nursery = Some(id),
            Space::Old => self.old_space = Some(id),
        }
        let start = self
            .regions
            .get_mut(id)
            .and_then(|r| r.allocate(size))
            .unwrap_or_else(|| unreachable!("fresh region cannot hold {size} bytes"));
        HeapObject {
            address: Address::new(id, start),
            size,
        }
    }

    fn allocate_large(&mut self, space: Space, size: usize) -> HeapObject {
        let id = self
            .regions
            .add(REGION_HEADER_SIZE + size, space.generation(), true);
        let start = self
            .regions
            .get_mut(id)
            .and_then(|r| r.allocate(size))
            .unwrap_or_else(|| unreachable!("large region sized for its object"));
        HeapObject {
            address: Address::new(id, start),
            size,
        }
    }

    // ------------------------------------------------------------------
    // Slots and the write barrier
    // ------------------------------------------------------------------

    /// Store `value` into slot `index` of `host`, or clear it.
    pub fn write_field(&mut self, host: HeapObject, index: usize, value: Option<HeapObject>) {
        let slot = host.slot(index);
        let target = value.map(HeapObject::address);
        let Some(region) = self.regions.get_mut(slot.region) else {
            debug_assert!(false, "write to unknown region {}", slot.region);
            return;
        };
        region.layout_mut().set_field(slot.offset, target);
        if let Some(target) = target {
            self.write_barrier(slot, target);
        }
    }

    /// The reference stored in slot `index` of `host`.
    #[must_use]
    pub fn read_field(&self, host: HeapObject, index: usize) -> Option<Address> {
        let slot = host.slot(index);
        self.regions.get(slot.region)?.layout().field(slot.offset)
    }

    fn write_barrier(&mut self, slot: Address, target: Address) {
        let (Some(host), Some(target_region)) =
            (self.regions.get(slot.region), self.regions.get(target.region))
        else {
            return;
        };
        let old_to_new = host.is_old() && target_region.is_young();
        let old_to_old = host.is_old()
            && target_region.is_evacuation_candidate()
            && !host.is_evacuation_candidate();

        if old_to_new {
            self.metrics.record_store_buffer_inserts(1);
            if let Some(stats) = self.store_buffer.insert(slot, &mut self.regions) {
                self.metrics.record_store_buffer_overflows(1);
                self.metrics.record_old_to_new(stats.recorded);
                #[cfg(feature = "tracing")]
                log_store_buffer_flush(true, stats.captured, stats.recorded);
            }
        } else if old_to_old && self.marking.is_active() {
            if let Some(host) = self.regions.get_mut(slot.region) {
                if RememberedSet::<OldToOld>::insert(host, slot.offset) {
                    self.metrics.record_old_to_old(1);
                }
            }
        }
    }

    /// Move barrier entries pushed by other threads into the store buffer.
    /// Returns how many were moved.
    pub fn merge_shared_store_buffer(&mut self) -> usize {
        let drained = self
            .shared_store_buffer
            .drain_into(&mut self.store_buffer, &mut self.regions);
        self.metrics.record_store_buffer_inserts(drained.moved);
        if drained.overflow_flushes > 0 {
            self.metrics.record_store_buffer_overflows(drained.overflow_flushes);
            self.metrics.record_old_to_new(drained.recorded);
            #[cfg(feature = "tracing")]
            log_store_buffer_flush(true, drained.moved, drained.recorded);
        }
        drained.moved
    }

    // ------------------------------------------------------------------
    // Mutation hooks
    // ------------------------------------------------------------------

    /// Record `object` as having invalidated slots for kind `K`.
    pub fn register_object_with_invalidated_slots<K: RememberedSetType>(
        &mut self,
        object: HeapObject,
    ) -> bool {
        let Some(region) = self.regions.get_mut(object.region()) else {
            return false;
        };
        let recorded = region.register_object_with_invalidated_slots::<K>(
            object.start(),
            object.size(),
            &self.marking,
        );
        if recorded {
            self.metrics.record_invalidation(1);
            #[cfg(feature = "tracing")]
            log_invalidated_object(
                object.region(),
                object.start(),
                object.size(),
                &K::KIND.to_string(),
            );
        } else {
            self.metrics.record_invalidation_skipped(1);
        }
        recorded
    }

    /// Announce that `object` changed layout in place, so slots recorded
    /// inside it can no longer be trusted.
    pub fn notify_object_layout_change(&mut self, object: HeapObject) {
        self.register_object_with_invalidated_slots::<OldToNew>(object);
        self.register_object_with_invalidated_slots::<OldToOld>(object);
    }

    /// Shrink `object` by `bytes` from its end.
    pub fn right_trim(&mut self, object: HeapObject, bytes: usize) -> HeapObject {
        let trimmed = HeapObject {
            address: object.address,
            size: object.size - bytes,
        };
        self.trim(object, trimmed, (trimmed.end(), object.end()))
    }

    /// Shrink `object` by `bytes` from its start.
    pub fn left_trim(&mut self, object: HeapObject, bytes: usize) -> HeapObject {
        let trimmed = HeapObject {
            address: object.address.add(bytes),
            size: object.size - bytes,
        };
        self.trim(object, trimmed, (object.start(), trimmed.start()))
    }

    fn trim(
        &mut self,
        object: HeapObject,
        trimmed: HeapObject,
        (free_start, free_end): (usize, usize),
    ) -> HeapObject {
        debug_assert_eq!((free_end - free_start) % TAGGED_SIZE, 0);
        debug_assert!(trimmed.size > 0, "trimmed {object:?} to nothing");

        self.notify_object_layout_change(object);

        let Some(region) = self.regions.get_mut(object.region()) else {
            return object;
        };
        let layout = region.layout_mut();
        layout.remove_object(object.start());
        layout.insert_object(trimmed.start(), trimmed.size());
        layout.clear_fields(free_start, free_end);
        RememberedSet::<OldToNew>::remove_range(
            region,
            free_start,
            free_end,
            EmptyBucketMode::KeepEmptyBuckets,
        );
        if region.sweeping_done() {
            sweeper::reclaim(region, &[(free_start, free_end)]);
        }
        trimmed
    }

    // ------------------------------------------------------------------
    // Marking and compaction driver
    // ------------------------------------------------------------------

    /// Begin an incremental marking cycle. Returns `false` if one is
    /// already running or sweeping from the last one is unfinished.
    pub fn start_incremental_marking(&mut self) -> bool {
        self.marking.transition_to(MarkPhase::Marking)
    }

    /// Finish the marking cycle. Every old region becomes sweep-pending.
    pub fn finish_incremental_marking(&mut self) -> bool {
        if self.marking.phase() == MarkPhase::Marking
            && !self.marking.transition_to(MarkPhase::FinalMark)
        {
            return false;
        }
        if !self.marking.transition_to(MarkPhase::Sweeping) {
            return false;
        }
        for region in self.regions.regions.iter_mut().filter(|r| r.is_old()) {
            region.set_sweep_state(SweepState::Pending);
        }
        true
    }

    /// Select `id` for evacuation.
    pub fn mark_evacuation_candidate(&mut self, id: RegionId) {
        if let Some(region) = self.regions.get_mut(id) {
            region.mark_evacuation_candidate();
        }
    }

    /// Mark `object` dead. Its memory is reclaimed when its region is swept.
    pub fn kill(&mut self, object: HeapObject) {
        if let Some(region) = self.regions.get_mut(object.region()) {
            let removed = region.layout_mut().remove_object(object.start());
            debug_assert_eq!(removed, Some(object.size()), "{object:?} is not live");
        }
    }

    /// Hand every recorded old-to-old slot that still references an
    /// evacuation candidate to `visitor` as `(slot, target)`, then drop the
    /// old-to-old sets and registries and clear the candidate flags.
    /// Returns the number of slots visited.
    pub fn update_old_to_old_slots<F>(&mut self, mut visitor: F) -> usize
    where
        F: FnMut(Address, Address),
    {
        #[cfg(feature = "tracing")]
        let _span = trace_pointer_update(next_collection_id());

        let candidates = self.regions.candidate_flags();
        let is_candidate =
            |target: Address| candidates.get(target.region.index()).copied().unwrap_or(false);
        let mut visited = 0;
        let mut filtered = 0;

        for region in &mut self.regions.regions {
            if region.is_evacuation_candidate() {
                RememberedSet::<OldToOld>::release(region);
                region.release_invalidated_slots::<OldToOld>();
                continue;
            }
            let mut filter = InvalidatedSlotsFilter::old_to_old(region);
            if let Some(mut set) = region.take_slot_set(RememberedSetKind::OldToOld) {
                let layout = region.layout();
                set.iterate(
                    |offset| {
                        if !filter.is_valid(offset) {
                            filtered += 1;
                            return SlotCallbackResult::Remove;
                        }
                        if let Some(target) = layout.field(offset).filter(|&t| is_candidate(t)) {
                            visitor(Address::new(region.id(), offset), target);
                            visited += 1;
                        }
                        SlotCallbackResult::Remove
                    },
                    EmptyBucketMode::FreeEmptyBuckets,
                );
            }
            for &(start, end) in filter.invalidated_ranges() {
                for (offset, target) in region.layout().fields_in(start, end) {
                    if is_candidate(target) {
                        visitor(Address::new(region.id(), offset), target);
                        visited += 1;
                    }
                }
            }
            region.release_invalidated_slots::<OldToOld>();
        }

        for region in &mut self.regions.regions {
            region.clear_evacuation_candidate();
        }
        self.metrics.record_slots_filtered(filtered);
        visited
    }

    // ------------------------------------------------------------------
    // Sweeping
    // ------------------------------------------------------------------

    /// Sweep region `id` if it is pending.
    pub fn sweep_region(&mut self, id: RegionId) -> SweepOutcome {
        let Some(region) = self.regions.get_mut(id) else {
            return SweepOutcome::default();
        };
        let was_done = region.sweeping_done();
        let outcome = sweeper::sweep_region(region);
        if !was_done {
            self.metrics.record_regions_swept(1);
        }
        self.finish_sweeping_if_done();
        outcome
    }

    /// Make sure region `id` is fully swept.
    pub fn ensure_swept(&mut self, id: RegionId) {
        self.sweep_region(id);
    }

    /// Sweep every pending region.
    pub fn sweep_all(&mut self) -> SweepOutcome {
        let mut total = SweepOutcome::default();
        let mut swept = 0;
        for region in &mut self.regions.regions {
            if !region.sweeping_done() {
                total.merge(sweeper::sweep_region(region));
                swept += 1;
            }
        }
        self.metrics.record_regions_swept(swept);
        self.finish_sweeping_if_done();
        total
    }

    fn finish_sweeping_if_done(&self) {
        if self.marking.phase() == MarkPhase::Sweeping
            && self.regions.regions.iter().all(Region::sweeping_done)
        {
            self.marking.transition_to(MarkPhase::Idle);
        }
    }

    // ------------------------------------------------------------------
    // Minor collection
    // ------------------------------------------------------------------

    /// Run a minor collection.
    ///
    /// Drains the store buffer into the old-to-new remembered sets, scans
    /// them through the invalidated-slots filter, then ages the young
    /// generation.
    pub fn collect_minor(&mut self) -> MinorCollectionStats {
        #[cfg(feature = "tracing")]
        let _span = trace_minor_collection(next_collection_id());
        let started = Instant::now();

        self.merge_shared_store_buffer();
        let flush = self.store_buffer.flush(&mut self.regions, FlushKind::Normal);
        self.metrics.record_store_buffer_flushes(1);
        self.metrics.record_old_to_new(flush.recorded);
        #[cfg(feature = "tracing")]
        log_store_buffer_flush(false, flush.captured, flush.recorded);

        let mut stats = MinorCollectionStats {
            flush,
            ..MinorCollectionStats::default()
        };
        self.scan_old_to_new(&mut stats);
        self.age_young_regions(&mut stats);

        self.metrics.record_slots_filtered(stats.slots_filtered);
        self.metrics.record_minor_collection(1);
        self.metrics.record_minor_pause(started.elapsed());
        stats
    }

    fn scan_old_to_new(&mut self, stats: &mut MinorCollectionStats) {
        let young = self.regions.young_flags();
        let is_young = |target: Address| young.get(target.region.index()).copied().unwrap_or(false);

        for region in self.regions.regions.iter_mut().filter(|r| r.is_old()) {
            let mut filter = InvalidatedSlotsFilter::old_to_new(region);
            let mut filtered = 0;
            let mut set = region.take_slot_set(RememberedSetKind::OldToNew);
            if let Some(set) = set.as_mut() {
                let layout = region.layout();
                set.iterate(
                    |offset| {
                        if !filter.is_valid(offset) {
                            filtered += 1;
                            return SlotCallbackResult::Remove;
                        }
                        if layout.field(offset).is_some_and(is_young) {
                            SlotCallbackResult::Keep
                        } else {
                            SlotCallbackResult::Remove
                        }
                    },
                    EmptyBucketMode::FreeEmptyBuckets,
                );
            }

            let layout = region.layout();
            let rescued: Vec<usize> = filter
                .invalidated_ranges()
                .iter()
                .flat_map(|&(start, end)| layout.fields_in(start, end))
                .filter(|&(_, target)| is_young(target))
                .map(|(offset, _)| offset)
                .collect();
            if let Some(set) = set {
                region.restore_slot_set(RememberedSetKind::OldToNew, set);
            }
            for offset in rescued {
                RememberedSet::<OldToNew>::insert(region, offset);
            }
            region.release_invalidated_slots::<OldToNew>();

            let kept = RememberedSet::<OldToNew>::len(region);
            #[cfg(feature = "tracing")]
            log_slots_filtered(region.id(), filtered, kept);
            stats.slots_filtered += filtered;
            stats.slots_kept += kept;
        }
    }

    fn age_young_regions(&mut self, stats: &mut MinorCollectionStats) {
        let mut promoted = Vec::new();
        for region in self.regions.regions.iter_mut().filter(|r| r.is_young()) {
            let age = region.age() + 1;
            if age >= PROMOTION_AGE {
                region.promote();
                promoted.push(region.id());
            } else {
                region.set_age(age);
            }
        }
        self.nursery = None;

        let young = self.regions.young_flags();
        for id in promoted {
            let Some(region) = self.regions.get_mut(id) else {
                continue;
            };
            let young_slots: Vec<usize> = region
                .layout()
                .fields_in(0, region.size())
                .filter(|&(_, target)| young.get(target.region.index()).copied().unwrap_or(false))
                .map(|(offset, _)| offset)
                .collect();
            for &offset in &young_slots {
                RememberedSet::<OldToNew>::insert(region, offset);
            }
            self.metrics.record_old_to_new(young_slots.len());
            #[cfg(feature = "tracing")]
            log_promotion(id, young_slots.len());
            stats.regions_promoted += 1;
        }
    }
}
