//! Invalidated-object registry, filter and cleanup against a live heap.

mod common;

use common::{allocate_consecutive, region, slot_offsets};
use rudo_remset::{
    Heap, HeapObject, InvalidatedSlotsCleanup, InvalidatedSlotsFilter, OldToNew, OldToOld,
    RememberedSetKind,
};

const OBJECT_COUNT: usize = 8;
const OBJECT_SIZE: usize = 32;

fn marking_heap_with_objects(count: usize, size: usize) -> (Heap, Vec<HeapObject>) {
    let mut heap = Heap::default();
    let objects = allocate_consecutive(&mut heap, count, size);
    assert!(heap.start_incremental_marking());
    (heap, objects)
}

fn registry_len(heap: &Heap, object: &HeapObject, kind: RememberedSetKind) -> Option<usize> {
    region(heap, object).invalidated_slots(kind).map(|slots| slots.len())
}

#[test]
fn test_no_invalid_ranges() {
    let mut heap = Heap::default();
    let objects = allocate_consecutive(&mut heap, OBJECT_COUNT, OBJECT_SIZE);

    // Not marking: registration is a no-op.
    for &object in &objects {
        assert!(!heap.register_object_with_invalidated_slots::<OldToOld>(object));
    }

    let mut filter = InvalidatedSlotsFilter::old_to_old(region(&heap, &objects[0]));
    assert!(filter.is_empty());
    let end = objects[OBJECT_COUNT - 1].end();
    for offset in slot_offsets(objects[0].start(), end) {
        assert!(filter.is_valid(offset));
    }
}

#[test]
fn test_alternating_invalid_ranges() {
    let (mut heap, objects) = marking_heap_with_objects(OBJECT_COUNT, OBJECT_SIZE);
    for object in objects.iter().step_by(2) {
        assert!(heap.register_object_with_invalidated_slots::<OldToOld>(*object));
    }

    let mut filter = InvalidatedSlotsFilter::old_to_old(region(&heap, &objects[0]));
    for (i, object) in objects.iter().enumerate() {
        for offset in slot_offsets(object.start(), object.end()) {
            assert_eq!(
                filter.is_valid(offset),
                i % 2 == 1,
                "object {i} slot {offset:#x}"
            );
        }
    }
}

#[test]
fn test_all_invalid_ranges() {
    let (mut heap, objects) = marking_heap_with_objects(OBJECT_COUNT, OBJECT_SIZE);
    for &object in &objects {
        heap.register_object_with_invalidated_slots::<OldToOld>(object);
    }

    let mut filter = InvalidatedSlotsFilter::old_to_old(region(&heap, &objects[0]));
    let end = objects[OBJECT_COUNT - 1].end();
    for offset in slot_offsets(objects[0].start(), end) {
        assert!(!filter.is_valid(offset));
    }
    assert!(filter.is_valid(end));
}

#[test]
fn test_kinds_are_tracked_separately() {
    let (mut heap, objects) = marking_heap_with_objects(OBJECT_COUNT, OBJECT_SIZE);
    heap.register_object_with_invalidated_slots::<OldToNew>(objects[1]);

    let region = region(&heap, &objects[0]);
    let mut old_to_new = InvalidatedSlotsFilter::old_to_new(region);
    let mut old_to_old = InvalidatedSlotsFilter::old_to_old(region);
    assert!(!old_to_new.is_valid(objects[1].start()));
    assert!(old_to_old.is_valid(objects[1].start()));
}

#[test]
fn test_registration_is_idempotent() {
    let (mut once, objects) = marking_heap_with_objects(OBJECT_COUNT, OBJECT_SIZE);
    once.register_object_with_invalidated_slots::<OldToOld>(objects[3]);

    let (mut twice, _) = marking_heap_with_objects(OBJECT_COUNT, OBJECT_SIZE);
    twice.register_object_with_invalidated_slots::<OldToOld>(objects[3]);
    twice.register_object_with_invalidated_slots::<OldToOld>(objects[3]);

    let kind = RememberedSetKind::OldToOld;
    assert_eq!(
        region(&once, &objects[0]).invalidated_slots(kind),
        region(&twice, &objects[0]).invalidated_slots(kind)
    );
    assert_eq!(registry_len(&twice, &objects[0], kind), Some(1));
}

#[test]
fn test_evacuation_candidate_suppresses_registration() {
    let mut heap = Heap::default();
    let objects = allocate_consecutive(&mut heap, OBJECT_COUNT, OBJECT_SIZE);
    heap.mark_evacuation_candidate(objects[0].region());
    heap.start_incremental_marking();

    for &object in &objects {
        assert!(!heap.register_object_with_invalidated_slots::<OldToOld>(object));
        assert!(!heap.register_object_with_invalidated_slots::<OldToNew>(object));
    }

    let region = region(&heap, &objects[0]);
    assert!(region.invalidated_slots(RememberedSetKind::OldToOld).is_none());
    let mut filter = InvalidatedSlotsFilter::old_to_old(region);
    for offset in slot_offsets(objects[0].start(), objects[OBJECT_COUNT - 1].end()) {
        assert!(filter.is_valid(offset));
    }
    assert_eq!(heap.metrics().invalidations_registered(), 0);
    assert_eq!(heap.metrics().invalidations_skipped(), 2 * OBJECT_COUNT);
}

#[test]
fn test_reset_object_regression() {
    let (mut heap, mut objects) = marking_heap_with_objects(OBJECT_COUNT, 256);

    // Shrink the first object so it is smaller than the rest.
    let freed_tail = (objects[0].start() + 8, objects[0].end());
    objects[0] = heap.right_trim(objects[0], objects[0].size() - 8);
    assert_eq!(objects[0].size(), 8);

    for &object in &objects {
        heap.register_object_with_invalidated_slots::<OldToOld>(object);
    }

    let mut filter = InvalidatedSlotsFilter::old_to_old(region(&heap, &objects[0]));
    for object in &objects {
        for offset in slot_offsets(object.start(), object.end()) {
            assert!(!filter.is_valid(offset), "slot {offset:#x} must stay invalid");
        }
    }

    // The region was already swept, so the trimmed tail was reclaimed on
    // the spot.
    let mut filter = InvalidatedSlotsFilter::old_to_old(region(&heap, &objects[0]));
    for offset in slot_offsets(freed_tail.0, freed_tail.1) {
        assert!(filter.is_valid(offset));
    }
}

#[test]
fn test_cleanup_full_region() {
    let (mut heap, objects) = marking_heap_with_objects(OBJECT_COUNT, OBJECT_SIZE);
    for &object in &objects {
        heap.register_object_with_invalidated_slots::<OldToNew>(object);
    }
    assert_eq!(
        registry_len(&heap, &objects[0], RememberedSetKind::OldToNew),
        Some(OBJECT_COUNT)
    );

    let region = heap.region_mut(objects[0].region()).unwrap();
    let (start, end) = (region.area_start(), region.area_end());
    InvalidatedSlotsCleanup::old_to_new(region).free(start, end);

    assert_eq!(
        registry_len(&heap, &objects[0], RememberedSetKind::OldToNew),
        Some(0)
    );
    let mut filter = InvalidatedSlotsFilter::old_to_new(region_of(&heap, &objects));
    for offset in slot_offsets(start, objects[OBJECT_COUNT - 1].end()) {
        assert!(filter.is_valid(offset));
    }
}

fn region_of<'a>(heap: &'a Heap, objects: &[HeapObject]) -> &'a rudo_remset::Region {
    region(heap, &objects[0])
}

#[test]
fn test_cleanup_each_object_any_order() {
    let (mut heap, objects) = marking_heap_with_objects(OBJECT_COUNT, 64);
    for &object in &objects {
        heap.register_object_with_invalidated_slots::<OldToNew>(object);
    }

    let region = heap.region_mut(objects[0].region()).unwrap();
    let mut cleanup = InvalidatedSlotsCleanup::old_to_new(region);
    for &i in &[5, 0, 7, 2, 4, 1, 6, 3] {
        cleanup.free(objects[i].start(), objects[i].end());
    }
    assert_eq!(
        registry_len(&heap, &objects[0], RememberedSetKind::OldToNew),
        Some(0)
    );
}

#[test]
fn test_cleanup_right_trimmed_tail() {
    let (mut heap, objects) = marking_heap_with_objects(1, 256);
    let object = objects[0];
    heap.register_object_with_invalidated_slots::<OldToNew>(object);

    let live_end = object.start() + 64;
    let region = heap.region_mut(object.region()).unwrap();
    InvalidatedSlotsCleanup::old_to_new(region).free(live_end, object.end());

    let region = region_of(&heap, &objects);
    assert_eq!(
        region
            .invalidated_slots(RememberedSetKind::OldToNew)
            .and_then(|slots| slots.size_of(object.start())),
        Some(64)
    );
    let mut filter = InvalidatedSlotsFilter::old_to_new(region);
    for offset in slot_offsets(object.start(), object.end()) {
        assert_eq!(filter.is_valid(offset), offset >= live_end);
    }
}

#[test]
fn test_cleanup_outside_registered_ranges_keeps_entries() {
    let (mut heap, objects) = marking_heap_with_objects(OBJECT_COUNT, OBJECT_SIZE);
    for object in objects.iter().step_by(2) {
        heap.register_object_with_invalidated_slots::<OldToNew>(*object);
    }
    let before = registry_len(&heap, &objects[0], RememberedSetKind::OldToNew);
    assert_eq!(before, Some(OBJECT_COUNT / 2));

    let region = heap.region_mut(objects[0].region()).unwrap();
    let area_end = region.area_end();
    let mut cleanup = InvalidatedSlotsCleanup::old_to_new(region);
    for object in objects.iter().skip(1).step_by(2) {
        cleanup.free(object.start(), object.end());
    }
    cleanup.free(objects[OBJECT_COUNT - 1].end(), area_end);

    assert_eq!(
        registry_len(&heap, &objects[0], RememberedSetKind::OldToNew),
        before
    );
}

#[test]
fn test_cleanup_without_registry_is_noop() {
    let mut heap = Heap::default();
    let objects = allocate_consecutive(&mut heap, 2, OBJECT_SIZE);
    let region = heap.region_mut(objects[0].region()).unwrap();
    let (start, end) = (region.area_start(), region.area_end());
    let mut cleanup = InvalidatedSlotsCleanup::old_to_old(region);
    cleanup.free(start, end);
    cleanup.free(start, start);

    assert!(region_of(&heap, &objects)
        .invalidated_slots(RememberedSetKind::OldToOld)
        .is_none());
}
