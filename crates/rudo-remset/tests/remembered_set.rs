//! Remembered-set maintenance across minor collections and the
//! old-to-old pointer-update pass.

mod common;

use common::{allocate_array, region};
use rudo_remset::{Address, Heap, HeapObject, OldToNew, OldToOld, RememberedSet, Space};

/// An old object in a region of its own, so it can be made a candidate.
fn isolated_old_object(heap: &mut Heap) -> HeapObject {
    let size = heap.config().large_object_threshold + 8;
    heap.allocate(Space::Old, size)
}

#[test]
fn test_update_pass_visits_slots_into_candidates() {
    let mut heap = Heap::default();
    let host = allocate_array(&mut heap, Space::Old, 16);
    let target = isolated_old_object(&mut heap);
    heap.mark_evacuation_candidate(target.region());
    heap.start_incremental_marking();

    for i in 0..4 {
        heap.write_field(host, i, Some(target));
    }
    assert_eq!(RememberedSet::<OldToOld>::len(region(&heap, &host)), 4);
    assert_eq!(heap.metrics().old_to_old_recorded(), 4);

    let mut visited = Vec::new();
    let count = heap.update_old_to_old_slots(|slot, to| visited.push((slot, to)));
    assert_eq!(count, 4);
    let expected: Vec<(Address, Address)> =
        (0..4).map(|i| (host.slot(i), target.address())).collect();
    assert_eq!(visited, expected);

    assert!(RememberedSet::<OldToOld>::is_empty(region(&heap, &host)));
    assert!(!region(&heap, &target).is_evacuation_candidate());
}

#[test]
fn test_update_pass_skips_invalidated_objects_and_revisits_them() {
    let mut heap = Heap::default();
    let rewritten = allocate_array(&mut heap, Space::Old, 8);
    let untouched = allocate_array(&mut heap, Space::Old, 8);
    let target = isolated_old_object(&mut heap);
    heap.mark_evacuation_candidate(target.region());
    heap.start_incremental_marking();

    heap.write_field(rewritten, 0, Some(target));
    heap.write_field(untouched, 0, Some(target));

    // In-place layout change: slot 0 now holds raw data and slot 3 a
    // fresh reference.
    heap.notify_object_layout_change(rewritten);
    heap.write_field(rewritten, 0, None);
    heap.write_field(rewritten, 3, Some(target));

    let mut visited = Vec::new();
    let count = heap.update_old_to_old_slots(|slot, _| visited.push(slot));
    visited.sort();

    assert_eq!(count, 2);
    assert_eq!(visited, vec![rewritten.slot(3), untouched.slot(0)]);
    assert_eq!(heap.metrics().slots_filtered(), 2);
}

#[test]
fn test_candidate_hosts_are_not_recorded() {
    let mut heap = Heap::default();
    let host = isolated_old_object(&mut heap);
    let target = isolated_old_object(&mut heap);
    heap.mark_evacuation_candidate(host.region());
    heap.mark_evacuation_candidate(target.region());
    heap.start_incremental_marking();

    heap.write_field(host, 0, Some(target));
    assert!(RememberedSet::<OldToOld>::is_empty(region(&heap, &host)));
    assert_eq!(heap.update_old_to_old_slots(|_, _| {}), 0);
}

#[test]
fn test_minor_collection_drops_promoted_targets() {
    let mut heap = Heap::default();
    let host = allocate_array(&mut heap, Space::Old, 4);
    let young = heap.allocate(Space::Young, 16);
    heap.write_field(host, 1, Some(young));

    heap.collect_minor();
    assert_eq!(RememberedSet::<OldToNew>::len(region(&heap, &host)), 1);

    // The target is still young during the scan, then promoted.
    let stats = heap.collect_minor();
    assert_eq!(stats.regions_promoted, 1);
    assert_eq!(RememberedSet::<OldToNew>::len(region(&heap, &host)), 1);
    assert!(!heap.in_young_generation(young.address()));

    heap.collect_minor();
    assert!(RememberedSet::<OldToNew>::is_empty(region(&heap, &host)));
}

#[test]
fn test_minor_collection_without_invalidations_filters_nothing() {
    let mut heap = Heap::default();
    let host = allocate_array(&mut heap, Space::Old, 32);
    for i in 0..32 {
        let young = heap.allocate(Space::Young, 16);
        heap.write_field(host, i, Some(young));
    }

    let stats = heap.collect_minor();
    assert_eq!(stats.slots_filtered, 0);
    assert_eq!(stats.slots_kept, 32);
    assert_eq!(heap.metrics().minor_collections(), 1);
}

#[test]
fn test_sweep_forgets_old_to_old_slots_of_dead_objects() {
    let mut heap = Heap::default();
    let host = allocate_array(&mut heap, Space::Old, 8);
    let target = isolated_old_object(&mut heap);
    heap.mark_evacuation_candidate(target.region());
    heap.start_incremental_marking();
    heap.write_field(host, 0, Some(target));
    heap.finish_incremental_marking();

    heap.kill(host);
    let outcome = heap.sweep_all();
    assert!(outcome.freed_ranges >= 1);
    assert!(RememberedSet::<OldToOld>::is_empty(region(&heap, &host)));
    assert_eq!(heap.update_old_to_old_slots(|_, _| {}), 0);
}
