//! Shared helpers for integration tests.

#![allow(dead_code)]

use rudo_remset::{Heap, HeapConfig, HeapObject, Region, Space, TAGGED_SIZE};

/// A heap whose store buffer chunks hold `capacity` entries.
pub fn heap_with_buffer_capacity(capacity: usize) -> Heap {
    Heap::new(HeapConfig::default().with_store_buffer_chunk_capacity(capacity))
}

/// Allocate an array of `slots` tagged slots.
pub fn allocate_array(heap: &mut Heap, space: Space, slots: usize) -> HeapObject {
    heap.allocate(space, slots * TAGGED_SIZE)
}

/// Allocate `count` objects of `size` bytes back to back in a fresh old
/// region. The first object sits at the start of the region's object area.
pub fn allocate_consecutive(heap: &mut Heap, count: usize, size: usize) -> Vec<HeapObject> {
    assert_eq!(heap.region_count(), 0, "needs a fresh heap");
    let objects: Vec<HeapObject> = (0..count)
        .map(|_| heap.allocate(Space::Old, size))
        .collect();
    let region = region(heap, &objects[0]);
    assert_eq!(objects[0].start(), region.area_start());
    for pair in objects.windows(2) {
        assert_eq!(pair[0].end(), pair[1].start());
        assert_eq!(pair[0].region(), pair[1].region());
    }
    objects
}

/// The region holding `object`.
pub fn region<'a>(heap: &'a Heap, object: &HeapObject) -> &'a Region {
    heap.region(object.region())
        .expect("object belongs to a heap region")
}

/// Offsets of every tagged slot in `[start, end)`.
pub fn slot_offsets(start: usize, end: usize) -> impl Iterator<Item = usize> {
    (start..end).step_by(TAGGED_SIZE)
}
