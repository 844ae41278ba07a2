use super::InvalidatedSlots;
use crate::region::Region;
use crate::remembered_set::RememberedSetKind;

/// Shrinks a region's invalidated-object registry as memory is reclaimed.
///
/// The sweeper calls [`free`](Self::free) for every reclaimed range. Entries
/// entirely inside the range are dropped; entries straddling an edge keep
/// only the part outside. Freeing the same range twice, or ranges in any
/// order, leaves the registry in the same state.
#[derive(Debug)]
pub struct InvalidatedSlotsCleanup<'a> {
    slots: Option<&'a mut InvalidatedSlots>,
}

impl<'a> InvalidatedSlotsCleanup<'a> {
    /// Cleanup of the old-to-new registry of `region`.
    pub fn old_to_new(region: &'a mut Region) -> Self {
        Self::for_kind(region, RememberedSetKind::OldToNew)
    }

    /// Cleanup of the old-to-old registry of `region`.
    pub fn old_to_old(region: &'a mut Region) -> Self {
        Self::for_kind(region, RememberedSetKind::OldToOld)
    }

    /// Cleanup of the `kind` registry of `region`. A no-op if the region has
    /// none.
    pub fn for_kind(region: &'a mut Region, kind: RememberedSetKind) -> Self {
        Self {
            slots: region.invalidated_slots_mut(kind),
        }
    }

    /// Cleanup over an explicit registry.
    pub fn new(slots: &'a mut InvalidatedSlots) -> Self {
        Self { slots: Some(slots) }
    }

    /// A cleanup that does nothing.
    #[must_use]
    pub const fn no_cleanup() -> Self {
        Self { slots: None }
    }

    /// Reclaim `[start, end)`.
    pub fn free(&mut self, start: usize, end: usize) {
        let Some(slots) = self.slots.as_deref_mut() else {
            return;
        };
        if start >= end {
            return;
        }
        for (object_start, size) in slots.overlapping(start, end) {
            let object_end = object_start + size;
            slots.remove(object_start);
            if object_start < start {
                slots.insert_unchecked(object_start, start - object_start);
            }
            if object_end > end {
                slots.insert_unchecked(end, object_end - end);
            }
        }
        slots.verify();
    }
}
