//! Region sweeping.
//!
//! Sweeping reclaims every byte of a region's object area not covered by a
//! live object. For each reclaimed range, both invalidated-object registries
//! are shrunk and both remembered sets forget the slots inside it.

use crate::invalidated_slots::InvalidatedSlotsCleanup;
use crate::region::{Region, SweepState};
use crate::remembered_set::{OldToNew, OldToOld, RememberedSet, RememberedSetKind};
use crate::slot_set::EmptyBucketMode;

/// What one sweep reclaimed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Maximal free ranges reclaimed.
    pub freed_ranges: usize,
    /// Total bytes in those ranges.
    pub freed_bytes: usize,
}

impl SweepOutcome {
    pub(crate) fn merge(&mut self, other: Self) {
        self.freed_ranges += other.freed_ranges;
        self.freed_bytes += other.freed_bytes;
    }
}

/// Sweep `region` to completion. Regions already swept are left alone.
pub(crate) fn sweep_region(region: &mut Region) -> SweepOutcome {
    if region.sweeping_done() {
        return SweepOutcome::default();
    }
    #[cfg(feature = "tracing")]
    let _span = crate::tracing::internal::trace_sweep_region(region.id());

    region.set_sweep_state(SweepState::InProgress);
    let ranges = region
        .layout()
        .free_ranges(region.area_start(), region.area_end());
    reclaim(region, &ranges);
    region.set_sweep_state(SweepState::Done);

    let outcome = SweepOutcome {
        freed_ranges: ranges.len(),
        freed_bytes: ranges.iter().map(|&(start, end)| end - start).sum(),
    };
    #[cfg(feature = "tracing")]
    crate::tracing::internal::log_region_swept(outcome.freed_ranges, outcome.freed_bytes);
    outcome
}

/// Release `ranges` of `region`: registries, remembered sets and slot
/// contents.
pub(crate) fn reclaim(region: &mut Region, ranges: &[(usize, usize)]) {
    for kind in RememberedSetKind::ALL {
        let mut cleanup = InvalidatedSlotsCleanup::for_kind(region, kind);
        for &(start, end) in ranges {
            cleanup.free(start, end);
        }
    }
    for &(start, end) in ranges {
        debug_assert!(
            start >= region.area_start() && end <= region.area_end(),
            "reclaimed range {start:#x}..{end:#x} outside region {}",
            region.id()
        );
        RememberedSet::<OldToNew>::remove_range(region, start, end, EmptyBucketMode::FreeEmptyBuckets);
        RememberedSet::<OldToOld>::remove_range(region, start, end, EmptyBucketMode::FreeEmptyBuckets);
        region.layout_mut().clear_fields(start, end);
    }
}
