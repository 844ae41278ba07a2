use super::InvalidatedSlots;
use crate::region::Region;
use crate::remembered_set::RememberedSetKind;

/// Answers whether a recorded slot may be visited.
///
/// Built from a snapshot of one region's registry for one kind. A slot is
/// invalid iff it falls inside a registered object. Queries are expected in
/// ascending slot order, which lets the filter walk its ranges with a
/// cursor; an out-of-order query falls back to a binary search and gives
/// the same answer.
#[derive(Debug, Clone, Default)]
pub struct InvalidatedSlotsFilter {
    /// Registered objects as sorted, disjoint `[start, end)` ranges.
    ranges: Vec<(usize, usize)>,
    /// Index of the first range whose end is above the last query.
    cursor: usize,
}

impl InvalidatedSlotsFilter {
    /// Filter for the old-to-new remembered set of `region`.
    #[must_use]
    pub fn old_to_new(region: &Region) -> Self {
        Self::for_kind(region, RememberedSetKind::OldToNew)
    }

    /// Filter for the old-to-old remembered set of `region`.
    #[must_use]
    pub fn old_to_old(region: &Region) -> Self {
        Self::for_kind(region, RememberedSetKind::OldToOld)
    }

    /// Filter for `kind` on `region`.
    #[must_use]
    pub fn for_kind(region: &Region, kind: RememberedSetKind) -> Self {
        Self::from_registry(region.invalidated_slots(kind))
    }

    /// Filter over an explicit registry. `None` accepts every slot.
    #[must_use]
    pub fn from_registry(registry: Option<&InvalidatedSlots>) -> Self {
        let ranges = registry
            .map(|slots| {
                slots
                    .iter()
                    .map(|(start, size)| (start, start + size))
                    .collect()
            })
            .unwrap_or_default();
        Self { ranges, cursor: 0 }
    }

    /// Whether nothing is filtered out.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Whether the slot at `offset` may be visited.
    pub fn is_valid(&mut self, offset: usize) -> bool {
        if self.ranges.is_empty() {
            return true;
        }
        let mut index = self.cursor;
        if index > 0 && self.ranges[index - 1].1 > offset {
            // Query went backwards.
            index = self.ranges.partition_point(|&(_, end)| end <= offset);
        } else {
            index += self.ranges[index..].partition_point(|&(_, end)| end <= offset);
        }
        self.cursor = index;
        self.ranges
            .get(index)
            .is_none_or(|&(start, _)| offset < start)
    }

    /// Snapshot of the invalidated ranges, as `[start, end)`.
    #[must_use]
    pub fn invalidated_ranges(&self) -> &[(usize, usize)] {
        &self.ranges
    }
}
