//! Per-region remembered sets.
//!
//! Each region carries up to one [`SlotSet`] per [`RememberedSetKind`],
//! created on first insertion. [`RememberedSet`] is the typed entry point:
//! the kind is a type parameter, so code paths that only ever touch one
//! kind cannot mix them up.

use crate::region::Region;
use crate::slot_set::{EmptyBucketMode, SlotCallbackResult, SlotSet};
use std::fmt;
use std::marker::PhantomData;

/// Which inter-region references a remembered set records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RememberedSetKind {
    /// Old-generation slots that referenced a young object when recorded.
    OldToNew,
    /// Slots that referenced an evacuation candidate during marking.
    OldToOld,
}

impl RememberedSetKind {
    /// Every kind, in index order.
    pub const ALL: [Self; 2] = [Self::OldToNew, Self::OldToOld];

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::OldToNew => 0,
            Self::OldToOld => 1,
        }
    }
}

impl fmt::Display for RememberedSetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OldToNew => "old_to_new",
            Self::OldToOld => "old_to_old",
        })
    }
}

mod private {
    pub trait Sealed {}
    impl Sealed for super::OldToNew {}
    impl Sealed for super::OldToOld {}
}

/// Type-level [`RememberedSetKind`].
pub trait RememberedSetType: private::Sealed {
    /// The runtime kind.
    const KIND: RememberedSetKind;
}

/// Marker for [`RememberedSetKind::OldToNew`].
#[derive(Debug)]
pub enum OldToNew {}

/// Marker for [`RememberedSetKind::OldToOld`].
#[derive(Debug)]
pub enum OldToOld {}

impl RememberedSetType for OldToNew {
    const KIND: RememberedSetKind = RememberedSetKind::OldToNew;
}

impl RememberedSetType for OldToOld {
    const KIND: RememberedSetKind = RememberedSetKind::OldToOld;
}

/// Operations on one kind of remembered set of a region.
///
/// ```
/// use rudo_remset::{Generation, OldToNew, Region, RegionId, RememberedSet};
///
/// let mut region = Region::new(RegionId(0), 4096, Generation::Old, false);
/// assert!(RememberedSet::<OldToNew>::insert(&mut region, 512));
/// assert!(RememberedSet::<OldToNew>::contains(&region, 512));
/// assert_eq!(RememberedSet::<OldToNew>::len(&region), 1);
/// ```
pub struct RememberedSet<T: RememberedSetType>(PhantomData<T>);

impl<T: RememberedSetType> RememberedSet<T> {
    /// Record `offset` as a slot of `region`. Returns `false` if it was
    /// already recorded.
    pub fn insert(region: &mut Region, offset: usize) -> bool {
        debug_assert!(
            offset < region.size(),
            "slot {offset:#x} outside region {} of size {:#x}",
            region.id(),
            region.size()
        );
        region.slot_set_or_create(T::KIND).insert(offset)
    }

    /// Whether `offset` is recorded.
    #[must_use]
    pub fn contains(region: &Region, offset: usize) -> bool {
        region
            .slot_set(T::KIND)
            .is_some_and(|set| set.contains(offset))
    }

    /// Number of recorded slots.
    #[must_use]
    pub fn len(region: &Region) -> usize {
        region.slot_set(T::KIND).map_or(0, SlotSet::len)
    }

    /// Whether nothing is recorded.
    #[must_use]
    pub fn is_empty(region: &Region) -> bool {
        Self::len(region) == 0
    }

    /// Visit every recorded slot in ascending order, dropping those for
    /// which `callback` returns [`SlotCallbackResult::Remove`]. Returns the
    /// number kept.
    pub fn iterate<F>(region: &mut Region, callback: F, mode: EmptyBucketMode) -> usize
    where
        F: FnMut(usize) -> SlotCallbackResult,
    {
        region
            .slot_set_mut(T::KIND)
            .map_or(0, |set| set.iterate(callback, mode))
    }

    /// Forget every slot in `[start, end)`. Returns how many were removed.
    pub fn remove_range(region: &mut Region, start: usize, end: usize, mode: EmptyBucketMode) -> usize {
        region
            .slot_set_mut(T::KIND)
            .map_or(0, |set| set.remove_range(start, end, mode))
    }

    /// Drop the whole set.
    pub fn release(region: &mut Region) {
        region.take_slot_set(T::KIND);
    }
}
