//! Arena-relative addressing.
//!
//! Every heap address is a `(RegionId, offset)` pair. Region-scoped
//! structures (slot sets, invalidated-object registries) only ever see the
//! offset half, so all of their bookkeeping is plain integer arithmetic and
//! region bounds are ordinary range checks.

use std::fmt;

/// Size of a tagged reference slot in bytes.
pub const TAGGED_SIZE: usize = 8;

/// `log2(TAGGED_SIZE)`.
pub const TAGGED_SIZE_LOG2: u32 = TAGGED_SIZE.trailing_zeros();

/// Nominal size of a regular region (256KB).
pub const REGION_SIZE: usize = 256 * 1024;

/// Bytes reserved at the start of every region before the object area.
pub const REGION_HEADER_SIZE: usize = 256;

/// Index of a region in the heap's region table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionId(pub u32);

impl RegionId {
    /// The region table index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// A heap address: a byte offset inside a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address {
    /// Owning region.
    pub region: RegionId,
    /// Byte offset from the region base.
    pub offset: usize,
}

impl Address {
    /// Create an address.
    #[must_use]
    pub const fn new(region: RegionId, offset: usize) -> Self {
        Self { region, offset }
    }

    /// Address `bytes` further into the same region.
    #[must_use]
    pub const fn add(self, bytes: usize) -> Self {
        Self {
            region: self.region,
            offset: self.offset + bytes,
        }
    }

    /// Whether the offset is tagged-size aligned.
    #[must_use]
    pub const fn is_tagged_aligned(self) -> bool {
        self.offset % TAGGED_SIZE == 0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{:#x}", self.region, self.offset)
    }
}

/// Round `size` up to a multiple of [`TAGGED_SIZE`].
#[must_use]
pub const fn align_to_tagged(size: usize) -> usize {
    (size + TAGGED_SIZE - 1) & !(TAGGED_SIZE - 1)
}
