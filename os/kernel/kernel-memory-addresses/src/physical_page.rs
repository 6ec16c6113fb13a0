use crate::{PAGE_SHIFT, PAGE_SIZE, PhysicalAddress};
use core::fmt;

/// Base of a 4 KiB physical frame.
///
/// ### Invariants
/// - The low 12 bits of the base are always zero.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let frame = PhysicalPage::from_index(3);
/// assert_eq!(frame.base().as_u32(), 0x3000);
/// assert_eq!(PhysicalPage::from_addr(PhysicalAddress::new(0x3fff)), frame);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage(u32);

impl PhysicalPage {
    /// The frame containing `pa` (aligns down).
    #[inline]
    #[must_use]
    pub const fn from_addr(pa: PhysicalAddress) -> Self {
        Self(pa.as_u32() & !(PAGE_SIZE - 1))
    }

    /// The frame with the given frame number.
    #[inline]
    #[must_use]
    pub const fn from_index(index: u32) -> Self {
        Self(index << PAGE_SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0)
    }

    /// Frame number (`base >> 12`).
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 >> PAGE_SHIFT
    }
}

impl fmt::Debug for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage(0x{:08X})", self.0)
    }
}

impl fmt::Display for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}/4K", self.0)
    }
}
