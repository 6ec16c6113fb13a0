use crate::{PAGE_SHIFT, PAGE_SIZE, VirtualAddress};
use core::fmt;

/// Base of a 4 KiB virtual page.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualPage(u32);

impl VirtualPage {
    /// The page containing `va` (aligns down).
    #[inline]
    #[must_use]
    pub const fn containing(va: VirtualAddress) -> Self {
        Self(va.as_u32() & !(PAGE_SIZE - 1))
    }

    /// The page with the given page number.
    #[inline]
    #[must_use]
    pub const fn from_number(number: u32) -> Self {
        Self(number << PAGE_SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress::new(self.0)
    }

    /// Page number (`base >> 12`).
    #[inline]
    #[must_use]
    pub const fn number(self) -> u32 {
        self.0 >> PAGE_SHIFT
    }

    /// The page `n` pages above this one, or `None` past 4 GiB.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, n: u32) -> Option<Self> {
        match self.number().checked_add(n) {
            Some(number) if number < (1 << (32 - PAGE_SHIFT)) => Some(Self::from_number(number)),
            _ => None,
        }
    }
}

impl fmt::Debug for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualPage(0x{:08X})", self.0)
    }
}

impl fmt::Display for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}/4K", self.0)
    }
}
