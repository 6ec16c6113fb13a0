//! # IA-32 Page Directory (PD)
//!
//! The top paging level, referenced by CR3.
//!
//! - [`DirectoryIndex`]: index type for VA bits `[31:22]`.
//! - [`PdEntry`]: a directory entry pointing at a [`PageTable`](super::pt::PageTable).
//! - [`PageDirectory`]: a 4 KiB-aligned array of 1024 PDEs.
//!
//! 4 MiB pages (`PS=1`) are not used; every present PDE points to a table.

use crate::PageEntryBits;
use kernel_memory_addresses::{ENTRIES_PER_TABLE, PhysicalPage, VirtualAddress};

/// Index into the Page Directory (derived from VA bits `[31:22]`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DirectoryIndex(u16);

/// A single Page Directory entry (PDE).
#[doc(alias = "PDE")]
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PdEntry(PageEntryBits);

/// The Page Directory: 1024 entries, 4 KiB-aligned.
#[doc(alias = "PD")]
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [PdEntry; ENTRIES_PER_TABLE],
}

impl DirectoryIndex {
    /// Build an index from a virtual address (extracts bits `[31:22]`).
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from(va: VirtualAddress) -> Self {
        Self::new(va.directory_index() as u16)
    }

    /// ### Debug assertions
    /// - Asserts `v < 1024` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!((v as usize) < ENTRIES_PER_TABLE);
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// First virtual address covered by this slot.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress::new((self.0 as u32) << 22)
    }
}

impl PdEntry {
    /// Create a zero (non-present) entry.
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(PageEntryBits::new())
    }

    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.0.present()
    }

    #[inline]
    #[must_use]
    pub const fn flags(self) -> PageEntryBits {
        self.0
    }

    /// If present, the physical frame of the page table this entry points to.
    #[inline]
    #[must_use]
    pub const fn next_table(self) -> Option<PhysicalPage> {
        if !self.is_present() {
            return None;
        }
        Some(PhysicalPage::from_addr(self.0.physical_address()))
    }

    /// Create an entry pointing at the page table in `table`.
    ///
    /// Forces `present=1` and `PS=0`.
    #[inline]
    #[must_use]
    pub const fn make_next(table: PhysicalPage, mut flags: PageEntryBits) -> Self {
        flags.set_large_page(false);
        flags.set_present(true);
        flags.set_physical_address(table.base());
        Self(flags)
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0.into_bits()
    }
}

impl PageDirectory {
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PdEntry::zero(); ENTRIES_PER_TABLE],
        }
    }

    /// Clear every entry in place.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PdEntry::zero());
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: DirectoryIndex) -> PdEntry {
        self.entries[i.as_usize()]
    }

    #[inline]
    pub const fn set(&mut self, i: DirectoryIndex, e: PdEntry) {
        self.entries[i.as_usize()] = e;
    }

    /// Borrow a contiguous range of entries.
    #[inline]
    #[must_use]
    pub fn entries(&self, range: core::ops::Range<usize>) -> &[PdEntry] {
        &self.entries[range]
    }

    /// Overwrite the entries starting at `start` with `src`.
    #[inline]
    pub fn copy_entries(&mut self, start: usize, src: &[PdEntry]) {
        self.entries[start..start + src.len()].copy_from_slice(src);
    }
}

const _: () = {
    assert!(size_of::<PageDirectory>() == 4096);
    assert!(align_of::<PageDirectory>() == 4096);
};

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pde_points_to_table() {
        let table = PhysicalPage::from_index(0x123);
        let e = PdEntry::make_next(table, PageEntryBits::user_rw());
        assert_eq!(e.next_table(), Some(table));
        assert_eq!(e.raw(), 0x0012_3007);
        assert_eq!(PdEntry::zero().next_table(), None);
    }

    #[test]
    fn slot_base() {
        assert_eq!(DirectoryIndex::new(768).base().as_u32(), 0xC000_0000);
        assert_eq!(DirectoryIndex::new(1).base().as_u32(), 0x0040_0000);
    }
}
