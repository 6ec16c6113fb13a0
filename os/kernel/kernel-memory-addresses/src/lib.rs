//! # Physical and Virtual Memory Address Types (IA-32)
//!
//! Strongly typed wrappers for raw 32-bit memory addresses and 4 KiB page
//! bases used by the frame allocator and the two-level paging code.
//!
//! ## Overview
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] / [`PhysicalPage`] | Physical memory (RAM frames, MMIO). |
//! | [`VirtualAddress`] / [`VirtualPage`] | Paging-translated addresses. |
//!
//! The wrappers are zero-cost `#[repr(transparent)]` newtypes over `u32`.
//! They exist so that a physical frame can never be passed where a virtual
//! page is expected (and vice versa) without an explicit conversion.
//!
//! ## Two-level split
//!
//! A 32-bit virtual address decomposes into:
//!
//! ```text
//! | 31‒22      | 21‒12   | 11‒0   |
//! | Directory  | Table   | Offset |
//! ```
//!
//! [`VirtualAddress::directory_index`] and [`VirtualAddress::table_index`]
//! extract the two 10-bit indices.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0xC010_2345);
//! assert_eq!(va.directory_index(), 0x300);
//! assert_eq!(va.table_index(), 0x102);
//! assert_eq!(va.page().base().as_u32(), 0xC010_2000);
//!
//! let pa = PhysicalAddress::new(0x0040_1000);
//! assert!(pa.is_page_aligned());
//! assert_eq!(pa.page().index(), 0x401);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod physical_address;
mod physical_page;
mod virtual_address;
mod virtual_page;

pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;
pub use virtual_address::VirtualAddress;
pub use virtual_page::VirtualPage;

/// Size of a page (and of a physical frame) in bytes.
pub const PAGE_SIZE: u32 = 4096;

/// `log2(PAGE_SIZE)`.
pub const PAGE_SHIFT: u32 = 12;

/// Number of entries in a page directory or a page table.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Bytes of virtual address space covered by one page table (4 MiB).
pub const TABLE_COVERAGE: u32 = PAGE_SIZE * ENTRIES_PER_TABLE as u32;

/// Align `x` down to the nearest multiple of `a` (a power of two).
#[inline]
#[must_use]
pub const fn align_down(x: u32, a: u32) -> u32 {
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a` (a power of two).
///
/// Returns `None` if the result does not fit into 32 bits.
#[inline]
#[must_use]
pub const fn checked_align_up(x: u32, a: u32) -> Option<u32> {
    match x.checked_add(a - 1) {
        Some(v) => Some(v & !(a - 1)),
        None => None,
    }
}

/// Number of whole pages needed to hold `bytes`.
#[inline]
#[must_use]
pub const fn pages_for(bytes: u32) -> u32 {
    bytes.div_ceil(PAGE_SIZE)
}

const _: () = {
    assert!(1 << PAGE_SHIFT == PAGE_SIZE);
    assert!(TABLE_COVERAGE == 4 * 1024 * 1024);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_helpers() {
        assert_eq!(align_down(0x1fff, PAGE_SIZE), 0x1000);
        assert_eq!(checked_align_up(0x1001, PAGE_SIZE), Some(0x2000));
        assert_eq!(checked_align_up(0x2000, PAGE_SIZE), Some(0x2000));
        assert_eq!(checked_align_up(u32::MAX, PAGE_SIZE), None);
    }

    #[test]
    fn pages_for_rounds_up() {
        assert_eq!(pages_for(0), 0);
        assert_eq!(pages_for(1), 1);
        assert_eq!(pages_for(4096), 1);
        assert_eq!(pages_for(8192), 2);
        assert_eq!(pages_for(8193), 3);
    }

    #[test]
    fn split_round_trip() {
        let va = VirtualAddress::new(0xDEAD_BEEF);
        let page = va.page();
        assert_eq!(page.base().as_u32() + va.page_offset(), va.as_u32());
        assert_eq!(
            (va.directory_index() << 22) | (va.table_index() << 12),
            page.base().as_u32() as usize
        );
    }
}
