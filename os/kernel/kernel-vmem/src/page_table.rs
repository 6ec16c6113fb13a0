//! # Paging Structures
//!
//! 32-bit paging uses two levels, each a 4 KiB table of 1024 four-byte
//! entries:
//!
//! ```text
//! CR3 → Page Directory (PDE) → Page Table (PTE) → 4 KiB page
//! ```

pub mod pd;
pub mod pt;

use crate::page_table::pd::DirectoryIndex;
use crate::page_table::pt::TableIndex;
use kernel_memory_addresses::VirtualAddress;

#[inline]
#[must_use]
pub const fn split_indices(va: VirtualAddress) -> (DirectoryIndex, TableIndex) {
    (DirectoryIndex::from(va), TableIndex::from(va))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_ok() {
        let (d, t) = split_indices(VirtualAddress::new(0xC040_3123));
        assert_eq!(d.as_usize(), 769);
        assert_eq!(t.as_usize(), 3);

        let (d, t) = split_indices(VirtualAddress::new(u32::MAX));
        assert_eq!(d.as_usize(), 1023);
        assert_eq!(t.as_usize(), 1023);
    }
}
