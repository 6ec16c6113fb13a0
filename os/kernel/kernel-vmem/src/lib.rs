//! # Virtual Memory Support
//!
//! Two-level IA-32 paging (no PAE) for the kernel's address spaces.
//!
//! ## What you get
//! - 32-bit [`PageEntryBits`] with the hardware flag layout.
//! - 4 KiB-aligned [`PageDirectory`] and [`PageTable`] types with typed indices.
//! - A [`TablePool`] of frame-backed table slots from which every directory
//!   and page table is taken.
//! - An [`AddressSpace`] with map/unmap/query on top of the pool.
//! - The platform seams: [`FrameAlloc`] (where pool frames come from),
//!   [`PhysMapper`] (how a table frame is reached) and [`Mmu`] (CR3 and TLB).
//!
//! ## IA-32 Virtual Address → Physical Address Walk
//!
//! ```text
//! | 31‒22     | 21‒12 | 11‒0   |
//! | Directory | Table | Offset |
//!
//!  CR3 → PDE → PTE → 4 KiB page
//! ```
//!
//! ## Kernel half
//!
//! Directory slots `768..1024` (virtual `0xC000_0000` and up) are the kernel
//! half. The kernel space allocates every kernel-half page table up front,
//! and user spaces copy those directory entries verbatim. Since the tables
//! are never freed or replaced, a kernel mapping added through the kernel
//! space is immediately visible in every space.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod address_space;
mod page_entry_bits;
pub mod page_table;
mod table_pool;

extern crate alloc;

pub use crate::address_space::AddressSpace;
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::pd::{DirectoryIndex, PageDirectory, PdEntry};
pub use crate::page_table::pt::{PageTable, PtEntry, TableIndex};
pub use crate::table_pool::TablePool;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

/// Minimal frame allocator used to obtain **physical** 4 KiB frames
/// for page tables.
///
/// Returns `None` on out-of-memory. Frames handed out this way are owned by
/// the paging structures for good.
pub trait FrameAlloc {
    /// Allocate one 4 KiB *physical* frame for page tables.
    fn alloc_4k(&mut self) -> Option<PhysicalPage>;
}

/// Converts physical addresses to *temporarily* usable pointers in the current
/// virtual address space.
///
/// - **Kernel**: the low physical window is mapped at `KERNEL_BASE`; adds a
///   constant offset.
/// - **Tests / simulation**: backs each frame with host memory.
///
/// # Safety
/// - You must ensure `pa` is mapped as writable in the current page tables
///   for `&mut T`.
/// - Lifetime `'a` is purely borrow-checked; the mapping must remain valid
///   for `'a`.
/// - Type `T` must match the bytes at `pa` (no aliasing UB).
pub trait PhysMapper {
    /// Convert a *physical* address to a usable mutable reference in the current address space.
    ///
    /// # Safety
    /// See the trait documentation.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;
}

impl<M: PhysMapper + ?Sized> PhysMapper for &M {
    #[inline]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        unsafe { (**self).phys_to_mut(pa) }
    }
}

/// The memory-management unit of the executing CPU.
pub trait Mmu {
    /// Make the page directory in `directory` the active translation root
    /// (load CR3).
    fn load_directory(&self, directory: PhysicalPage);

    /// Drop any cached translation for the page containing `va` (`invlpg`).
    fn invalidate_page(&self, va: VirtualAddress);
}

impl<M: Mmu + ?Sized> Mmu for &M {
    #[inline]
    fn load_directory(&self, directory: PhysicalPage) {
        (**self).load_directory(directory);
    }

    #[inline]
    fn invalidate_page(&self, va: VirtualAddress) {
        (**self).invalidate_page(va);
    }
}

/// Borrow the page table stored in frame `page`.
///
/// # Safety
/// - `page` must be a table slot of the pool, reachable through `m`.
/// - No other reference to the same table may be live.
#[inline]
unsafe fn get_table<'a, M: PhysMapper>(m: &M, page: PhysicalPage) -> &'a mut PageTable {
    unsafe { m.phys_to_mut::<PageTable>(page.base()) }
}

/// Borrow the page directory stored in frame `page`.
///
/// # Safety
/// Same as [`get_table`].
#[inline]
unsafe fn get_directory<'a, M: PhysMapper>(m: &M, page: PhysicalPage) -> &'a mut PageDirectory {
    unsafe { m.phys_to_mut::<PageDirectory>(page.base()) }
}

/// Errors raised by paging operations.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmError {
    #[error("address {0} is not page aligned")]
    MisalignedVirtual(VirtualAddress),
    #[error("address {0} is not page aligned")]
    MisalignedPhysical(PhysicalAddress),
    #[error("address {0} lies in the kernel half and may only be changed through the kernel space")]
    KernelHalf(VirtualAddress),
    #[error("the page table pool is exhausted")]
    TablePoolExhausted,
    #[error("out of physical frames")]
    OutOfFrames,
    #[error("no free virtual range of {pages} pages")]
    NoVirtualSpace { pages: u32 },
    #[error("allocation size must be non-zero")]
    ZeroSize,
    #[error("unknown or destroyed address space")]
    UnknownSpace,
    #[error("too many address spaces")]
    TooManySpaces,
    #[error("the kernel address space cannot be destroyed")]
    KernelSpace,
}

impl VmError {
    /// `true` if the error reports a depleted resource rather than a bad
    /// argument.
    #[must_use]
    pub const fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::TablePoolExhausted
                | Self::OutOfFrames
                | Self::NoVirtualSpace { .. }
                | Self::TooManySpaces
        )
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use alloc::vec::Vec;
    use core::cell::UnsafeCell;

    /// A trivial **bump** allocator: always hands out the next 4 KiB frame.
    pub struct BumpAlloc {
        /// Next free frame index.
        next: u32,
        /// Exclusive end (bounds check).
        end: u32,
    }

    impl BumpAlloc {
        pub fn new(start: u32, end: u32) -> Self {
            Self { next: start, end }
        }
    }

    impl FrameAlloc for BumpAlloc {
        fn alloc_4k(&mut self) -> Option<PhysicalPage> {
            if self.next >= self.end {
                return None;
            }
            let p = self.next;
            self.next += 1;
            Some(PhysicalPage::from_index(p))
        }
    }

    /// A 4 KiB-aligned raw frame. We use this as our "physical RAM" backing store in tests.
    #[repr(align(4096))]
    struct Aligned4K(UnsafeCell<[u8; 4096]>);

    /// A tiny in-memory "RAM": physical address `n * 4096` is frame `n`.
    pub struct TestPhys {
        frames: Vec<Aligned4K>,
    }

    impl TestPhys {
        pub fn with_frames(n: usize) -> Self {
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(Aligned4K(UnsafeCell::new([0u8; 4096])));
            }
            Self { frames: v }
        }

        fn frame_mut_ptr(&self, idx: usize) -> *mut u8 {
            self.frames[idx].0.get().cast()
        }
    }

    impl PhysMapper for TestPhys {
        unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
            let idx = pa.page().index() as usize;
            debug_assert_eq!(pa.page_offset(), 0);
            unsafe { &mut *self.frame_mut_ptr(idx).cast::<T>() }
        }
    }
}
