//! # Kernel Memory Allocation and Address Space Management
//!
//! Everything that hands out memory: physical frames, address spaces,
//! page-granular `vmalloc` regions and the byte-granular kernel heap.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────┐   ┌─────────────────────────────┐
//! │  Kernel Heap ([`heap`])     │   │  vmalloc / vfree ([`vmm`])  │
//! │  • kmalloc / kfree          │   │  • page-granular, per space │
//! │  • first-fit free list      │   │  • first fit from USER_BASE │
//! └──────────────┬──────────────┘   └──────────────┬──────────────┘
//!                │ grows via                       │
//! ┌──────────────▼─────────────────────────────────▼──────────────┐
//! │               Virtual Memory Manager ([`vmm`])                │
//! │    • address spaces (create / switch / destroy)               │
//! │    • map / unmap / query with TLB invalidation                │
//! │    • owns the page-table pool                                 │
//! └──────────────┬──────────────────────────────┬─────────────────┘
//!                │                              │ tables reached through
//! ┌──────────────▼──────────────┐  ┌────────────▼──────────────────┐
//! │ Frame Allocator             │  │ Physical Mapper               │
//! │ ([`frame_alloc`])           │  │ ([`phys_mapper`])             │
//! │ • one bit per 4 KiB frame   │  │ • kernel window at KERNEL_BASE│
//! │ • single-owner Frame handles│  │ • host-backed simulated RAM   │
//! └─────────────────────────────┘  └───────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Physical Frame Allocator ([`frame_alloc`])
//! * Lowest free frame first, deterministic.
//! * [`frame_alloc::Frame`] handles cannot be cloned; freeing consumes them.
//! * Frames owned by paging structures or the heap for good are leaked.
//!
//! ### Virtual Memory Manager ([`vmm`])
//! * Address spaces live in a generation-checked [`arena::Arena`], so a
//!   destroyed space's id is never confused with a new one.
//! * Every user space shares the kernel half with the kernel space.
//! * `vmalloc` regions record their frames and are rolled back as a whole on
//!   failure.
//!
//! ### Kernel Heap ([`heap`])
//! * Lives in the kernel half, so it is visible in every address space.
//! * Out-of-band bookkeeping: `kfree` of a bogus pointer is harmless.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_alloc::frame_alloc::BitmapFrameAllocator;
//!
//! let mut frames = BitmapFrameAllocator::new(64);
//! frames.reserve(0..8);
//! let frame = frames.allocate_frame().unwrap();
//! assert_eq!(frame.page().index(), 8);
//! frames.free_frame(frame);
//! assert_eq!(frames.free_count(), 56);
//! ```
//!
//! ## Integration Points
//! * **kernel-vmem**: page tables, the table pool and [`AddressSpace`](kernel_vmem::AddressSpace).
//! * **kernel-info**: memory layout constants.
//! * **kernel**: owns one of each allocator inside its kernel state and
//!   runs every call in a critical section.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod arena;
pub mod frame_alloc;
pub mod free_list;
pub mod heap;
pub mod phys_mapper;
pub mod vmm;

#[cfg(test)]
pub(crate) mod test_support {
    use crate::phys_mapper::SimulatedRam;
    use core::cell::RefCell;
    use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress};
    use kernel_vmem::{Mmu, PhysMapper};

    /// Simulated RAM that also records MMU operations.
    #[derive(Default)]
    pub struct SimRam {
        ram: SimulatedRam,
        loads: RefCell<Vec<PhysicalPage>>,
        invalidations: RefCell<Vec<VirtualAddress>>,
    }

    impl SimRam {
        pub fn loads(&self) -> Vec<PhysicalPage> {
            self.loads.borrow().clone()
        }

        pub fn invalidations(&self) -> Vec<VirtualAddress> {
            self.invalidations.borrow().clone()
        }
    }

    impl PhysMapper for SimRam {
        unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
            unsafe { self.ram.phys_to_mut(pa) }
        }
    }

    impl Mmu for SimRam {
        fn load_directory(&self, directory: PhysicalPage) {
            self.loads.borrow_mut().push(directory);
        }

        fn invalidate_page(&self, va: VirtualAddress) {
            self.invalidations.borrow_mut().push(va);
        }
    }
}
