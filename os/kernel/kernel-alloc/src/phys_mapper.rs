//! # Reaching Physical Frames
//!
//! Two [`PhysMapper`]s:
//!
//! - [`KernelWindowMapper`]: on the machine. The boot code maps the first
//!   frames of physical memory (the kernel image window) at `KERNEL_BASE`, so
//!   a frame inside the window is reachable at `KERNEL_BASE + pa`.
//! - [`SimulatedRam`]: hosted. Every frame is backed by a lazily allocated,
//!   zero-filled, page-aligned block of host memory.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use core::cell::RefCell;
use core::ptr::NonNull;
use kernel_info::memory::KERNEL_BASE;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress};
use kernel_vmem::PhysMapper;

/// [`PhysMapper`] for the physical window mapped at `KERNEL_BASE`.
///
/// # Safety
/// Only frames below `window_end` are mapped; the window must stay mapped
/// (it is part of the kernel half) for as long as the mapper is used.
#[derive(Debug, Copy, Clone)]
pub struct KernelWindowMapper {
    window_end: PhysicalAddress,
}

impl KernelWindowMapper {
    /// A mapper for physical memory `[0, window_frames * 4096)`.
    #[must_use]
    pub const fn new(window_frames: u32) -> Self {
        Self {
            window_end: PhysicalAddress::new(window_frames.saturating_mul(PAGE_SIZE)),
        }
    }

    #[must_use]
    pub const fn window_end(&self) -> PhysicalAddress {
        self.window_end
    }

    /// `true` if `pa` can be reached through the window.
    #[must_use]
    pub const fn covers(&self, pa: PhysicalAddress) -> bool {
        pa.as_u32() < self.window_end.as_u32()
    }
}

impl PhysMapper for KernelWindowMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        debug_assert!(self.covers(pa), "{pa} lies outside the kernel window");
        let va = (KERNEL_BASE + pa.as_u32()) as usize as *mut T;
        // SAFETY: the caller guarantees the frame is inside the window and
        // holds a `T`.
        unsafe { &mut *va }
    }
}

#[repr(C, align(4096))]
struct HostFrame([u8; PAGE_SIZE as usize]);

/// Host-memory stand-in for physical RAM.
///
/// Frames come into existence, zero-filled, on first access and live until
/// the `SimulatedRam` is dropped. Pointers handed out stay valid for that
/// long because each frame is boxed separately.
#[derive(Default)]
pub struct SimulatedRam {
    frames: RefCell<BTreeMap<u32, NonNull<HostFrame>>>,
}

impl SimulatedRam {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames that have been touched so far.
    #[must_use]
    pub fn touched_frames(&self) -> usize {
        self.frames.borrow().len()
    }

    fn frame_ptr(&self, index: u32) -> NonNull<HostFrame> {
        *self
            .frames
            .borrow_mut()
            .entry(index)
            .or_insert_with(|| NonNull::from(Box::leak(Box::new(HostFrame([0; PAGE_SIZE as usize])))))
    }
}

impl PhysMapper for SimulatedRam {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        debug_assert!(size_of::<T>() + pa.page_offset() as usize <= PAGE_SIZE as usize);
        let frame = self.frame_ptr(pa.page().index());
        // SAFETY: the frame is a live, page-sized allocation owned by `self`;
        // the caller guarantees `T` matches its contents and is not aliased.
        unsafe {
            &mut *frame
                .as_ptr()
                .cast::<u8>()
                .add(pa.page_offset() as usize)
                .cast::<T>()
        }
    }
}

impl Drop for SimulatedRam {
    fn drop(&mut self) {
        for (_, frame) in core::mem::take(self.frames.get_mut()) {
            // SAFETY: every pointer came from `Box::leak` and is dropped once.
            drop(unsafe { Box::from_raw(frame.as_ptr()) });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_vmem::PageTable;

    #[test]
    fn window_covers_only_its_frames() {
        let mapper = KernelWindowMapper::new(2048);
        assert_eq!(mapper.window_end().as_u32(), 0x0080_0000);
        assert!(mapper.covers(PhysicalAddress::new(0x007F_F000)));
        assert!(!mapper.covers(PhysicalAddress::new(0x0080_0000)));
    }

    #[test]
    fn simulated_frames_start_zeroed_and_persist() {
        let ram = SimulatedRam::new();
        let pa = PhysicalAddress::new(0x0030_0000);
        // SAFETY: a fresh frame used as a single page table.
        let table: &mut PageTable = unsafe { ram.phys_to_mut(pa) };
        assert!(table.is_empty());
        table.set(
            kernel_vmem::TableIndex::new(5),
            kernel_vmem::PtEntry::make_4k(pa.page(), kernel_vmem::PageEntryBits::kernel_rw()),
        );

        // SAFETY: same frame, previous borrow no longer used.
        let again: &mut PageTable = unsafe { ram.phys_to_mut(pa) };
        assert_eq!(again.present_count(), 1);
        assert_eq!(ram.touched_frames(), 1);
    }
}
