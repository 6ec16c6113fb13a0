//! # Kernel Heap
//!
//! `kmalloc`/`kfree` over the window `[KERNEL_HEAP_BASE, KERNEL_HEAP_BASE +
//! KERNEL_HEAP_MAX)` of the kernel half.
//!
//! - First fit, address ordered, coalescing ([`FreeRanges`]).
//! - Block sizes are kept out of band, keyed by start address. A pointer the
//!   heap did not hand out (or already took back) is ignored by `kfree`.
//! - The heap grows in steps of at least `KERNEL_HEAP_GROWTH` by mapping
//!   fresh frames into the kernel space. Grown pages are never unmapped.

use crate::frame_alloc::BitmapFrameAllocator;
use crate::free_list::FreeRanges;
use crate::vmm::Vmm;
use alloc::collections::BTreeMap;
use kernel_info::memory::{HEAP_MIN_ALIGN, KERNEL_HEAP_BASE, KERNEL_HEAP_GROWTH, KERNEL_HEAP_MAX};
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress, checked_align_up, pages_for};
use kernel_vmem::{Mmu, PageEntryBits, PhysMapper, VmError};
use log::{debug, warn};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum HeapError {
    #[error("allocation size must be non-zero")]
    ZeroSize,
    #[error("alignment {align} is not a power of two")]
    BadAlignment { align: u32 },
    #[error("the kernel heap window is exhausted")]
    WindowExhausted,
    #[error("out of physical frames")]
    OutOfFrames,
    #[error(transparent)]
    Vm(#[from] VmError),
}

impl HeapError {
    /// `true` if the error reports a depleted resource rather than a bad
    /// argument.
    #[must_use]
    pub const fn is_exhaustion(&self) -> bool {
        match self {
            Self::WindowExhausted | Self::OutOfFrames => true,
            Self::Vm(e) => e.is_exhaustion(),
            Self::ZeroSize | Self::BadAlignment { .. } => false,
        }
    }
}

/// The kernel heap allocator.
#[derive(Debug)]
pub struct KernelHeap {
    base: u32,
    limit: u32,
    /// End of the mapped part of the window.
    top: u32,
    free: FreeRanges,
    /// Live blocks, `start → size`.
    live: BTreeMap<u32, u32>,
}

impl Default for KernelHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelHeap {
    /// An empty heap over the standard window. Nothing is mapped yet.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_window(KERNEL_HEAP_BASE, KERNEL_HEAP_MAX)
    }

    /// An empty heap over `[base, base + limit)`.
    #[must_use]
    pub const fn with_window(base: u32, limit: u32) -> Self {
        Self {
            base,
            limit,
            top: base,
            free: FreeRanges::new(),
            live: BTreeMap::new(),
        }
    }

    /// `kmalloc` with the default alignment.
    ///
    /// # Errors
    /// See [`KernelHeap::kmalloc_aligned`].
    pub fn kmalloc<P: PhysMapper + Mmu>(
        &mut self,
        vmm: &mut Vmm,
        frames: &mut BitmapFrameAllocator,
        platform: &P,
        size: u32,
    ) -> Result<VirtualAddress, HeapError> {
        self.kmalloc_aligned(vmm, frames, platform, size, HEAP_MIN_ALIGN)
    }

    /// Allocate `size` bytes aligned to `align` (at least `HEAP_MIN_ALIGN`).
    ///
    /// # Errors
    /// - [`HeapError::ZeroSize`], [`HeapError::BadAlignment`].
    /// - [`HeapError::WindowExhausted`], [`HeapError::OutOfFrames`] or a
    ///   [`VmError`] if the heap had to grow and could not.
    pub fn kmalloc_aligned<P: PhysMapper + Mmu>(
        &mut self,
        vmm: &mut Vmm,
        frames: &mut BitmapFrameAllocator,
        platform: &P,
        size: u32,
        align: u32,
    ) -> Result<VirtualAddress, HeapError> {
        if size == 0 {
            return Err(HeapError::ZeroSize);
        }
        if !align.is_power_of_two() {
            return Err(HeapError::BadAlignment { align });
        }
        let align = align.max(HEAP_MIN_ALIGN);
        let size = checked_align_up(size, HEAP_MIN_ALIGN).ok_or(HeapError::WindowExhausted)?;

        if let Some(va) = self.take(size, align) {
            return Ok(va);
        }
        // Worst case the new memory starts right after a misaligned top.
        let needed = size.checked_add(align - 1).ok_or(HeapError::WindowExhausted)?;
        let grown = self.grow(vmm, frames, platform, needed);
        // A partial growth may still be enough.
        self.take(size, align).ok_or_else(|| grown.err().unwrap_or(HeapError::WindowExhausted))
    }

    fn take(&mut self, size: u32, align: u32) -> Option<VirtualAddress> {
        let start = self.free.take_first_fit(size, align)?;
        self.live.insert(start, size);
        debug!("heap: kmalloc {size} bytes at {start:#010x}");
        Some(VirtualAddress::new(start))
    }

    /// Release the block starting at `va`.
    ///
    /// Returns the block size, or `None` (with a warning) if no live block
    /// starts there.
    pub fn kfree(&mut self, va: VirtualAddress) -> Option<u32> {
        let Some(size) = self.live.remove(&va.as_u32()) else {
            warn!("heap: kfree of unknown pointer {va} ignored");
            return None;
        };
        self.free.insert(va.as_u32(), size);
        debug!("heap: kfree {size} bytes at {va}");
        Some(size)
    }

    /// Size of the live block starting at `va`.
    #[must_use]
    pub fn block_size(&self, va: VirtualAddress) -> Option<u32> {
        self.live.get(&va.as_u32()).copied()
    }

    /// Bytes handed out and not yet freed.
    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.live.values().map(|&s| u64::from(s)).sum()
    }

    /// Mapped bytes not currently handed out.
    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        self.free.total()
    }

    /// Bytes of the window backed by frames.
    #[must_use]
    pub const fn mapped_bytes(&self) -> u32 {
        self.top - self.base
    }

    #[must_use]
    pub fn live_blocks(&self) -> usize {
        self.live.len()
    }

    /// Map at least `bytes` more of the window.
    ///
    /// If frames run out midway, the pages mapped so far stay part of the
    /// heap and the error is reported.
    fn grow<P: PhysMapper + Mmu>(
        &mut self,
        vmm: &mut Vmm,
        frames: &mut BitmapFrameAllocator,
        platform: &P,
        bytes: u32,
    ) -> Result<(), HeapError> {
        let pages = pages_for(bytes).max(KERNEL_HEAP_GROWTH / PAGE_SIZE);
        let window_left = (self.base + self.limit - self.top) / PAGE_SIZE;
        if window_left == 0 || pages_for(bytes) > window_left {
            return Err(HeapError::WindowExhausted);
        }
        let pages = pages.min(window_left);

        let start = self.top;
        let kernel = vmm.kernel_space();
        let mut result = Ok(());
        for _ in 0..pages {
            let Ok(frame) = frames.allocate_frame() else {
                result = Err(HeapError::OutOfFrames);
                break;
            };
            let va = VirtualAddress::new(self.top);
            if let Err(e) = vmm.map(platform, kernel, va, frame.base(), PageEntryBits::kernel_rw()) {
                frames.free_frame(frame);
                result = Err(e.into());
                break;
            }
            // The heap owns its pages for good.
            let _ = frame.leak();
            self.top += PAGE_SIZE;
        }

        if self.top > start {
            self.free.insert(start, self.top - start);
            debug!(
                "heap: grew by {} pages to {:#010x}",
                (self.top - start) / PAGE_SIZE,
                self.top
            );
        }
        result
    }
}
