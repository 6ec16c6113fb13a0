//! # Bitmap Frame Allocator
//!
//! One bit per 4 KiB physical frame; a set bit means "in use". Allocation
//! scans for the lowest clear bit, so frame handout is deterministic.
//!
//! Frames are handed out as [`Frame`] handles. A handle cannot be cloned or
//! built outside this module, so the only way to clear a bit is to give the
//! handle back through [`BitmapFrameAllocator::free_frame`]. Frames that
//! become part of the kernel for good (page-table slots, kernel heap pages)
//! are [`leak`](Frame::leak)ed into a plain [`PhysicalPage`].

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use core::ops::Range;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};
use kernel_vmem::FrameAlloc;
use log::debug;

/// Exclusive ownership of one allocated physical frame.
#[must_use = "dropping a Frame leaks it; return it with `free_frame`"]
#[derive(Eq, PartialEq)]
pub struct Frame {
    page: PhysicalPage,
}

impl Frame {
    #[inline]
    pub const fn page(&self) -> PhysicalPage {
        self.page
    }

    #[inline]
    pub const fn base(&self) -> PhysicalAddress {
        self.page.base()
    }

    /// Give up the handle; the frame stays allocated forever.
    #[inline]
    pub const fn leak(self) -> PhysicalPage {
        self.page
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({:?})", self.page)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameAllocError {
    #[error("out of physical frames")]
    Exhausted,
}

pub struct BitmapFrameAllocator {
    bitmap: Vec<u64>,
    frame_count: u32,
    used: u32,
}

impl BitmapFrameAllocator {
    /// Manage frames `0..frame_count`, all initially free.
    #[must_use]
    pub fn new(frame_count: u32) -> Self {
        let words = frame_count.div_ceil(64) as usize;
        let mut bitmap = vec![0u64; words];
        // Bits past the last frame are permanently set so the scan never finds them.
        let tail = frame_count % 64;
        if tail != 0
            && let Some(last) = bitmap.last_mut()
        {
            *last = !((1u64 << tail) - 1);
        }
        Self {
            bitmap,
            frame_count,
            used: 0,
        }
    }

    /// Mark the frames with indices in `range` as used without handing out
    /// handles (firmware areas, the kernel image).
    ///
    /// Returns how many frames changed state. Indices past the end are ignored.
    pub fn reserve(&mut self, range: Range<u32>) -> u32 {
        let end = range.end.min(self.frame_count);
        let mut newly = 0;
        for index in range.start..end {
            if !self.test(index) {
                self.set(index);
                newly += 1;
            }
        }
        self.used += newly;
        debug!("frames: reserved {newly} frames in {range:?}");
        newly
    }

    /// Allocate the lowest free frame.
    ///
    /// # Errors
    /// [`FrameAllocError::Exhausted`] when every frame is in use.
    pub fn allocate_frame(&mut self) -> Result<Frame, FrameAllocError> {
        let (word_index, word) = self
            .bitmap
            .iter()
            .enumerate()
            .find(|(_, w)| **w != u64::MAX)
            .ok_or(FrameAllocError::Exhausted)?;

        #[allow(clippy::cast_possible_truncation)]
        let index = (word_index as u32) * 64 + word.trailing_ones();
        self.set(index);
        self.used += 1;
        Ok(Frame {
            page: PhysicalPage::from_index(index),
        })
    }

    /// Return a frame to the pool.
    ///
    /// # Panics
    /// If the frame is outside the managed range or its bit is already clear.
    /// Both mean the bitmap is corrupt.
    pub fn free_frame(&mut self, frame: Frame) {
        let index = frame.page.index();
        assert!(
            index < self.frame_count,
            "{:?} is outside the managed {} frames",
            frame.page,
            self.frame_count
        );
        assert!(self.test(index), "{:?} freed while not allocated", frame.page);
        self.clear(index);
        self.used -= 1;
    }

    #[must_use]
    pub const fn frame_count(&self) -> u32 {
        self.frame_count
    }

    #[must_use]
    pub const fn used_count(&self) -> u32 {
        self.used
    }

    #[must_use]
    pub const fn free_count(&self) -> u32 {
        self.frame_count - self.used
    }

    #[must_use]
    pub fn is_allocated(&self, page: PhysicalPage) -> bool {
        page.index() < self.frame_count && self.test(page.index())
    }

    #[inline]
    fn test(&self, index: u32) -> bool {
        self.bitmap[(index / 64) as usize] & (1 << (index % 64)) != 0
    }

    #[inline]
    fn set(&mut self, index: u32) {
        self.bitmap[(index / 64) as usize] |= 1 << (index % 64);
    }

    #[inline]
    fn clear(&mut self, index: u32) {
        self.bitmap[(index / 64) as usize] &= !(1 << (index % 64));
    }
}

impl FrameAlloc for BitmapFrameAllocator {
    fn alloc_4k(&mut self) -> Option<PhysicalPage> {
        self.allocate_frame().ok().map(Frame::leak)
    }
}
