//! # Table Pool
//!
//! A fixed-capacity array of 4 KiB table slots. Every page directory and
//! page table lives in one of these slots.
//!
//! The frames behind the slots are reserved from a [`FrameAlloc`] once,
//! when the pool is built, so a slot has a stable physical address that can
//! go into a directory entry or CR3. Creating and freeing tables afterwards
//! never touches the frame allocator.
//!
//! Freed slots are reused last-in first-out: a table released by an unmap
//! is the one handed out to the next map.

use crate::{FrameAlloc, PhysMapper, VmError, get_table};
use alloc::vec::Vec;
use kernel_memory_addresses::PhysicalPage;
use log::debug;

pub struct TablePool {
    /// Frames backing the slots, sorted by address.
    frames: Vec<PhysicalPage>,
    /// Free slots; the last element is handed out next.
    free: Vec<PhysicalPage>,
}

impl TablePool {
    /// Reserve `capacity` frames from `alloc` and build an all-free pool.
    ///
    /// # Errors
    /// [`VmError::OutOfFrames`] if `alloc` runs dry first.
    pub fn new<A: FrameAlloc>(alloc: &mut A, capacity: usize) -> Result<Self, VmError> {
        let mut frames = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            frames.push(alloc.alloc_4k().ok_or(VmError::OutOfFrames)?);
        }
        frames.sort_unstable();

        let free = frames.iter().rev().copied().collect();
        debug!("table pool: {capacity} slots reserved");
        Ok(Self { frames, free })
    }

    /// Take a slot and clear it.
    ///
    /// # Errors
    /// [`VmError::TablePoolExhausted`] if every slot is in use.
    pub fn take<M: PhysMapper>(&mut self, mapper: &M) -> Result<PhysicalPage, VmError> {
        let page = self.free.pop().ok_or(VmError::TablePoolExhausted)?;
        // SAFETY: the slot is owned by the pool and was free, so nothing refers to it.
        unsafe { get_table(mapper, page) }.zero();
        Ok(page)
    }

    /// Return a slot taken with [`take`](Self::take).
    ///
    /// # Panics
    /// If `page` is not a slot of this pool or is already free; either means
    /// the paging structures are corrupt.
    pub fn give_back(&mut self, page: PhysicalPage) {
        assert!(self.owns(page), "{page:?} is not a table pool slot");
        assert!(!self.free.contains(&page), "{page:?} returned to the table pool twice");
        self.free.push(page);
    }

    /// `true` if `page` backs one of the pool's slots.
    #[must_use]
    pub fn owns(&self, page: PhysicalPage) -> bool {
        self.frames.binary_search(&page).is_ok()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    /// Slots currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Slots currently holding a directory or table.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.capacity() - self.available()
    }
}
