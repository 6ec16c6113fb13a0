//! # Boot Configuration

use crate::memory::{KERNEL_BASE, KERNEL_SLOTS};
use kernel_memory_addresses::PAGE_SIZE;

/// Values handed to the execution core at boot.
///
/// The bootloader knows how much RAM exists and how much of it the kernel
/// image occupies; everything else has a sane default.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct KernelConfig {
    /// Number of 4 KiB physical frames managed by the frame allocator.
    pub frame_count: u32,
    /// Frames at the bottom of physical memory never handed out (BIOS,
    /// firmware tables, the kernel image).
    pub reserved_frames: u32,
    /// Frames of low physical memory mapped at `KERNEL_BASE` in the kernel
    /// space (the kernel image window). Page tables are reached through this
    /// window, so the table pool must lie inside it.
    pub kernel_image_frames: u32,
    /// Capacity of the page table pool (directories and page tables).
    pub table_pool_capacity: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            frame_count: (32 * 1024 * 1024) / PAGE_SIZE,
            reserved_frames: (1024 * 1024) / PAGE_SIZE,
            kernel_image_frames: (8 * 1024 * 1024) / PAGE_SIZE,
            table_pool_capacity: 1024,
        }
    }
}

/// A [`KernelConfig`] that cannot be booted.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("no physical frames configured")]
    NoFrames,
    #[error("reserved frames ({reserved}) exceed physical frames ({frames})")]
    ReservedExceedsMemory { reserved: u32, frames: u32 },
    #[error("kernel image ({image} frames) does not fit below {frames} frames")]
    ImageExceedsMemory { image: u32, frames: u32 },
    #[error("kernel image ({image} frames) does not fit into the kernel half")]
    ImageExceedsKernelHalf { image: u32 },
    #[error("table pool of {capacity} slots cannot hold the {required} kernel tables")]
    TablePoolTooSmall { capacity: usize, required: usize },
    #[error("table pool of {capacity} slots needs more frames than are free")]
    TablePoolExceedsMemory { capacity: usize },
    #[error("table pool ends at frame {end}, past the kernel window of {image} frames")]
    TablePoolOutsideWindow { end: u32, image: u32 },
}

impl KernelConfig {
    /// Pool slots consumed at boot: every kernel-half page table plus the
    /// kernel directory.
    #[must_use]
    pub const fn boot_table_slots() -> usize {
        KERNEL_SLOTS + 1
    }

    /// Check the configuration against the memory layout.
    ///
    /// # Errors
    /// Returns the first inconsistency found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_count == 0 {
            return Err(ConfigError::NoFrames);
        }
        if self.reserved_frames > self.frame_count {
            return Err(ConfigError::ReservedExceedsMemory {
                reserved: self.reserved_frames,
                frames: self.frame_count,
            });
        }
        if self.kernel_image_frames > self.frame_count {
            return Err(ConfigError::ImageExceedsMemory {
                image: self.kernel_image_frames,
                frames: self.frame_count,
            });
        }
        let kernel_half_pages = (u32::MAX - KERNEL_BASE) / PAGE_SIZE + 1;
        if self.kernel_image_frames > kernel_half_pages {
            return Err(ConfigError::ImageExceedsKernelHalf {
                image: self.kernel_image_frames,
            });
        }
        let required = Self::boot_table_slots();
        if self.table_pool_capacity < required {
            return Err(ConfigError::TablePoolTooSmall {
                capacity: self.table_pool_capacity,
                required,
            });
        }
        let free = (self.frame_count - self.reserved_frames) as usize;
        if self.table_pool_capacity > free {
            return Err(ConfigError::TablePoolExceedsMemory {
                capacity: self.table_pool_capacity,
            });
        }
        // The pool is carved from the lowest free frames.
        #[allow(clippy::cast_possible_truncation)]
        let end = self.reserved_frames + self.table_pool_capacity as u32;
        if end > self.kernel_image_frames {
            return Err(ConfigError::TablePoolOutsideWindow {
                end,
                image: self.kernel_image_frames,
            });
        }
        Ok(())
    }
}
