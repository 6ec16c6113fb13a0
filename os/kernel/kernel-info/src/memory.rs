//! # Memory Layout

use kernel_memory_addresses::{ENTRIES_PER_TABLE, PAGE_SIZE, TABLE_COVERAGE};

/// Start of the kernel half; every address at or above it is shared by all
/// address spaces.
pub const KERNEL_BASE: u32 = 0xC000_0000;

/// Lowest address handed out by `vmalloc`.
pub const USER_BASE: u32 = 0x4000_0000;

/// Start of the kernel heap window used by `kmalloc`.
pub const KERNEL_HEAP_BASE: u32 = 0xD000_0000;

/// Maximum size of the kernel heap window.
pub const KERNEL_HEAP_MAX: u32 = 0x1000_0000; // 256 MiB

/// Bytes the kernel heap grows by when it runs out of space, at minimum.
pub const KERNEL_HEAP_GROWTH: u32 = 4 * PAGE_SIZE;

/// First page-directory slot of the kernel half.
pub const KERNEL_FIRST_SLOT: usize = (KERNEL_BASE / TABLE_COVERAGE) as usize;

/// Number of page-directory slots in the kernel half.
pub const KERNEL_SLOTS: usize = ENTRIES_PER_TABLE - KERNEL_FIRST_SLOT;

/// Size of a thread's kernel stack.
pub const KERNEL_STACK_SIZE: u32 = 16 * 1024;

/// Alignment of the initial stack pointer of a new thread.
pub const STACK_ALIGN: u32 = 16;

/// Default alignment of `kmalloc` blocks.
pub const HEAP_MIN_ALIGN: u32 = 8;

/// Upper bound on concurrently existing processes.
pub const MAX_PROCESSES: usize = 256;

/// Upper bound on concurrently existing threads, across all processes.
pub const MAX_THREADS: usize = 1024;

/// Upper bound on threads owned by one process.
pub const MAX_THREADS_PER_PROCESS: usize = 16;

/// Longest process name kept, in bytes.
pub const MAX_PROCESS_NAME: usize = 63;

/// Ring-0 code segment selector.
pub const KERNEL_CODE_SELECTOR: u16 = 0x08;

/// Ring-0 data/stack segment selector.
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;

/// Returns `true` if `va` lies in the shared kernel half.
#[inline]
#[must_use]
pub const fn is_kernel_half(va: u32) -> bool {
    va >= KERNEL_BASE
}

/// Returns `true` if the page-directory slot belongs to the kernel half.
#[inline]
#[must_use]
pub const fn is_kernel_slot(slot: usize) -> bool {
    slot >= KERNEL_FIRST_SLOT
}

const _: () = {
    assert!(KERNEL_BASE.is_multiple_of(TABLE_COVERAGE));
    assert!(USER_BASE.is_multiple_of(PAGE_SIZE));
    assert!(USER_BASE < KERNEL_BASE);
    assert!(KERNEL_HEAP_BASE >= KERNEL_BASE);
    assert!(KERNEL_HEAP_BASE.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_HEAP_MAX.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_HEAP_BASE.checked_add(KERNEL_HEAP_MAX - 1).is_some());
    assert!(KERNEL_HEAP_GROWTH.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_STACK_SIZE.is_multiple_of(PAGE_SIZE));
    assert!(HEAP_MIN_ALIGN.is_power_of_two());
    assert!(KERNEL_FIRST_SLOT == 768);
    assert!(MAX_THREADS >= MAX_THREADS_PER_PROCESS);
};
