//! Privileged instructions without a register image.

use kernel_memory_addresses::VirtualAddress;

/// Invalidate the TLB entry for the page containing `va`.
///
/// # Safety
/// Ring 0 only.
#[inline]
pub unsafe fn invlpg(va: VirtualAddress) {
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) va.as_u32(), options(nostack, preserves_flags));
    }
}

/// Clear IF.
///
/// # Safety
/// Ring 0 only (or IOPL permitting).
#[inline]
pub unsafe fn cli() {
    unsafe {
        core::arch::asm!("cli", options(nomem, nostack));
    }
}

/// Set IF.
///
/// # Safety
/// Ring 0 only (or IOPL permitting). Interrupt handlers must be installed.
#[inline]
pub unsafe fn sti() {
    unsafe {
        core::arch::asm!("sti", options(nomem, nostack));
    }
}

/// Halt until the next interrupt.
///
/// # Safety
/// Ring 0 only. With IF clear this never returns.
#[inline]
pub unsafe fn hlt() {
    unsafe {
        core::arch::asm!("hlt", options(nomem, nostack, preserves_flags));
    }
}
