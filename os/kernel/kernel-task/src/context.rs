//! # Saved Register State
//!
//! [`RegisterContext`] is what a thread leaves behind when it is switched
//! out. The layout is fixed (`repr(C)`, one 32-bit slot per register) because
//! the context-switch routine addresses the fields by offset.

use core::mem::offset_of;
use kernel_info::memory::{KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR, STACK_ALIGN};
use kernel_registers::eflags::Eflags;

/// The general purpose, pointer, flag and segment registers of one thread.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct RegisterContext {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub esi: u32,
    pub edi: u32,
    pub ebp: u32,
    pub esp: u32,
    pub eip: u32,
    pub eflags: u32,
    pub cs: u32,
    pub ds: u32,
    pub es: u32,
    pub fs: u32,
    pub gs: u32,
    pub ss: u32,
}

impl RegisterContext {
    pub const OFFSET_EBX: usize = offset_of!(Self, ebx);
    pub const OFFSET_ESI: usize = offset_of!(Self, esi);
    pub const OFFSET_EDI: usize = offset_of!(Self, edi);
    pub const OFFSET_EBP: usize = offset_of!(Self, ebp);
    pub const OFFSET_ESP: usize = offset_of!(Self, esp);
    pub const OFFSET_EIP: usize = offset_of!(Self, eip);
    pub const OFFSET_EFLAGS: usize = offset_of!(Self, eflags);

    /// The context a new kernel thread starts from: execution at `entry`
    /// on the stack ending at `stack_top`, interrupts enabled, kernel
    /// segments.
    ///
    /// `stack_top` is aligned down to `STACK_ALIGN`.
    #[must_use]
    pub fn for_entry(entry: u32, stack_top: u32) -> Self {
        let code = u32::from(KERNEL_CODE_SELECTOR);
        let data = u32::from(KERNEL_DATA_SELECTOR);
        let esp = stack_top & !(STACK_ALIGN - 1);
        Self {
            esp,
            ebp: esp,
            eip: entry,
            eflags: Eflags::initial_thread().into_bits(),
            cs: code,
            ds: data,
            es: data,
            fs: data,
            gs: data,
            ss: data,
            ..Self::default()
        }
    }

    /// `true` if the saved flags have IF set.
    #[must_use]
    pub fn interrupts_enabled(&self) -> bool {
        Eflags::from_bits(self.eflags).if_interrupt_enable()
    }
}

const _: () = {
    assert!(size_of::<RegisterContext>() == 16 * 4);
    assert!(RegisterContext::OFFSET_ESP == 28);
    assert!(RegisterContext::OFFSET_EIP == 32);
    assert!(RegisterContext::OFFSET_EFLAGS == 36);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_threads_start_in_kernel_mode_with_interrupts_on() {
        let ctx = RegisterContext::for_entry(0xC010_0000, 0xD000_4000);
        assert_eq!(ctx.eip, 0xC010_0000);
        assert_eq!(ctx.esp, 0xD000_4000);
        assert_eq!(ctx.eflags, 0x202);
        assert!(ctx.interrupts_enabled());
        assert_eq!(ctx.cs, 0x08);
        assert_eq!(ctx.ss, 0x10);
        assert_eq!(ctx.eax, 0);
    }

    #[test]
    fn stack_top_is_aligned_down() {
        let ctx = RegisterContext::for_entry(0x1000, 0xD000_400C);
        assert_eq!(ctx.esp, 0xD000_4000);
    }
}
