//! The IA-32 platform: the real CPU.

use crate::platform::Platform;
use kernel_alloc::phys_mapper::KernelWindowMapper;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress};
use kernel_registers::StoreRegisterUnsafe;
use kernel_registers::cr3::Cr3;
use kernel_registers::instr;
use kernel_sync::{CpuInterrupts, InterruptControl};
use kernel_task::{ContextSwitch, RegisterContext};
use kernel_vmem::{Mmu, PhysMapper};

pub struct X86Platform {
    window: KernelWindowMapper,
    cpu: CpuInterrupts,
}

impl X86Platform {
    /// The platform for a kernel whose boot code mapped the first
    /// `window_frames` frames of physical memory at `KERNEL_BASE`.
    ///
    /// # Safety
    /// Must run in ring 0 with that window mapped.
    #[must_use]
    pub const unsafe fn new(window_frames: u32) -> Self {
        Self {
            window: KernelWindowMapper::new(window_frames),
            cpu: CpuInterrupts,
        }
    }
}

impl PhysMapper for X86Platform {
    #[inline]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        unsafe { self.window.phys_to_mut(pa) }
    }
}

impl Mmu for X86Platform {
    fn load_directory(&self, directory: PhysicalPage) {
        let cr3 = Cr3::from_directory_phys(directory.base(), false, false);
        // SAFETY: directories come from the table pool and map the kernel
        // half identically to the active one.
        unsafe { cr3.store_unsafe() };
    }

    #[inline]
    fn invalidate_page(&self, va: VirtualAddress) {
        // SAFETY: ring 0.
        unsafe { instr::invlpg(va) };
    }
}

impl InterruptControl for X86Platform {
    #[inline]
    fn interrupts_enabled(&self) -> bool {
        self.cpu.interrupts_enabled()
    }

    #[inline]
    fn disable_interrupts(&self) {
        self.cpu.disable_interrupts();
    }

    #[inline]
    fn enable_interrupts(&self) {
        self.cpu.enable_interrupts();
    }
}

impl ContextSwitch for X86Platform {
    #[inline]
    unsafe fn switch_context(&self, old: *mut RegisterContext, new: *const RegisterContext) {
        unsafe { switch_context(old, new) }
    }
}

impl Platform for X86Platform {
    fn halt(&self) {
        // SAFETY: ring 0; `sti; hlt` lets the next interrupt wake us.
        unsafe {
            instr::sti();
            instr::hlt();
        }
    }
}

/// Save the callee-saved registers, flags, stack and return address into
/// `old`, then load the same set from `new` and continue at `new.eip`.
///
/// A context saved here resumes by returning from this call. A fresh
/// context (see [`RegisterContext::for_entry`]) starts at its entry point.
///
/// # Safety
/// See [`ContextSwitch::switch_context`].
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(_old: *mut RegisterContext, _new: *const RegisterContext) {
    core::arch::naked_asm!(
        "mov eax, [esp + 4]",
        "mov edx, [esp + 8]",

        // Save old context
        "mov [eax + {ebx}], ebx",
        "mov [eax + {esi}], esi",
        "mov [eax + {edi}], edi",
        "mov [eax + {ebp}], ebp",
        "pushfd",
        "pop ecx",
        "mov [eax + {eflags}], ecx",
        // Resume at our return address with the arguments' stack.
        "mov ecx, [esp]",
        "mov [eax + {eip}], ecx",
        "lea ecx, [esp + 4]",
        "mov [eax + {esp}], ecx",

        // Load new context
        "mov ebx, [edx + {ebx}]",
        "mov esi, [edx + {esi}]",
        "mov edi, [edx + {edi}]",
        "mov ebp, [edx + {ebp}]",
        "mov esp, [edx + {esp}]",
        "push dword ptr [edx + {eflags}]",
        "popfd",
        "jmp dword ptr [edx + {eip}]",

        ebx = const RegisterContext::OFFSET_EBX,
        esi = const RegisterContext::OFFSET_ESI,
        edi = const RegisterContext::OFFSET_EDI,
        ebp = const RegisterContext::OFFSET_EBP,
        esp = const RegisterContext::OFFSET_ESP,
        eip = const RegisterContext::OFFSET_EIP,
        eflags = const RegisterContext::OFFSET_EFLAGS,
    );
}
