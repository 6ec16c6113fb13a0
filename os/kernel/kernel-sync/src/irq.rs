/// Access to the interrupt-enable flag of the executing CPU.
///
/// Implemented by the real x86 platform (`cli`/`sti`/`pushfd`) and by
/// simulated platforms that merely record the flag.
pub trait InterruptControl {
    /// Returns whether maskable interrupts are currently enabled.
    fn interrupts_enabled(&self) -> bool;

    /// Masks interrupts (`cli`).
    fn disable_interrupts(&self);

    /// Unmasks interrupts (`sti`).
    fn enable_interrupts(&self);
}

impl<I: InterruptControl + ?Sized> InterruptControl for &I {
    #[inline]
    fn interrupts_enabled(&self) -> bool {
        (**self).interrupts_enabled()
    }

    #[inline]
    fn disable_interrupts(&self) {
        (**self).disable_interrupts();
    }

    #[inline]
    fn enable_interrupts(&self) {
        (**self).enable_interrupts();
    }
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// `IrqGuard::new()` snapshots the interrupt-enable state. If interrupts
/// were enabled, it disables them. On drop, it re-enables them **only** if
/// they were previously enabled, so guards nest correctly.
///
/// # Examples
///
/// ```
/// use core::cell::Cell;
/// use kernel_sync::{InterruptControl, IrqGuard};
///
/// struct Flag(Cell<bool>);
/// impl InterruptControl for Flag {
///     fn interrupts_enabled(&self) -> bool { self.0.get() }
///     fn disable_interrupts(&self) { self.0.set(false) }
///     fn enable_interrupts(&self) { self.0.set(true) }
/// }
///
/// let cpu = Flag(Cell::new(true));
/// {
///     let _g = IrqGuard::new(&cpu);
///     assert!(!cpu.interrupts_enabled());
/// }
/// assert!(cpu.interrupts_enabled());
/// ```
#[must_use = "interrupts are re-enabled as soon as the guard is dropped"]
pub struct IrqGuard<'a, I: InterruptControl + ?Sized> {
    cpu: &'a I,
    /// Whether interrupts were enabled (IF=1) when the guard was created.
    were_enabled: bool,
}

impl<'a, I: InterruptControl + ?Sized> IrqGuard<'a, I> {
    /// Disables interrupts if they are currently enabled and remembers the state.
    #[inline]
    pub fn new(cpu: &'a I) -> Self {
        let enabled = cpu.interrupts_enabled();
        if enabled {
            cpu.disable_interrupts();
        }
        Self {
            cpu,
            were_enabled: enabled,
        }
    }

    /// Whether the guard will re-enable interrupts when dropped.
    #[inline]
    #[must_use]
    pub const fn restores_interrupts(&self) -> bool {
        self.were_enabled
    }
}

impl<I: InterruptControl + ?Sized> Drop for IrqGuard<'_, I> {
    /// Restores interrupts only if they were previously enabled.
    fn drop(&mut self) {
        if self.were_enabled {
            self.cpu.enable_interrupts();
        }
    }
}

/// The interrupt flag of the executing IA-32 CPU.
///
/// # Safety & Privilege
///
/// Must only be used in contexts where `cli`/`sti` are permitted (ring 0).
#[cfg(target_arch = "x86")]
#[derive(Debug, Default, Copy, Clone)]
pub struct CpuInterrupts;

#[cfg(target_arch = "x86")]
impl InterruptControl for CpuInterrupts {
    #[inline]
    fn interrupts_enabled(&self) -> bool {
        use kernel_registers::LoadRegister;
        kernel_registers::eflags::Eflags::load().if_interrupt_enable()
    }

    #[inline]
    fn disable_interrupts(&self) {
        unsafe { kernel_registers::instr::cli() }
    }

    #[inline]
    fn enable_interrupts(&self) {
        unsafe { kernel_registers::instr::sti() }
    }
}
