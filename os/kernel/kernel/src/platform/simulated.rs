//! A platform that runs on the host.
//!
//! Physical memory is [`SimulatedRam`]; every privileged operation is
//! recorded instead of executed, so tests can check what the kernel asked
//! the machine to do. A context switch only records the target; the caller
//! simply continues.

use crate::platform::Platform;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use kernel_alloc::phys_mapper::SimulatedRam;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress};
use kernel_sync::InterruptControl;
use kernel_task::{ContextSwitch, RegisterContext};
use kernel_vmem::{Mmu, PhysMapper};

/// One recorded context switch.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SwitchRecord {
    /// Instruction pointer of the resumed context.
    pub eip: u32,
    /// Stack pointer of the resumed context.
    pub esp: u32,
}

#[derive(Default)]
pub struct SimulatedPlatform {
    ram: SimulatedRam,
    interrupts: Cell<bool>,
    /// Times interrupts were disabled.
    disables: Cell<usize>,
    directory_loads: RefCell<Vec<PhysicalPage>>,
    invalidations: RefCell<Vec<VirtualAddress>>,
    switches: RefCell<Vec<SwitchRecord>>,
    halts: Cell<usize>,
}

impl SimulatedPlatform {
    /// A platform with interrupts enabled.
    #[must_use]
    pub fn new() -> Self {
        let platform = Self::default();
        platform.interrupts.set(true);
        platform
    }

    #[must_use]
    pub fn directory_loads(&self) -> Vec<PhysicalPage> {
        self.directory_loads.borrow().clone()
    }

    /// The directory most recently loaded into CR3.
    #[must_use]
    pub fn active_directory(&self) -> Option<PhysicalPage> {
        self.directory_loads.borrow().last().copied()
    }

    #[must_use]
    pub fn invalidations(&self) -> Vec<VirtualAddress> {
        self.invalidations.borrow().clone()
    }

    #[must_use]
    pub fn switches(&self) -> Vec<SwitchRecord> {
        self.switches.borrow().clone()
    }

    #[must_use]
    pub fn halts(&self) -> usize {
        self.halts.get()
    }

    #[must_use]
    pub fn interrupt_disables(&self) -> usize {
        self.disables.get()
    }

    /// Forget every recorded operation.
    pub fn clear_records(&self) {
        self.directory_loads.borrow_mut().clear();
        self.invalidations.borrow_mut().clear();
        self.switches.borrow_mut().clear();
        self.halts.set(0);
        self.disables.set(0);
    }

    /// Read a `u32` from simulated physical memory.
    #[must_use]
    pub fn read_u32(&self, pa: PhysicalAddress) -> u32 {
        // SAFETY: any 4-aligned location of a simulated frame holds a `u32`.
        unsafe { *self.ram.phys_to_mut::<u32>(pa) }
    }

    /// Write a `u32` to simulated physical memory.
    pub fn write_u32(&self, pa: PhysicalAddress, value: u32) {
        // SAFETY: as in `read_u32`; no other borrow is live.
        unsafe { *self.ram.phys_to_mut::<u32>(pa) = value };
    }
}

impl PhysMapper for SimulatedPlatform {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        unsafe { self.ram.phys_to_mut(pa) }
    }
}

impl Mmu for SimulatedPlatform {
    fn load_directory(&self, directory: PhysicalPage) {
        self.directory_loads.borrow_mut().push(directory);
    }

    fn invalidate_page(&self, va: VirtualAddress) {
        self.invalidations.borrow_mut().push(va);
    }
}

impl InterruptControl for SimulatedPlatform {
    fn interrupts_enabled(&self) -> bool {
        self.interrupts.get()
    }

    fn disable_interrupts(&self) {
        self.disables.set(self.disables.get() + 1);
        self.interrupts.set(false);
    }

    fn enable_interrupts(&self) {
        self.interrupts.set(true);
    }
}

impl ContextSwitch for SimulatedPlatform {
    unsafe fn switch_context(&self, _old: *mut RegisterContext, new: *const RegisterContext) {
        // SAFETY: the caller guarantees `new` is readable.
        let new = unsafe { &*new };
        self.switches.borrow_mut().push(SwitchRecord {
            eip: new.eip,
            esp: new.esp,
        });
    }
}

impl Platform for SimulatedPlatform {
    fn halt(&self) {
        self.halts.set(self.halts.get() + 1);
    }
}
