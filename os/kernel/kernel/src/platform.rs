//! # Platform Boundary
//!
//! Everything the kernel state needs from the machine, as one trait:
//!
//! | Concern               | Trait               | x86                     |
//! |-----------------------|---------------------|-------------------------|
//! | reach table frames    | [`PhysMapper`]      | kernel window           |
//! | CR3 / TLB             | [`Mmu`]             | `mov cr3`, `invlpg`     |
//! | interrupt flag        | [`InterruptControl`]| `pushfd`, `cli`, `sti`  |
//! | context switch        | [`ContextSwitch`]   | naked assembly routine  |
//! | idle                  | [`Platform::halt`]  | `sti; hlt`              |

pub mod simulated;
#[cfg(target_arch = "x86")]
pub mod x86;

use kernel_sync::InterruptControl;
use kernel_task::ContextSwitch;
use kernel_vmem::{Mmu, PhysMapper};

pub trait Platform: PhysMapper + Mmu + InterruptControl + ContextSwitch {
    /// Wait for the next interrupt.
    fn halt(&self);
}
