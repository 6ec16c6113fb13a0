//! # Kernel synchronization primitives
//!
//! The execution core runs on a single CPU, so mutual exclusion reduces to
//! keeping interrupt handlers out of a critical section. [`IrqGuard`] does
//! exactly that over any [`InterruptControl`] implementation.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;

pub use irq::{InterruptControl, IrqGuard};

#[cfg(target_arch = "x86")]
pub use irq::CpuInterrupts;
