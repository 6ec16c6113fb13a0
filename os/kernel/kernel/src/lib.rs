//! # Kernel Execution Core
//!
//! Ties the memory-management and tasking crates together behind one
//! [`KernelState`] and one [`Platform`] boundary.
//!
//! ```text
//!            ┌──────────────────── KernelState<P> ────────────────────┐
//!            │  BitmapFrameAllocator   Vmm (TablePool, spaces)        │
//!            │  KernelHeap             TaskTable   Scheduler          │
//!            └──────────────┬──────────────────────────────────────────┘
//!                           │ P: Platform
//!          ┌────────────────┴────────────────┐
//!   SimulatedPlatform (host tests)     X86Platform (bare metal)
//! ```
//!
//! The same state machine runs on both: the simulated platform backs
//! physical frames with host memory and records CR3 loads, TLB flushes and
//! context switches instead of performing them.
//!
//! ```
//! use kernel::{KernelState, Schedule, SimulatedPlatform, ThreadState};
//! use kernel_info::config::KernelConfig;
//!
//! let mut k = KernelState::boot(KernelConfig::default(), SimulatedPlatform::new()).unwrap();
//! let p = k.create_process("init", 1).unwrap();
//! let t = k.create_thread(p, 0xC010_0000, 0).unwrap();
//!
//! assert_eq!(k.schedule(), Schedule::Switched { from: None, to: t });
//! assert_eq!(k.thread_state(t), ThreadState::Running);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod error;
pub mod platform;
mod state;

pub use crate::error::{ErrorKind, KernelError};
pub use crate::platform::Platform;
pub use crate::platform::simulated::SimulatedPlatform;
pub use crate::state::KernelState;
pub use kernel_alloc::vmm::SpaceId;
pub use kernel_task::{Priority, ProcessId, Schedule, ThreadId, ThreadState};
