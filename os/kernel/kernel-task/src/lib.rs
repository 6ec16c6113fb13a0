//! # Processes, Threads and Scheduling
//!
//! The bookkeeping half of the execution core:
//!
//! - [`RegisterContext`]: the saved registers of a switched-out thread.
//! - [`Process`] / [`Thread`] records addressed by generation-checked
//!   [`ProcessId`] / [`ThreadId`] handles, kept in a [`TaskTable`].
//! - [`pick_next`]: the priority policy, and [`Scheduler`]: who runs now.
//! - [`ContextSwitch`]: the one operation that actually moves the CPU from
//!   one context to another, provided by the platform.
//!
//! Memory (stacks, address spaces) and the critical sections around every
//! operation are the kernel's business; nothing here allocates beyond its
//! own records or touches hardware.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod context;
pub mod process;
pub mod scheduler;
pub mod table;
pub mod thread;

pub use crate::context::RegisterContext;
pub use crate::process::{Priority, Process, ProcessId, truncate_name};
pub use crate::scheduler::{Candidate, Schedule, Scheduler, pick_next};
pub use crate::table::TaskTable;
pub use crate::thread::{Thread, ThreadId, ThreadState};

/// Moves the CPU from one register context to another.
pub trait ContextSwitch {
    /// Save the executing context into `old`, then resume `new`.
    ///
    /// On hardware this returns only when some later switch resumes `old`.
    ///
    /// # Safety
    /// - `old` must be valid for writes and `new` valid for reads.
    /// - `new` must describe a resumable state: a mapped stack and code in
    ///   the kernel half, or a context previously saved by this routine.
    /// - Interrupts must be disabled.
    unsafe fn switch_context(&self, old: *mut RegisterContext, new: *const RegisterContext);
}

impl<C: ContextSwitch + ?Sized> ContextSwitch for &C {
    #[inline]
    unsafe fn switch_context(&self, old: *mut RegisterContext, new: *const RegisterContext) {
        unsafe { (**self).switch_context(old, new) }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum TaskError {
    #[error("the process table is full")]
    TooManyProcesses,
    #[error("the thread table is full")]
    TooManyThreads,
    #[error("process {0:?} already has the maximum number of threads")]
    ProcessFull(ProcessId),
    #[error("process {0:?} is terminating")]
    ProcessInactive(ProcessId),
    #[error("unknown or terminated process")]
    UnknownProcess,
    #[error("unknown or terminated thread")]
    UnknownThread,
}

impl TaskError {
    /// `true` if the error reports a depleted resource rather than a bad
    /// argument.
    #[must_use]
    pub const fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::TooManyProcesses | Self::TooManyThreads | Self::ProcessFull(_)
        )
    }
}
