//! # Threads
//!
//! A thread is the unit of scheduling: a saved register context, a kernel
//! stack, a priority and a state.
//!
//! ```text
//!   create ──► Ready ──pick──► Running ──yield/preempt──► Ready
//!                ▲                │
//!                │ wake           │ sleep
//!                └──── Blocked ◄──┘
//!   terminate (any state) ──► Terminated
//! ```

use crate::context::RegisterContext;
use crate::process::{Priority, ProcessId};
use core::fmt;
use kernel_alloc::arena::Handle;
use kernel_memory_addresses::VirtualAddress;

/// Names a thread. Stale ids (of terminated threads) are rejected.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ThreadId(pub(crate) Handle);

impl ThreadId {
    #[must_use]
    pub const fn handle(self) -> Handle {
        self.0
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{:?}", self.0)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ThreadState {
    Ready,
    Running,
    Blocked,
    Terminated,
}

#[derive(Debug)]
pub struct Thread {
    pub process: ProcessId,
    pub priority: Priority,
    pub state: ThreadState,
    pub context: RegisterContext,
    /// Base of the kernel stack (a heap block).
    pub stack: VirtualAddress,
    /// Tick at which a timed sleep ends.
    pub wake_at: Option<u64>,
}

impl Thread {
    /// A Ready thread that will start at `entry` on the stack
    /// `[stack, stack + stack_size)`.
    #[must_use]
    pub fn new(
        process: ProcessId,
        priority: Priority,
        entry: u32,
        stack: VirtualAddress,
        stack_size: u32,
    ) -> Self {
        Self {
            process,
            priority,
            state: ThreadState::Ready,
            context: RegisterContext::for_entry(entry, stack.as_u32() + stack_size),
            stack,
            wake_at: None,
        }
    }

    #[must_use]
    pub fn is_runnable(&self) -> bool {
        matches!(self.state, ThreadState::Ready | ThreadState::Running)
    }
}
