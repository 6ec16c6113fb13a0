//! # Processes
//!
//! A process owns an address space and up to `MAX_THREADS_PER_PROCESS`
//! threads.

use crate::thread::ThreadId;
use crate::TaskError;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use kernel_alloc::arena::Handle;
use kernel_alloc::vmm::SpaceId;
use kernel_info::memory::{MAX_PROCESS_NAME, MAX_THREADS_PER_PROCESS};

/// Scheduling priority; larger runs first.
pub type Priority = u32;

/// Names a process. Stale ids (of removed processes) are rejected.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ProcessId(pub(crate) Handle);

impl ProcessId {
    #[must_use]
    pub const fn handle(self) -> Handle {
        self.0
    }
}

impl fmt::Debug for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{:?}", self.0)
    }
}

#[derive(Debug)]
pub struct Process {
    name: String,
    pub priority: Priority,
    pub space: SpaceId,
    pub parent: Option<ProcessId>,
    /// Cleared when termination starts; inactive processes are never
    /// scheduled.
    pub active: bool,
    threads: Vec<ThreadId>,
}

impl Process {
    /// An active process without threads. `name` is cut to
    /// `MAX_PROCESS_NAME` bytes.
    #[must_use]
    pub fn new(name: &str, priority: Priority, space: SpaceId, parent: Option<ProcessId>) -> Self {
        Self {
            name: String::from(truncate_name(name)),
            priority,
            space,
            parent,
            active: true,
            threads: Vec::with_capacity(MAX_THREADS_PER_PROCESS),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Threads in creation order.
    #[must_use]
    pub fn threads(&self) -> &[ThreadId] {
        &self.threads
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.threads.len() >= MAX_THREADS_PER_PROCESS
    }

    pub(crate) fn attach(&mut self, id: ProcessId, thread: ThreadId) -> Result<(), TaskError> {
        if self.is_full() {
            return Err(TaskError::ProcessFull(id));
        }
        self.threads.push(thread);
        Ok(())
    }

    pub(crate) fn detach(&mut self, thread: ThreadId) -> bool {
        let before = self.threads.len();
        self.threads.retain(|&t| t != thread);
        self.threads.len() != before
    }
}

/// The longest prefix of `name` that fits `MAX_PROCESS_NAME` bytes without
/// splitting a character.
#[must_use]
pub fn truncate_name(name: &str) -> &str {
    if name.len() <= MAX_PROCESS_NAME {
        return name;
    }
    let mut end = MAX_PROCESS_NAME;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_are_kept() {
        assert_eq!(truncate_name("init"), "init");
        assert_eq!(truncate_name(""), "");
    }

    #[test]
    fn long_names_are_cut_to_63_bytes() {
        let name = "x".repeat(100);
        assert_eq!(truncate_name(&name).len(), 63);
    }

    #[test]
    fn cut_never_splits_a_character() {
        // 62 ASCII bytes followed by a 3-byte character straddling the limit.
        let name = format!("{}€tail", "a".repeat(62));
        let cut = truncate_name(&name);
        assert_eq!(cut.len(), 62);
        assert!(cut.chars().all(|c| c == 'a'));
    }
}
