//! # Process and Thread Table
//!
//! Owns every [`Process`] and [`Thread`] record and keeps the two sides of
//! the ownership relation consistent: a thread is listed by exactly the
//! process it names.

use crate::process::{Process, ProcessId};
use crate::scheduler::{Candidate, pick_next};
use crate::thread::{Thread, ThreadId, ThreadState};
use crate::TaskError;
use alloc::vec::Vec;
use kernel_alloc::arena::Arena;
use kernel_info::memory::{MAX_PROCESSES, MAX_THREADS};
use log::debug;

pub struct TaskTable {
    processes: Arena<Process>,
    threads: Arena<Thread>,
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            processes: Arena::with_capacity(MAX_PROCESSES),
            threads: Arena::with_capacity(MAX_THREADS),
        }
    }

    /// # Errors
    /// [`TaskError::TooManyProcesses`] at `MAX_PROCESSES`.
    pub fn add_process(&mut self, process: Process) -> Result<ProcessId, TaskError> {
        self.processes
            .insert(process)
            .map(ProcessId)
            .map_err(|_| TaskError::TooManyProcesses)
    }

    /// Remove a process record. Its threads must have been removed first.
    pub fn remove_process(&mut self, id: ProcessId) -> Option<Process> {
        debug_assert!(
            self.process(id).is_none_or(|p| p.threads().is_empty()),
            "process {id:?} removed with live threads"
        );
        self.processes.remove(id.0)
    }

    /// Register `thread` with the process it names.
    ///
    /// # Errors
    /// - [`TaskError::UnknownProcess`], [`TaskError::ProcessInactive`].
    /// - [`TaskError::ProcessFull`] at `MAX_THREADS_PER_PROCESS`.
    /// - [`TaskError::TooManyThreads`] at `MAX_THREADS`.
    pub fn add_thread(&mut self, thread: Thread) -> Result<ThreadId, TaskError> {
        let pid = thread.process;
        let process = self.process(pid).ok_or(TaskError::UnknownProcess)?;
        if !process.active {
            return Err(TaskError::ProcessInactive(pid));
        }
        if process.is_full() {
            return Err(TaskError::ProcessFull(pid));
        }
        let id = self
            .threads
            .insert(thread)
            .map(ThreadId)
            .map_err(|_| TaskError::TooManyThreads)?;
        if let Some(process) = self.processes.get_mut(pid.0) {
            process.attach(pid, id)?;
        }
        Ok(id)
    }

    /// Remove a thread record and unlist it from its process.
    pub fn remove_thread(&mut self, id: ThreadId) -> Option<Thread> {
        let thread = self.threads.remove(id.0)?;
        if let Some(process) = self.processes.get_mut(thread.process.0) {
            process.detach(id);
        }
        Some(thread)
    }

    #[must_use]
    pub fn process(&self, id: ProcessId) -> Option<&Process> {
        self.processes.get(id.0)
    }

    pub fn process_mut(&mut self, id: ProcessId) -> Option<&mut Process> {
        self.processes.get_mut(id.0)
    }

    #[must_use]
    pub fn thread(&self, id: ThreadId) -> Option<&Thread> {
        self.threads.get(id.0)
    }

    pub fn thread_mut(&mut self, id: ThreadId) -> Option<&mut Thread> {
        self.threads.get_mut(id.0)
    }

    #[must_use]
    pub const fn process_count(&self) -> usize {
        self.processes.len()
    }

    #[must_use]
    pub const fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn process_ids(&self) -> impl Iterator<Item = ProcessId> + '_ {
        self.processes.handles().map(ProcessId)
    }

    pub fn thread_ids(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.threads.handles().map(ThreadId)
    }

    /// `process.priority + thread.priority`.
    #[must_use]
    pub fn effective_priority(&self, id: ThreadId) -> Option<u64> {
        let thread = self.thread(id)?;
        let process = self.process(thread.process)?;
        Some(u64::from(process.priority) + u64::from(thread.priority))
    }

    /// Apply the scheduling policy to the current table.
    #[must_use]
    pub fn pick_next(&self, current: Option<ThreadId>) -> Option<ThreadId> {
        let candidates = self.threads.iter().filter_map(|(handle, thread)| {
            let id = ThreadId(handle);
            let eligible = match thread.state {
                ThreadState::Ready => true,
                ThreadState::Running => Some(id) == current,
                ThreadState::Blocked | ThreadState::Terminated => false,
            };
            let process = self.process(thread.process)?;
            (eligible && process.active).then(|| Candidate {
                thread: id,
                priority: u64::from(process.priority) + u64::from(thread.priority),
            })
        });
        pick_next(candidates, current)
    }

    /// Move every Blocked thread whose deadline is at or before `now` back
    /// to Ready. Returns the woken threads.
    pub fn wake_expired(&mut self, now: u64) -> Vec<ThreadId> {
        let mut woken = Vec::new();
        for (handle, thread) in self.threads.iter_mut() {
            if thread.state == ThreadState::Blocked && thread.wake_at.is_some_and(|t| t <= now) {
                thread.state = ThreadState::Ready;
                thread.wake_at = None;
                let id = ThreadId(handle);
                debug!("task: {id:?} woke at tick {now}");
                woken.push(id);
            }
        }
        woken
    }
}

/// Three distinct thread ids in ascending order.
#[cfg(test)]
pub(crate) fn test_ids() -> [ThreadId; 3] {
    let mut arena = Arena::with_capacity(3);
    [(); 3].map(|()| ThreadId(arena.insert(()).unwrap()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_alloc::arena::Arena;
    use kernel_alloc::vmm::SpaceId;
    use kernel_info::memory::MAX_THREADS_PER_PROCESS;
    use kernel_memory_addresses::VirtualAddress;

    /// A `SpaceId` for records that never touch memory.
    fn any_space() -> SpaceId {
        SpaceId::from_handle(Arena::with_capacity(1).insert(()).unwrap())
    }

    fn thread(process: ProcessId, priority: u32) -> Thread {
        Thread::new(process, priority, 0x1000, VirtualAddress::new(0xD000_0000), 4096)
    }

    #[test]
    fn threads_are_listed_by_their_process() {
        let mut table = TaskTable::new();
        let p = table.add_process(Process::new("p", 0, any_space(), None)).unwrap();
        let t1 = table.add_thread(thread(p, 1)).unwrap();
        let t2 = table.add_thread(thread(p, 1)).unwrap();
        assert_eq!(table.process(p).unwrap().threads(), [t1, t2]);

        table.remove_thread(t1).unwrap();
        assert_eq!(table.process(p).unwrap().threads(), [t2]);
        assert!(table.thread(t1).is_none());
        assert!(table.remove_thread(t1).is_none());
    }

    #[test]
    fn process_thread_limit() {
        let mut table = TaskTable::new();
        let p = table.add_process(Process::new("p", 0, any_space(), None)).unwrap();
        for _ in 0..MAX_THREADS_PER_PROCESS {
            table.add_thread(thread(p, 0)).unwrap();
        }
        assert_eq!(table.add_thread(thread(p, 0)), Err(TaskError::ProcessFull(p)));
        assert_eq!(table.thread_count(), MAX_THREADS_PER_PROCESS);
    }

    #[test]
    fn inactive_processes_take_no_threads_and_are_not_scheduled() {
        let mut table = TaskTable::new();
        let p = table.add_process(Process::new("p", 0, any_space(), None)).unwrap();
        let t = table.add_thread(thread(p, 0)).unwrap();
        assert_eq!(table.pick_next(None), Some(t));

        table.process_mut(p).unwrap().active = false;
        assert_eq!(table.pick_next(None), None);
        assert_eq!(table.add_thread(thread(p, 0)), Err(TaskError::ProcessInactive(p)));
    }

    #[test]
    fn process_priority_adds_to_thread_priority() {
        let mut table = TaskTable::new();
        let low = table.add_process(Process::new("low", 0, any_space(), None)).unwrap();
        let high = table.add_process(Process::new("high", 5, any_space(), None)).unwrap();
        let a = table.add_thread(thread(low, 4)).unwrap();
        let b = table.add_thread(thread(high, 0)).unwrap();
        assert_eq!(table.effective_priority(a), Some(4));
        assert_eq!(table.effective_priority(b), Some(5));
        assert_eq!(table.pick_next(None), Some(b));
    }

    #[test]
    fn blocked_threads_wake_at_their_deadline() {
        let mut table = TaskTable::new();
        let p = table.add_process(Process::new("p", 0, any_space(), None)).unwrap();
        let t = table.add_thread(thread(p, 0)).unwrap();
        let other = table.add_thread(thread(p, 0)).unwrap();
        {
            let th = table.thread_mut(t).unwrap();
            th.state = ThreadState::Blocked;
            th.wake_at = Some(5);
        }
        table.thread_mut(other).unwrap().state = ThreadState::Blocked;

        assert!(table.wake_expired(4).is_empty());
        assert_eq!(table.wake_expired(5), [t]);
        assert_eq!(table.thread(t).unwrap().state, ThreadState::Ready);
        assert_eq!(table.thread(other).unwrap().state, ThreadState::Blocked);
    }

    #[test]
    fn waking_touches_only_expired_sleepers() {
        let mut table = TaskTable::new();
        let p = table.add_process(Process::new("p", 0, any_space(), None)).unwrap();
        let gone = table.add_thread(thread(p, 0)).unwrap();
        let ready = table.add_thread(thread(p, 0)).unwrap();
        let sleeper = table.add_thread(thread(p, 0)).unwrap();
        table.thread_mut(ready).unwrap().wake_at = Some(1);
        {
            let th = table.thread_mut(sleeper).unwrap();
            th.state = ThreadState::Blocked;
            th.wake_at = Some(1);
        }
        table.remove_thread(gone).unwrap();

        assert_eq!(table.wake_expired(1), [sleeper]);
        assert_eq!(table.thread(ready).unwrap().wake_at, Some(1));
        assert!(table.wake_expired(2).is_empty());
    }

    #[test]
    fn stale_ids_are_rejected() {
        let mut table = TaskTable::new();
        let p = table.add_process(Process::new("p", 0, any_space(), None)).unwrap();
        let t = table.add_thread(thread(p, 0)).unwrap();
        table.remove_thread(t).unwrap();
        let reused = table.add_thread(thread(p, 0)).unwrap();
        assert_eq!(reused.handle().index(), t.handle().index());
        assert_ne!(reused, t);
        assert!(table.thread(t).is_none());
    }
}
