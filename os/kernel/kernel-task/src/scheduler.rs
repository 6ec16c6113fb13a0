//! # Priority Scheduler
//!
//! Single CPU, strict priority:
//!
//! 1. Candidates are the Ready threads of active processes, plus the current
//!    thread if it is still Running.
//! 2. A candidate's effective priority is `process.priority + thread.priority`.
//! 3. The highest effective priority wins. Among equals, the current thread
//!    keeps the CPU if it is one of them; otherwise the lowest [`ThreadId`]
//!    wins.
//!
//! The choice depends only on priorities and Ready-set membership, so the
//! same state always yields the same pick.

use crate::context::RegisterContext;
use crate::thread::ThreadId;

/// One runnable thread as the scheduler sees it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Candidate {
    pub thread: ThreadId,
    pub priority: u64,
}

/// Choose the next thread to run. `None` if there is no candidate.
pub fn pick_next<I>(candidates: I, current: Option<ThreadId>) -> Option<ThreadId>
where
    I: IntoIterator<Item = Candidate>,
{
    let mut best: Option<Candidate> = None;
    let mut current_priority = None;
    for c in candidates {
        if Some(c.thread) == current {
            current_priority = Some(c.priority);
        }
        let wins = best.is_none_or(|b| {
            c.priority > b.priority || (c.priority == b.priority && c.thread < b.thread)
        });
        if wins {
            best = Some(c);
        }
    }
    let best = best?;
    match (current, current_priority) {
        (Some(cur), Some(p)) if p == best.priority => Some(cur),
        _ => Some(best.thread),
    }
}

/// What a call to `schedule` did.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Schedule {
    /// The current thread keeps running.
    Continue(ThreadId),
    /// Control moved from `from` (or the idle context) to `to`.
    Switched { from: Option<ThreadId>, to: ThreadId },
    /// Nothing is runnable; the CPU idles.
    Idle,
}

impl Schedule {
    /// The thread running after the decision, if any.
    #[must_use]
    pub const fn running(self) -> Option<ThreadId> {
        match self {
            Self::Continue(t) | Self::Switched { to: t, .. } => Some(t),
            Self::Idle => None,
        }
    }
}

/// Per-CPU scheduler bookkeeping.
#[derive(Debug, Default)]
pub struct Scheduler {
    current: Option<ThreadId>,
    /// Where the boot/idle flow is parked while a thread runs.
    idle: RegisterContext,
    /// Sink for the registers of a thread that terminated itself.
    scratch: RegisterContext,
    ticks: u64,
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn current(&self) -> Option<ThreadId> {
        self.current
    }

    pub const fn set_current(&mut self, thread: Option<ThreadId>) {
        self.current = thread;
    }

    #[must_use]
    pub const fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Advance the tick counter and return the new value.
    pub const fn tick(&mut self) -> u64 {
        self.ticks = self.ticks.wrapping_add(1);
        self.ticks
    }

    #[must_use]
    pub const fn idle_context(&self) -> &RegisterContext {
        &self.idle
    }

    pub const fn idle_context_mut(&mut self) -> &mut RegisterContext {
        &mut self.idle
    }

    pub const fn scratch_context_mut(&mut self) -> &mut RegisterContext {
        &mut self.scratch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::test_ids;

    fn c(thread: ThreadId, priority: u64) -> Candidate {
        Candidate { thread, priority }
    }

    #[test]
    fn highest_priority_wins() {
        let [a, b, d] = test_ids();
        assert_eq!(pick_next([c(a, 1), c(b, 3), c(d, 2)], None), Some(b));
    }

    #[test]
    fn ties_go_to_the_lowest_id() {
        let [a, b, d] = test_ids();
        assert_eq!(pick_next([c(d, 2), c(b, 2), c(a, 1)], None), Some(b));
    }

    #[test]
    fn ties_keep_the_current_thread() {
        let [a, b, d] = test_ids();
        assert_eq!(pick_next([c(a, 2), c(b, 2), c(d, 2)], Some(d)), Some(d));
        assert_eq!(pick_next([c(a, 2), c(b, 5), c(d, 2)], Some(d)), Some(b));
    }

    #[test]
    fn no_candidates_means_idle() {
        let [a, ..] = test_ids();
        assert_eq!(pick_next([], Some(a)), None);
    }
}
