//! # Kernel State
//!
//! [`KernelState`] owns the frame allocator, the address-space manager, the
//! kernel heap, the process/thread table and the scheduler, plus the
//! platform they run on. It is created once by [`KernelState::boot`] and
//! handed around by `&mut`.
//!
//! Every public operation that changes memory-management or scheduler state
//! runs inside an [`IrqGuard`]: interrupts are off for its duration and come
//! back only if they were on before.

use crate::error::KernelError;
use crate::platform::Platform;
use alloc::vec::Vec;
use core::ptr;
use kernel_alloc::frame_alloc::BitmapFrameAllocator;
use kernel_alloc::heap::KernelHeap;
use kernel_alloc::vmm::{SpaceId, Vmm};
use kernel_info::config::KernelConfig;
use kernel_info::memory::{KERNEL_BASE, KERNEL_STACK_SIZE, MAX_PROCESSES, STACK_ALIGN};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress};
use kernel_sync::IrqGuard;
use kernel_task::{
    Priority, Process, ProcessId, RegisterContext, Schedule, Scheduler, TaskError, TaskTable,
    Thread, ThreadId, ThreadState,
};
use kernel_vmem::{PageEntryBits, VmError};
use log::{debug, error, info};

/// The execution core of the kernel.
pub struct KernelState<P: Platform> {
    platform: P,
    config: KernelConfig,
    core: Core,
}

/// Everything but the platform, so operations can borrow both at once.
struct Core {
    frames: BitmapFrameAllocator,
    vmm: Vmm,
    heap: KernelHeap,
    tasks: TaskTable,
    scheduler: Scheduler,
}

impl<P: Platform> KernelState<P> {
    /// Bring up memory management on `platform`.
    ///
    /// 1. Validate `config`.
    /// 2. Build the frame bitmap and reserve the low frames.
    /// 3. Carve out the table pool and build the kernel space with all of
    ///    its kernel-half tables.
    /// 4. Map the kernel window (`KERNEL_BASE + pa → pa`).
    /// 5. Load the kernel space.
    ///
    /// The scheduler starts idle with no processes.
    ///
    /// # Errors
    /// [`KernelError::Config`] for an inconsistent configuration; an
    /// exhaustion error if the pool or window cannot be set up.
    pub fn boot(config: KernelConfig, platform: P) -> Result<Self, KernelError> {
        config.validate()?;
        let core = {
            let _irq = IrqGuard::new(&platform);

            let mut frames = BitmapFrameAllocator::new(config.frame_count);
            frames.reserve(0..config.reserved_frames);
            let mut vmm = Vmm::new(&mut frames, &platform, config.table_pool_capacity)?;

            let kernel = vmm.kernel_space();
            for frame in 0..config.kernel_image_frames {
                let offset = frame * PAGE_SIZE;
                vmm.map(
                    &platform,
                    kernel,
                    VirtualAddress::new(KERNEL_BASE + offset),
                    PhysicalAddress::new(offset),
                    PageEntryBits::kernel_rw(),
                )?;
            }
            vmm.activate_kernel(&platform);

            info!(
                "kernel: {} frames ({} free), {} table slots, {} KiB window",
                frames.frame_count(),
                frames.free_count(),
                vmm.table_pool().capacity(),
                config.kernel_image_frames * PAGE_SIZE / 1024
            );

            Core {
                frames,
                vmm,
                heap: KernelHeap::new(),
                tasks: TaskTable::new(),
                scheduler: Scheduler::new(),
            }
        };
        Ok(Self {
            platform,
            config,
            core,
        })
    }

    #[must_use]
    pub const fn platform(&self) -> &P {
        &self.platform
    }

    #[must_use]
    pub const fn config(&self) -> &KernelConfig {
        &self.config
    }

    #[must_use]
    pub const fn frames(&self) -> &BitmapFrameAllocator {
        &self.core.frames
    }

    #[must_use]
    pub const fn vmm(&self) -> &Vmm {
        &self.core.vmm
    }

    #[must_use]
    pub const fn heap(&self) -> &KernelHeap {
        &self.core.heap
    }

    #[must_use]
    pub const fn tasks(&self) -> &TaskTable {
        &self.core.tasks
    }

    // --- memory -----------------------------------------------------------

    /// # Errors
    /// See [`KernelHeap::kmalloc_aligned`].
    pub fn kmalloc(&mut self, size: u32) -> Result<VirtualAddress, KernelError> {
        let _irq = IrqGuard::new(&self.platform);
        let c = &mut self.core;
        Ok(c.heap.kmalloc(&mut c.vmm, &mut c.frames, &self.platform, size)?)
    }

    /// # Errors
    /// See [`KernelHeap::kmalloc_aligned`].
    pub fn kmalloc_aligned(&mut self, size: u32, align: u32) -> Result<VirtualAddress, KernelError> {
        let _irq = IrqGuard::new(&self.platform);
        let c = &mut self.core;
        Ok(c.heap
            .kmalloc_aligned(&mut c.vmm, &mut c.frames, &self.platform, size, align)?)
    }

    /// Free a heap block. `false` if `va` is not a live block.
    pub fn kfree(&mut self, va: VirtualAddress) -> bool {
        let _irq = IrqGuard::new(&self.platform);
        self.core.heap.kfree(va).is_some()
    }

    /// Allocate whole pages in the active address space.
    ///
    /// # Errors
    /// See [`Vmm::vmalloc_in`].
    pub fn vmalloc(&mut self, size: u32) -> Result<VirtualAddress, KernelError> {
        let _irq = IrqGuard::new(&self.platform);
        let c = &mut self.core;
        Ok(c.vmm.vmalloc(&mut c.frames, &self.platform, size)?)
    }

    /// # Errors
    /// See [`Vmm::vmalloc_in`].
    pub fn vmalloc_in(&mut self, space: SpaceId, size: u32) -> Result<VirtualAddress, KernelError> {
        let _irq = IrqGuard::new(&self.platform);
        let c = &mut self.core;
        Ok(c.vmm.vmalloc_in(&mut c.frames, &self.platform, space, size)?)
    }

    /// Free a `vmalloc` region of the active space. `false` if none starts
    /// at `va`.
    pub fn vfree(&mut self, va: VirtualAddress) -> bool {
        let _irq = IrqGuard::new(&self.platform);
        let c = &mut self.core;
        c.vmm.vfree(&mut c.frames, &self.platform, va).unwrap_or(false)
    }

    /// # Errors
    /// [`VmError::UnknownSpace`] for a stale space id.
    pub fn vfree_in(&mut self, space: SpaceId, va: VirtualAddress) -> Result<bool, KernelError> {
        let _irq = IrqGuard::new(&self.platform);
        let c = &mut self.core;
        Ok(c.vmm.vfree_in(&mut c.frames, &self.platform, space, va)?)
    }

    // --- address spaces ---------------------------------------------------

    /// # Errors
    /// [`VmError::TablePoolExhausted`] or [`VmError::TooManySpaces`].
    pub fn create_address_space(&mut self) -> Result<SpaceId, KernelError> {
        let _irq = IrqGuard::new(&self.platform);
        Ok(self.core.vmm.create_address_space(&self.platform)?)
    }

    /// Make `space` active. `false` if it already was.
    ///
    /// # Errors
    /// [`VmError::UnknownSpace`] for a stale space id.
    pub fn switch_address_space(&mut self, space: SpaceId) -> Result<bool, KernelError> {
        let _irq = IrqGuard::new(&self.platform);
        Ok(self.core.vmm.switch(&self.platform, space)?)
    }

    /// Destroy an address space no process owns.
    ///
    /// # Errors
    /// - [`KernelError::SpaceInUse`] if a process owns it.
    /// - [`VmError::KernelSpace`], [`VmError::UnknownSpace`].
    pub fn destroy_address_space(&mut self, space: SpaceId) -> Result<(), KernelError> {
        let _irq = IrqGuard::new(&self.platform);
        let c = &mut self.core;
        let owned = c
            .tasks
            .process_ids()
            .filter_map(|p| c.tasks.process(p))
            .any(|p| p.space == space);
        if owned {
            return Err(KernelError::SpaceInUse);
        }
        Ok(c.vmm.destroy(&mut c.frames, &self.platform, space)?)
    }

    /// Map one page; returns the physical address it mapped before.
    ///
    /// # Errors
    /// See [`kernel_vmem::AddressSpace::map`].
    pub fn map_page(
        &mut self,
        space: SpaceId,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageEntryBits,
    ) -> Result<Option<PhysicalAddress>, KernelError> {
        let _irq = IrqGuard::new(&self.platform);
        Ok(self.core.vmm.map(&self.platform, space, va, pa, flags)?)
    }

    /// Unmap one page; returns the physical address it mapped, if any.
    ///
    /// # Errors
    /// See [`kernel_vmem::AddressSpace::unmap`].
    pub fn unmap_page(
        &mut self,
        space: SpaceId,
        va: VirtualAddress,
    ) -> Result<Option<PhysicalAddress>, KernelError> {
        let _irq = IrqGuard::new(&self.platform);
        Ok(self.core.vmm.unmap(&self.platform, space, va)?)
    }

    /// # Errors
    /// [`VmError::UnknownSpace`] for a stale space id.
    pub fn translate(
        &self,
        space: SpaceId,
        va: VirtualAddress,
    ) -> Result<Option<PhysicalAddress>, KernelError> {
        Ok(self.core.vmm.query(&self.platform, space, va)?)
    }

    #[must_use]
    pub const fn active_space(&self) -> SpaceId {
        self.core.vmm.active_space()
    }

    #[must_use]
    pub const fn kernel_space(&self) -> SpaceId {
        self.core.vmm.kernel_space()
    }

    // --- processes and threads --------------------------------------------

    /// Create a process with a fresh address space and no threads. The
    /// current process, if any, becomes its parent.
    ///
    /// # Errors
    /// [`TaskError::TooManyProcesses`] or an address-space exhaustion error.
    pub fn create_process(&mut self, name: &str, priority: Priority) -> Result<ProcessId, KernelError> {
        let _irq = IrqGuard::new(&self.platform);
        let c = &mut self.core;
        if c.tasks.process_count() >= MAX_PROCESSES {
            return Err(TaskError::TooManyProcesses.into());
        }
        let parent = c.current_process();
        let space = c.vmm.create_address_space(&self.platform)?;
        match c.tasks.add_process(Process::new(name, priority, space, parent)) {
            Ok(id) => {
                debug!("task: created process {id:?} {name:?} priority {priority}");
                Ok(id)
            }
            Err(e) => {
                c.vmm.destroy(&mut c.frames, &self.platform, space)?;
                Err(e.into())
            }
        }
    }

    /// Create a Ready thread in `process` starting at `entry_point`, with a
    /// fresh `KERNEL_STACK_SIZE` kernel stack from the heap.
    ///
    /// # Errors
    /// - [`TaskError::UnknownProcess`], [`TaskError::ProcessInactive`].
    /// - [`TaskError::ProcessFull`], [`TaskError::TooManyThreads`] (the
    ///   stack is released again).
    /// - A heap error if the stack cannot be allocated.
    pub fn create_thread(
        &mut self,
        process: ProcessId,
        entry_point: u32,
        priority: Priority,
    ) -> Result<ThreadId, KernelError> {
        let _irq = IrqGuard::new(&self.platform);
        let c = &mut self.core;
        c.tasks.process(process).ok_or(TaskError::UnknownProcess)?;

        let stack = c.heap.kmalloc_aligned(
            &mut c.vmm,
            &mut c.frames,
            &self.platform,
            KERNEL_STACK_SIZE,
            STACK_ALIGN,
        )?;
        let thread = Thread::new(process, priority, entry_point, stack, KERNEL_STACK_SIZE);
        match c.tasks.add_thread(thread) {
            Ok(id) => {
                debug!("task: created thread {id:?} in {process:?} at {entry_point:#010x}");
                Ok(id)
            }
            Err(e) => {
                c.heap.kfree(stack);
                Err(e.into())
            }
        }
    }

    /// Terminate a thread: release its stack and remove it from its process.
    ///
    /// Returns the scheduling decision if the thread was running.
    ///
    /// # Errors
    /// [`TaskError::UnknownThread`] for a stale id.
    pub fn terminate_thread(&mut self, thread: ThreadId) -> Result<Option<Schedule>, KernelError> {
        let _irq = IrqGuard::new(&self.platform);
        let c = &mut self.core;
        c.reap_thread(thread)?;
        if c.scheduler.current() == Some(thread) {
            return Ok(Some(c.schedule(&self.platform)));
        }
        Ok(None)
    }

    /// Terminate every thread of `process`, destroy its address space and
    /// remove it.
    ///
    /// Returns the scheduling decision if the running thread belonged to it.
    ///
    /// # Errors
    /// [`TaskError::UnknownProcess`] for a stale id.
    pub fn terminate_process(&mut self, process: ProcessId) -> Result<Option<Schedule>, KernelError> {
        let _irq = IrqGuard::new(&self.platform);
        let c = &mut self.core;
        let record = c.tasks.process_mut(process).ok_or(TaskError::UnknownProcess)?;
        record.active = false;
        let threads: Vec<ThreadId> = record.threads().to_vec();
        let space = record.space;

        let was_running = c
            .scheduler
            .current()
            .is_some_and(|t| threads.contains(&t));
        for thread in threads {
            c.reap_thread(thread)?;
        }
        c.tasks.remove_process(process);
        match c.vmm.destroy(&mut c.frames, &self.platform, space) {
            Ok(()) | Err(VmError::UnknownSpace) => {}
            Err(e) => return Err(e.into()),
        }
        debug!("task: terminated process {process:?}");

        if was_running {
            return Ok(Some(c.schedule(&self.platform)));
        }
        Ok(None)
    }

    /// Pick the next thread and switch to it.
    pub fn schedule(&mut self) -> Schedule {
        let _irq = IrqGuard::new(&self.platform);
        self.core.schedule(&self.platform)
    }

    /// Give up the CPU: the running thread becomes Ready and the scheduler
    /// decides.
    pub fn yield_now(&mut self) -> Schedule {
        let _irq = IrqGuard::new(&self.platform);
        let c = &mut self.core;
        if let Some(thread) = c.scheduler.current().and_then(|t| c.tasks.thread_mut(t))
            && thread.state == ThreadState::Running
        {
            thread.state = ThreadState::Ready;
        }
        c.schedule(&self.platform)
    }

    /// Block a Ready or Running thread. Blocking the running thread
    /// reschedules; the decision is returned. Blocking a Blocked thread does
    /// nothing.
    ///
    /// # Errors
    /// [`TaskError::UnknownThread`] for a stale id.
    pub fn sleep_thread(&mut self, thread: ThreadId) -> Result<Option<Schedule>, KernelError> {
        self.block(thread, None)
    }

    /// Like [`KernelState::sleep_thread`], but the thread is woken by the
    /// timer once `ticks` more ticks have passed.
    ///
    /// # Errors
    /// [`TaskError::UnknownThread`] for a stale id.
    pub fn sleep_thread_for(
        &mut self,
        thread: ThreadId,
        ticks: u64,
    ) -> Result<Option<Schedule>, KernelError> {
        self.block(thread, Some(ticks))
    }

    /// Make a Blocked thread Ready. Returns `false` (and does nothing) for a
    /// thread that is not Blocked.
    ///
    /// # Errors
    /// [`TaskError::UnknownThread`] for a stale id.
    pub fn wake_thread(&mut self, thread: ThreadId) -> Result<bool, KernelError> {
        let _irq = IrqGuard::new(&self.platform);
        let record = self
            .core
            .tasks
            .thread_mut(thread)
            .ok_or(TaskError::UnknownThread)?;
        if record.state != ThreadState::Blocked {
            return Ok(false);
        }
        record.state = ThreadState::Ready;
        record.wake_at = None;
        debug!("task: woke {thread:?}");
        Ok(true)
    }

    /// # Errors
    /// [`TaskError::UnknownProcess`] for a stale id.
    pub fn set_process_priority(&mut self, process: ProcessId, priority: Priority) -> Result<(), KernelError> {
        let _irq = IrqGuard::new(&self.platform);
        self.core
            .tasks
            .process_mut(process)
            .ok_or(TaskError::UnknownProcess)?
            .priority = priority;
        Ok(())
    }

    /// # Errors
    /// [`TaskError::UnknownThread`] for a stale id.
    pub fn set_thread_priority(&mut self, thread: ThreadId, priority: Priority) -> Result<(), KernelError> {
        let _irq = IrqGuard::new(&self.platform);
        self.core
            .tasks
            .thread_mut(thread)
            .ok_or(TaskError::UnknownThread)?
            .priority = priority;
        Ok(())
    }

    /// Timer interrupt: advance the clock, wake expired sleepers and
    /// reschedule.
    pub fn on_timer_tick(&mut self) -> Schedule {
        let _irq = IrqGuard::new(&self.platform);
        let c = &mut self.core;
        let now = c.scheduler.tick();
        c.tasks.wake_expired(now);
        c.schedule(&self.platform)
    }

    /// Run the scheduler; if nothing is runnable, halt until the next
    /// interrupt.
    pub fn idle(&mut self) -> Schedule {
        let decision = self.schedule();
        if decision == Schedule::Idle {
            self.platform.halt();
        }
        decision
    }

    // --- queries ----------------------------------------------------------

    #[must_use]
    pub const fn current_thread(&self) -> Option<ThreadId> {
        self.core.scheduler.current()
    }

    #[must_use]
    pub fn current_process(&self) -> Option<ProcessId> {
        self.core.current_process()
    }

    /// State of `thread`. Ids only come from [`KernelState::create_thread`],
    /// so an id without a record belongs to a terminated thread.
    #[must_use]
    pub fn thread_state(&self, thread: ThreadId) -> ThreadState {
        self.core
            .tasks
            .thread(thread)
            .map_or(ThreadState::Terminated, |t| t.state)
    }

    #[must_use]
    pub fn thread(&self, thread: ThreadId) -> Option<&Thread> {
        self.core.tasks.thread(thread)
    }

    #[must_use]
    pub fn process(&self, process: ProcessId) -> Option<&Process> {
        self.core.tasks.process(process)
    }

    #[must_use]
    pub const fn ticks(&self) -> u64 {
        self.core.scheduler.ticks()
    }

    /// `true` if every address space shares the kernel space's kernel half.
    #[must_use]
    pub fn kernel_half_consistent(&self) -> bool {
        self.core.vmm.kernel_half_consistent(&self.platform)
    }

    /// Block `thread`, waking it `sleep` ticks from now if given.
    fn block(&mut self, thread: ThreadId, sleep: Option<u64>) -> Result<Option<Schedule>, KernelError> {
        let _irq = IrqGuard::new(&self.platform);
        let c = &mut self.core;
        let wake_at = sleep.map(|ticks| c.scheduler.ticks().saturating_add(ticks));
        let record = c.tasks.thread_mut(thread).ok_or(TaskError::UnknownThread)?;
        match record.state {
            ThreadState::Blocked | ThreadState::Terminated => return Ok(None),
            ThreadState::Ready | ThreadState::Running => {
                record.state = ThreadState::Blocked;
                record.wake_at = wake_at;
            }
        }
        debug!("task: {thread:?} blocked until {wake_at:?}");
        if c.scheduler.current() == Some(thread) {
            return Ok(Some(c.schedule(&self.platform)));
        }
        Ok(None)
    }
}

impl Core {
    fn current_process(&self) -> Option<ProcessId> {
        let thread = self.scheduler.current()?;
        self.tasks.thread(thread).map(|t| t.process)
    }

    /// Remove a thread record and release its stack.
    fn reap_thread(&mut self, thread: ThreadId) -> Result<(), KernelError> {
        let record = self
            .tasks
            .remove_thread(thread)
            .ok_or(TaskError::UnknownThread)?;
        self.heap.kfree(record.stack);
        debug!("task: terminated thread {thread:?}");
        Ok(())
    }

    fn schedule<P: Platform>(&mut self, platform: &P) -> Schedule {
        let current = self.scheduler.current();
        let next = self.tasks.pick_next(current);

        if let Some(thread) = next
            && next == current
        {
            // A yielding thread may have been marked Ready.
            if let Some(record) = self.tasks.thread_mut(thread) {
                record.state = ThreadState::Running;
            }
            return Schedule::Continue(thread);
        }
        if next.is_none() && current.is_none() {
            return Schedule::Idle;
        }

        let from_process = self.current_process();
        if let Some(thread) = current.and_then(|t| self.tasks.thread_mut(t))
            && thread.state == ThreadState::Running
        {
            thread.state = ThreadState::Ready;
        }

        let Some(next) = next else {
            debug!("sched: {current:?} -> idle");
            self.scheduler.set_current(None);
            let old = self.save_slot(current);
            let idle = ptr::from_ref(self.scheduler.idle_context());
            // SAFETY: both contexts live in `self`, which outlives the call.
            unsafe { platform.switch_context(old, idle) };
            return Schedule::Idle;
        };

        let Some((to_process, new)) = self
            .tasks
            .thread_mut(next)
            .map(|t| {
                t.state = ThreadState::Running;
                (t.process, ptr::from_ref(&t.context))
            })
        else {
            return Schedule::Idle;
        };
        if from_process != Some(to_process)
            && let Some(space) = self.tasks.process(to_process).map(|p| p.space)
            && let Err(e) = self.vmm.switch(platform, space)
        {
            error!("sched: cannot switch to the space of {to_process:?}: {e}");
        }

        debug!("sched: {current:?} -> {next:?}");
        self.scheduler.set_current(Some(next));
        let old = self.save_slot(current);
        // SAFETY: both contexts live in `self`, which outlives the call, and
        // `new` was prepared by `RegisterContext::for_entry` or saved by an
        // earlier switch.
        unsafe { platform.switch_context(old, new) };
        Schedule::Switched {
            from: current,
            to: next,
        }
    }

    /// Where the outgoing flow's registers go: its own record, the scratch
    /// context if it was just terminated, or the idle context if no thread
    /// was running.
    fn save_slot(&mut self, current: Option<ThreadId>) -> *mut RegisterContext {
        match current {
            None => ptr::from_mut(self.scheduler.idle_context_mut()),
            Some(t) => match self.tasks.thread_mut(t) {
                Some(thread) => ptr::from_mut(&mut thread.context),
                None => ptr::from_mut(self.scheduler.scratch_context_mut()),
            },
        }
    }
}
