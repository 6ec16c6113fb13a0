use kernel::{ErrorKind, KernelError, KernelState, Schedule, SimulatedPlatform, ThreadState};
use kernel_info::config::KernelConfig;
use kernel_info::memory::{KERNEL_STACK_SIZE, MAX_PROCESSES, MAX_THREADS_PER_PROCESS};
use kernel_sync::InterruptControl;
use kernel_task::TaskError;

const ENTRY: u32 = 0xC010_0000;

fn boot() -> KernelState<SimulatedPlatform> {
    KernelState::boot(KernelConfig::default(), SimulatedPlatform::new()).unwrap()
}

#[test]
fn higher_priority_runs_first_until_it_sleeps() {
    let mut k = boot();
    let p = k.create_process("p", 0).unwrap();
    let t1 = k.create_thread(p, ENTRY, 1).unwrap();
    let t2 = k.create_thread(p, ENTRY, 3).unwrap();

    assert_eq!(k.schedule(), Schedule::Switched { from: None, to: t2 });
    assert_eq!(k.current_thread(), Some(t2));

    let after_sleep = k.sleep_thread(t2).unwrap();
    assert_eq!(
        after_sleep,
        Some(Schedule::Switched {
            from: Some(t2),
            to: t1
        })
    );
    assert_eq!(k.schedule(), Schedule::Continue(t1));
    assert_eq!(k.thread_state(t2), ThreadState::Blocked);

    assert_eq!(k.terminate_thread(t1).unwrap(), Some(Schedule::Idle));
    assert_eq!(k.current_thread(), None);
    assert_eq!(k.thread_state(t1), ThreadState::Terminated);
}

#[test]
fn woken_thread_preempts_on_next_schedule() {
    let mut k = boot();
    let p = k.create_process("p", 0).unwrap();
    let t1 = k.create_thread(p, ENTRY, 1).unwrap();
    let t2 = k.create_thread(p, ENTRY, 2).unwrap();

    assert_eq!(k.schedule().running(), Some(t2));
    k.sleep_thread(t2).unwrap();
    assert_eq!(k.current_thread(), Some(t1));

    assert!(k.wake_thread(t2).unwrap());
    assert_eq!(k.thread_state(t2), ThreadState::Ready);
    assert_eq!(
        k.schedule(),
        Schedule::Switched {
            from: Some(t1),
            to: t2
        }
    );
    assert_eq!(k.thread_state(t1), ThreadState::Ready);
}

#[test]
fn waking_a_ready_thread_is_a_no_op() {
    let mut k = boot();
    let p = k.create_process("p", 0).unwrap();
    let t = k.create_thread(p, ENTRY, 0).unwrap();
    assert!(!k.wake_thread(t).unwrap());
    assert_eq!(k.thread_state(t), ThreadState::Ready);
}

#[test]
fn equal_priority_keeps_the_running_thread() {
    let mut k = boot();
    let p = k.create_process("p", 0).unwrap();
    let first = k.create_thread(p, ENTRY, 1).unwrap();
    let _second = k.create_thread(p, ENTRY, 1).unwrap();

    assert_eq!(k.schedule().running(), Some(first));
    assert_eq!(k.schedule(), Schedule::Continue(first));
}

#[test]
fn yield_rotates_to_an_equal_priority_peer() {
    let mut k = boot();
    let p = k.create_process("p", 0).unwrap();
    let a = k.create_thread(p, ENTRY, 1).unwrap();
    let b = k.create_thread(p, ENTRY, 1).unwrap();
    assert_eq!(k.schedule().running(), Some(a));

    // Ties go to the running thread, and a yielding thread is still eligible.
    assert_eq!(k.yield_now().running(), Some(a));
    k.set_thread_priority(b, 2).unwrap();
    assert_eq!(
        k.yield_now(),
        Schedule::Switched {
            from: Some(a),
            to: b
        }
    );
}

#[test]
fn process_priority_adds_to_thread_priority() {
    let mut k = boot();
    let low = k.create_process("low", 0).unwrap();
    let high = k.create_process("high", 5).unwrap();
    let t_low = k.create_thread(low, ENTRY, 4).unwrap();
    let t_high = k.create_thread(high, ENTRY, 0).unwrap();

    assert_eq!(k.schedule().running(), Some(t_high));
    k.set_process_priority(high, 0).unwrap();
    assert_eq!(k.schedule().running(), Some(t_low));
}

#[test]
fn switching_between_processes_loads_their_directory() {
    let mut k = boot();
    let a = k.create_process("a", 0).unwrap();
    let b = k.create_process("b", 0).unwrap();
    let ta = k.create_thread(a, ENTRY, 2).unwrap();
    let _tb = k.create_thread(b, ENTRY, 1).unwrap();
    k.platform().clear_records();

    assert_eq!(k.schedule().running(), Some(ta));
    let space_a = k.process(a).unwrap().space;
    assert_eq!(k.active_space(), space_a);
    assert_eq!(k.platform().directory_loads().len(), 1);

    k.sleep_thread(ta).unwrap();
    let space_b = k.process(b).unwrap().space;
    assert_eq!(k.active_space(), space_b);
    assert_eq!(k.platform().directory_loads().len(), 2);
}

#[test]
fn fresh_thread_starts_at_its_entry_point() {
    let mut k = boot();
    let p = k.create_process("p", 0).unwrap();
    let t = k.create_thread(p, ENTRY, 0).unwrap();
    let stack = k.thread(t).unwrap().stack;
    k.platform().clear_records();

    k.schedule();
    let switches = k.platform().switches();
    assert_eq!(switches.len(), 1);
    assert_eq!(switches[0].eip, ENTRY);
    assert!(switches[0].esp <= stack.as_u32() + KERNEL_STACK_SIZE);
    assert!(switches[0].esp > stack.as_u32());
    assert_eq!(switches[0].esp % 16, 0);
}

#[test]
fn timed_sleep_ends_on_the_timer() {
    let mut k = boot();
    let p = k.create_process("p", 0).unwrap();
    let t = k.create_thread(p, ENTRY, 0).unwrap();
    assert_eq!(k.schedule().running(), Some(t));

    assert_eq!(k.sleep_thread_for(t, 3).unwrap(), Some(Schedule::Idle));
    assert_eq!(k.on_timer_tick(), Schedule::Idle);
    assert_eq!(k.on_timer_tick(), Schedule::Idle);
    assert_eq!(k.thread_state(t), ThreadState::Blocked);
    assert_eq!(
        k.on_timer_tick(),
        Schedule::Switched { from: None, to: t }
    );
    assert_eq!(k.ticks(), 3);
}

#[test]
fn idle_halts_when_nothing_is_runnable() {
    let mut k = boot();
    assert_eq!(k.idle(), Schedule::Idle);
    assert_eq!(k.platform().halts(), 1);
}

#[test]
fn terminating_a_process_releases_everything() {
    let mut k = boot();
    let p = k.create_process("p", 0).unwrap();
    let t1 = k.create_thread(p, ENTRY, 0).unwrap();
    let t2 = k.create_thread(p, ENTRY, 0).unwrap();
    let space = k.process(p).unwrap().space;
    k.schedule();
    let heap_blocks = k.heap().live_blocks();
    assert_eq!(heap_blocks, 2);

    assert_eq!(k.terminate_process(p).unwrap(), Some(Schedule::Idle));
    assert!(k.process(p).is_none());
    assert_eq!(k.thread_state(t1), ThreadState::Terminated);
    assert_eq!(k.thread_state(t2), ThreadState::Terminated);
    assert_eq!(k.heap().live_blocks(), 0);
    assert!(!k.vmm().contains(space));
    assert_eq!(k.active_space(), k.kernel_space());
}

#[test]
fn stale_ids_are_rejected() {
    let mut k = boot();
    let p = k.create_process("p", 0).unwrap();
    let t = k.create_thread(p, ENTRY, 0).unwrap();
    k.terminate_thread(t).unwrap();

    let err = k.wake_thread(t).unwrap_err();
    assert_eq!(err, KernelError::Task(TaskError::UnknownThread));
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(
        k.terminate_thread(t).unwrap_err(),
        KernelError::Task(TaskError::UnknownThread)
    );

    k.terminate_process(p).unwrap();
    assert_eq!(
        k.create_thread(p, ENTRY, 0).unwrap_err(),
        KernelError::Task(TaskError::UnknownProcess)
    );
}

#[test]
fn thread_limit_per_process_is_enforced() {
    let mut k = boot();
    let p = k.create_process("p", 0).unwrap();
    for _ in 0..MAX_THREADS_PER_PROCESS {
        k.create_thread(p, ENTRY, 0).unwrap();
    }
    let err = k.create_thread(p, ENTRY, 0).unwrap_err();
    assert_eq!(err, KernelError::Task(TaskError::ProcessFull(p)));
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    // The rejected thread's stack went back to the heap.
    assert_eq!(k.heap().live_blocks(), MAX_THREADS_PER_PROCESS);
}

#[test]
fn process_limit_is_enforced() {
    let mut k = boot();
    for i in 0..MAX_PROCESSES {
        k.create_process(&format!("p{i}"), 0).unwrap();
    }
    let spaces = k.vmm().space_count();
    let err = k.create_process("one too many", 0).unwrap_err();
    assert_eq!(err, KernelError::Task(TaskError::TooManyProcesses));
    assert_eq!(k.vmm().space_count(), spaces);
}

#[test]
fn child_processes_record_their_parent() {
    let mut k = boot();
    let init = k.create_process("init", 0).unwrap();
    assert_eq!(k.process(init).unwrap().parent, None);
    k.create_thread(init, ENTRY, 0).unwrap();
    assert_eq!(k.current_process(), None);
    k.schedule();
    assert_eq!(k.current_process(), Some(init));

    let child = k.create_process("child", 0).unwrap();
    assert_eq!(k.process(child).unwrap().parent, Some(init));
}

#[test]
fn long_names_are_truncated() {
    let mut k = boot();
    let name = "x".repeat(100);
    let p = k.create_process(&name, 0).unwrap();
    assert_eq!(k.process(p).unwrap().name().len(), 63);
}

#[test]
fn operations_restore_the_interrupt_flag() {
    let mut k = boot();
    assert!(k.platform().interrupts_enabled());
    let p = k.create_process("p", 0).unwrap();
    let t = k.create_thread(p, ENTRY, 0).unwrap();
    k.schedule();
    k.sleep_thread(t).unwrap();
    k.wake_thread(t).unwrap();
    k.on_timer_tick();
    let va = k.kmalloc(100).unwrap();
    k.kfree(va);

    assert!(k.platform().interrupts_enabled());
    assert!(k.platform().interrupt_disables() >= 8);
}

#[test]
fn each_call_masks_interrupts_once() {
    let mut k = boot();
    let p = k.create_process("p", 0).unwrap();
    let t = k.create_thread(p, ENTRY, 0).unwrap();
    k.schedule();
    k.on_timer_tick();
    k.on_timer_tick();

    k.platform().clear_records();
    let va = k.vmalloc(4096).unwrap();
    assert_eq!(k.platform().interrupt_disables(), 1);
    assert!(k.vfree(va));
    assert_eq!(k.platform().interrupt_disables(), 2);
    k.sleep_thread_for(t, 2).unwrap();
    assert_eq!(k.platform().interrupt_disables(), 3);
    assert!(k.platform().interrupts_enabled());

    // The deadline counts from the tick the call was made on.
    k.on_timer_tick();
    assert_eq!(k.thread_state(t), ThreadState::Blocked);
    k.on_timer_tick();
    assert_eq!(k.thread_state(t), ThreadState::Running);
    assert_eq!(k.ticks(), 4);
}
