//! Scheduler
//!
//! Ready/blocked task queues, preemptive round-robin scheduling, and the
//! idle-loop runtime. `init()` wires up SMP-aware queues and the
//! preemption timer; `start()` hands control to the runtime loop and
//! never returns.

#![allow(dead_code)]

pub mod blocker;
pub mod init;
pub mod ipc_blocking;
pub mod load_balance;
pub mod metrics;
pub mod numa;
pub mod percpu_queue;
pub mod process_compat;
pub mod queue;
pub mod runtime;
pub mod scheduler;
pub mod smp;
pub mod task;
pub mod task_management;
pub mod task_ptr;

pub use blocker::{ThreadBlocker, WakeReason};
pub use init::init_with_bootstrap;
pub use queue::READY_QUEUE;
pub use runtime::{has_ready_tasks, start};
pub use scheduler::SCHEDULER;
pub use task::{Priority, SchedClass, Task};

pub use crate::process::{ProcessId, ProcessState, ThreadId};

/// Initialize the scheduler (ready queues, SMP percpu state, preemption
/// timer). Does not start executing tasks; call `start()` for that once
/// the bootstrap task has handed off.
pub fn init() {
    init::init();
}

/// Enter the scheduler main loop (ready-task dispatch, idle when empty).
/// Never returns.
pub fn run() -> ! {
    runtime::run();
}
