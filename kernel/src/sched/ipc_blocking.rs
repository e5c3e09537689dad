//! Process/thread blocking and waking operations
//!
//! Whole-process blocking (`block_process`/`wake_up_process`, used by
//! signal delivery and `wait4`) lives here. Condition-specific parking --
//! IPC endpoints, AML `Mutex`/`Event` objects, blocking sockets -- goes
//! through `sched::blocker::ThreadBlocker` instead; this module only
//! covers the PID-addressed whole-process case those don't.

use core::sync::atomic::Ordering;

use super::{scheduler, smp};
use crate::process::{ProcessId, ProcessState};

/// Yield CPU to scheduler
pub fn yield_cpu() {
    super::SCHEDULER.lock().schedule();
}

/// Block a process (for signal handling like SIGSTOP)
/// Sets process and thread states to Blocked and triggers reschedule
pub fn block_process(pid: ProcessId) {
    #[cfg(feature = "alloc")]
    {
        // Check if this is the current task
        let scheduler = scheduler::current_scheduler();
        let sched = scheduler.lock();

        if let Some(current_task) = sched.current() {
            // SAFETY: `current_task` is a valid NonNull<Task> from the
            // scheduler. We hold the scheduler lock ensuring exclusive access
            // to the task. We read pid for comparison and potentially update
            // state and thread_ref fields.
            unsafe {
                if (*current_task.as_ptr()).pid == pid {
                    // This is the current task - block it
                    let task_mut = current_task.as_ptr();
                    (*task_mut).state = ProcessState::Blocked;

                    // Update thread state if linked
                    if let Some(thread_ptr) = (*task_mut).thread_ref {
                        // SAFETY: thread_ptr is valid for the task's lifetime.
                        thread_ptr
                            .as_ref()
                            .set_state(crate::process::thread::ThreadState::Blocked);
                    }

                    drop(sched);
                    // Force a reschedule
                    super::SCHEDULER.lock().schedule();
                    return;
                }
            }
        }
        drop(sched);

        // Look up process in the process table and block all its threads
        if let Some(process) = crate::process::table::get_process_mut(pid) {
            // Update process state
            process
                .state
                .store(ProcessState::Blocked as u32, Ordering::Release);

            // Block all threads in the process
            let threads = process.threads.lock();
            for (_tid, thread) in threads.iter() {
                thread.set_state(crate::process::thread::ThreadState::Blocked);

                // If thread has a task, update task state too
                if let Some(task_ptr) = thread.get_task_ptr() {
                    // SAFETY: task_ptr was set via Thread::set_task_ptr during
                    // task creation and points to a valid heap-allocated Task.
                    // We hold the process threads lock for synchronization.
                    unsafe {
                        (*task_ptr.as_ptr()).state = ProcessState::Blocked;
                    }
                }
            }

            kprintln!("[SCHED] Blocked process and all its threads");
        }
    }

    #[cfg(not(feature = "alloc"))]
    {
        let _ = pid;
    }
}

/// Wake up a blocked process (signal delivery, parent `wait4`, etc.)
pub fn wake_up_process(pid: ProcessId) {
    // Check if it's the current task on this CPU first.
    {
        let sched = super::SCHEDULER.lock();
        if let Some(current) = sched.current() {
            // SAFETY: `current` is a valid NonNull<Task> from the
            // scheduler. We hold the scheduler lock so the task won't
            // be modified concurrently. We only read/write task fields.
            unsafe {
                if (*current.as_ptr()).pid == pid {
                    (*current.as_ptr()).state = ProcessState::Ready;
                    if let Some(thread_ptr) = (*current.as_ptr()).thread_ref {
                        thread_ptr
                            .as_ref()
                            .set_state(crate::process::thread::ThreadState::Ready);
                    }
                    return;
                }
            }
        }
    }

    // Otherwise look it up in the process table and wake its main thread.
    #[cfg(feature = "alloc")]
    {
        if let Some(process) = crate::process::table::get_process_mut(pid) {
            process
                .state
                .store(ProcessState::Ready as u32, Ordering::Release);

            if let Some(main_tid) = process.get_main_thread_id() {
                let threads = process.threads.lock();
                if let Some(thread) = threads.get(&main_tid) {
                    thread.set_state(crate::process::thread::ThreadState::Ready);

                    if let Some(task_ptr) = thread.get_task_ptr() {
                        unsafe {
                            (*task_ptr.as_ptr()).state = ProcessState::Ready;
                        }
                        let target_cpu = if unsafe { (*task_ptr.as_ptr()).cpu_affinity.mask() } != 0
                        {
                            smp::find_least_loaded_cpu_with_affinity(unsafe {
                                (*task_ptr.as_ptr()).cpu_affinity.mask()
                            })
                        } else {
                            smp::find_least_loaded_cpu()
                        };
                        scheduler::schedule_on_cpu(target_cpu, task_ptr);
                    }
                }
            }
        }
    }
    #[cfg(not(feature = "alloc"))]
    {
        let _ = pid;
    }
}
