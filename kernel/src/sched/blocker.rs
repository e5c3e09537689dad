//! `ThreadBlocker`: the kernel's central blocking primitive.
//!
//! An intrusive-style wait queue that parks the calling thread off the
//! ready queue until `unblock`/`unblock_all` splices it back in, a
//! deadline elapses, or a signal cancels it. IPC endpoint waits
//! (`sched::ipc_blocking`), AML `Mutex`/`Event` objects
//! (`acpi::interpreter`), and blocking sockets (`net::socket`) each own
//! one `ThreadBlocker` per condition they guard rather than sharing a
//! single global queue.

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(feature = "alloc")]
use alloc::collections::VecDeque;

use core::ptr::NonNull;
use core::sync::atomic::{AtomicU8, Ordering};

use spin::Mutex;

use super::{scheduler, smp, task::Task};
use crate::process::{ProcessId, ProcessState};

/// Why a parked thread resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// `unblock`/`unblock_all` woke the thread normally.
    Woken,
    /// The deadline passed to `block_with_timeout_ns` elapsed first.
    TimedOut,
    /// A signal cancelled the wait (`cancel`).
    Interrupted,
}

const PENDING: u8 = 0;
const WOKEN: u8 = 1;
const TIMED_OUT: u8 = 2;
const INTERRUPTED: u8 = 3;

/// Ticks setup by `arch::x86_64::timer::setup_timer` at boot; see
/// `sched::init`. Kept here rather than re-derived since every
/// `ThreadBlocker` timeout is expressed against this same tick rate.
const NS_PER_TICK: u64 = 10_000_000;

/// Lives on the parked thread's own kernel stack for the duration of
/// `park()`. `reason` is written by whichever side wakes the thread;
/// the thread reads it back the instant `schedule()` returns control
/// to `park()`.
struct ParkNode {
    task: NonNull<Task>,
    pid: ProcessId,
    deadline_tick: Option<u64>,
    reason: AtomicU8,
}

#[derive(Clone, Copy)]
struct ParkNodePtr(NonNull<ParkNode>);

// SAFETY: a `ParkNodePtr` is only ever read while holding the owning
// `ThreadBlocker`'s queue lock or the global timeout registry's lock.
// The thread that owns the node does not return from `park()` (and so
// does not tear down the stack frame the node lives on) until it has
// removed the node from both.
unsafe impl Send for ParkNodePtr {}
unsafe impl Sync for ParkNodePtr {}

/// Intrusive-style wait queue plus deadline-aware park/unpark.
pub struct ThreadBlocker {
    waiters: Mutex<VecDeque<ParkNodePtr>>,
}

impl ThreadBlocker {
    pub const fn new() -> Self {
        Self {
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    /// Park the calling thread until `unblock`/`unblock_all` wakes it or
    /// a signal cancels it via `cancel`.
    pub fn block_indefinite(&self) -> WakeReason {
        self.park(None)
    }

    /// Park the calling thread until woken, cancelled, or `timeout_ns`
    /// elapses, whichever comes first.
    pub fn block_with_timeout_ns(&self, timeout_ns: u64) -> WakeReason {
        let ticks = (timeout_ns / NS_PER_TICK).max(1);
        let deadline = crate::arch::timer::get_ticks().saturating_add(ticks);
        self.park(Some(deadline))
    }

    /// Wake the longest-waiting thread still parked here. Returns `true`
    /// if a thread was actually woken (skipping over entries already
    /// resolved by a timeout or cancellation).
    pub fn unblock(&self) -> bool {
        loop {
            let node_ptr = match self.waiters.lock().pop_front() {
                Some(ptr) => ptr,
                None => return false,
            };
            // SAFETY: see ParkNodePtr's Send/Sync justification above.
            let node = unsafe { node_ptr.0.as_ref() };
            if node
                .reason
                .compare_exchange(PENDING, WOKEN, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                resume_parked_task(node.task);
                return true;
            }
        }
    }

    /// Wake every thread currently parked here.
    pub fn unblock_all(&self) {
        while self.unblock() {}
    }

    /// Cancel a specific thread's wait here (signal delivery). Returns
    /// `true` if that thread was actually parked on this blocker.
    pub fn cancel(&self, pid: ProcessId) -> bool {
        let queue = self.waiters.lock();
        for node_ptr in queue.iter() {
            // SAFETY: see ParkNodePtr's Send/Sync justification above.
            let node = unsafe { node_ptr.0.as_ref() };
            if node.pid == pid
                && node
                    .reason
                    .compare_exchange(PENDING, INTERRUPTED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                let task = node.task;
                drop(queue);
                resume_parked_task(task);
                return true;
            }
        }
        false
    }

    /// Number of threads currently parked here (diagnostics only).
    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }

    fn park(&self, deadline_tick: Option<u64>) -> WakeReason {
        let scheduler_lock = scheduler::current_scheduler();
        let mut sched = scheduler_lock.lock();

        let current_task = match sched.current() {
            Some(task) => task,
            // No current task to park -- nothing to do.
            None => return WakeReason::Woken,
        };

        // SAFETY: `current_task` is the scheduler's own `current` pointer,
        // valid while we hold `sched`.
        let pid = unsafe { current_task.as_ref().pid };
        let node = ParkNode {
            task: current_task,
            pid,
            deadline_tick,
            reason: AtomicU8::new(PENDING),
        };
        let node_ptr = ParkNodePtr(NonNull::from(&node));

        // SAFETY: we hold the scheduler lock and are the only writer of
        // this task's state/thread_ref until `sched.schedule()` switches
        // away from it below.
        unsafe {
            let task_mut = current_task.as_ptr();
            (*task_mut).state = ProcessState::Blocked;
            if let Some(thread_ptr) = (*task_mut).thread_ref {
                thread_ptr
                    .as_ref()
                    .set_state(crate::process::thread::ThreadState::Blocked);
            }
        }

        self.waiters.lock().push_back(node_ptr);
        if let Some(deadline) = deadline_tick {
            register_timeout(node_ptr, deadline);
        }

        super::metrics::SCHEDULER_METRICS.record_ipc_block();
        sched.schedule();

        // Resumed. Remove our node from every queue that might still hold
        // it before returning and tearing down this stack frame.
        self.waiters
            .lock()
            .retain(|p| !core::ptr::eq(p.0.as_ptr(), node_ptr.0.as_ptr()));
        if deadline_tick.is_some() {
            unregister_timeout(node_ptr);
        }

        match node.reason.load(Ordering::Acquire) {
            TIMED_OUT => WakeReason::TimedOut,
            INTERRUPTED => WakeReason::Interrupted,
            _ => WakeReason::Woken,
        }
    }
}

impl Default for ThreadBlocker {
    fn default() -> Self {
        Self::new()
    }
}

/// Moves a parked task back onto a ready queue, mirroring the CPU
/// selection `sched::ipc_blocking::wake_up_process` uses for the
/// already-located case.
fn resume_parked_task(task: NonNull<Task>) {
    // SAFETY: `task` came from a `ParkNode` that is only removed from its
    // owning queues by the thread itself, after it has resumed -- so
    // while a `ParkNodePtr` is reachable here the task is still parked
    // and this pointer is live.
    unsafe {
        let task_mut = task.as_ptr();
        (*task_mut).state = ProcessState::Ready;
        if let Some(thread_ptr) = (*task_mut).thread_ref {
            thread_ptr
                .as_ref()
                .set_state(crate::process::thread::ThreadState::Ready);
        }

        let target_cpu = if (*task_mut).cpu_affinity.mask() != 0 {
            smp::find_least_loaded_cpu_with_affinity((*task_mut).cpu_affinity.mask())
        } else {
            smp::find_least_loaded_cpu()
        };
        scheduler::schedule_on_cpu(target_cpu, task);
    }
}

// ---------------------------------------------------------------------------
// Deadline registry
// ---------------------------------------------------------------------------

/// Every outstanding timed `park()` call, so `check_timeouts` (driven off
/// the timer tick) can find expired ones without each `ThreadBlocker`
/// needing its own deadline sweep.
#[cfg(feature = "alloc")]
static TIMED_PARKS: Mutex<VecDeque<(ParkNodePtr, u64)>> = Mutex::new(VecDeque::new());

#[cfg(feature = "alloc")]
fn register_timeout(node_ptr: ParkNodePtr, deadline_tick: u64) {
    TIMED_PARKS.lock().push_back((node_ptr, deadline_tick));
}

#[cfg(feature = "alloc")]
fn unregister_timeout(node_ptr: ParkNodePtr) {
    TIMED_PARKS
        .lock()
        .retain(|(p, _)| !core::ptr::eq(p.0.as_ptr(), node_ptr.0.as_ptr()));
}

/// Called once per timer tick (`sched::runtime::timer_tick`). Wakes every
/// timed park whose deadline has passed; the owning `ThreadBlocker`
/// removes the now-stale queue entry itself the next time it is polled
/// or when the woken thread returns from `park()`.
#[cfg(feature = "alloc")]
pub fn check_timeouts() {
    let now = crate::arch::timer::get_ticks();
    let mut expired = alloc::vec::Vec::new();
    {
        let mut parks = TIMED_PARKS.lock();
        let mut i = 0;
        while i < parks.len() {
            if parks[i].1 <= now {
                expired.push(parks.remove(i).unwrap().0);
            } else {
                i += 1;
            }
        }
    }

    for node_ptr in expired {
        // SAFETY: see ParkNodePtr's Send/Sync justification above.
        let node = unsafe { node_ptr.0.as_ref() };
        if node
            .reason
            .compare_exchange(PENDING, TIMED_OUT, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            resume_parked_task(node.task);
        }
    }
}

#[cfg(not(feature = "alloc"))]
pub fn check_timeouts() {}
