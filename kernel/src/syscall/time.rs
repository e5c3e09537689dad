//! Time management system calls
//!
//! Provides kernel-side implementation of time-related operations:
//! monotonic uptime queries and software timer creation/cancellation.
//! All operations delegate to the [`crate::timer`] subsystem.

use super::{validate_user_buffer, SyscallError, SyscallResult};

/// Layout of `struct timespec` as passed to/from user space.
#[repr(C)]
#[derive(Clone, Copy)]
struct UserTimespec {
    tv_sec: i64,
    tv_nsec: i64,
}

/// Get the current time for a given clock (syscall: clock_gettime).
///
/// Only `CLOCK_MONOTONIC` (1) and `CLOCK_REALTIME` (0) are supported; both
/// currently resolve to uptime since boot, as there is no RTC-backed
/// wall-clock source wired up yet.
pub fn sys_clock_gettime(clock_id: usize, ts_ptr: usize) -> SyscallResult {
    if clock_id > 1 {
        return Err(SyscallError::InvalidArgument);
    }
    validate_user_buffer(ts_ptr, core::mem::size_of::<UserTimespec>())?;

    let uptime_ms = crate::timer::get_uptime_ms();
    let ts = UserTimespec {
        tv_sec: (uptime_ms / 1000) as i64,
        tv_nsec: ((uptime_ms % 1000) * 1_000_000) as i64,
    };

    // SAFETY: ts_ptr was validated above to hold a writable UserTimespec.
    unsafe {
        core::ptr::write(ts_ptr as *mut UserTimespec, ts);
    }
    Ok(0)
}

/// Suspend the calling thread for the requested interval (syscall: nanosleep).
///
/// `rem_ptr` (remaining time on early wake) is accepted but unused since
/// sleeps are not yet interruptible by signals at this layer.
pub fn sys_nanosleep(req_ptr: usize, _rem_ptr: usize) -> SyscallResult {
    validate_user_buffer(req_ptr, core::mem::size_of::<UserTimespec>())?;

    // SAFETY: req_ptr was validated above to hold a readable UserTimespec.
    let req = unsafe { core::ptr::read(req_ptr as *const UserTimespec) };
    if req.tv_sec < 0 || req.tv_nsec < 0 || req.tv_nsec >= 1_000_000_000 {
        return Err(SyscallError::InvalidArgument);
    }

    let millis = (req.tv_sec as u64) * 1000 + (req.tv_nsec as u64) / 1_000_000;
    let wake_at = crate::timer::get_uptime_ms() + millis;
    while crate::timer::get_uptime_ms() < wake_at {
        crate::process::yield_thread();
    }
    Ok(0)
}

/// Get monotonic uptime in milliseconds (SYS_TIME_GET_UPTIME = 100)
///
/// # Returns
/// Current uptime in milliseconds since boot.
pub fn sys_time_get_uptime() -> SyscallResult {
    Ok(crate::timer::get_uptime_ms() as usize)
}

/// Create a new timer (SYS_TIME_CREATE_TIMER = 101)
///
/// # Arguments
/// - `mode`: 0 for OneShot, 1 for Periodic
/// - `interval_ms`: Timer interval in milliseconds (must be > 0)
/// - `callback_ptr`: Reserved for future use (user-space signal delivery).
///   Currently ignored; timers fire a kernel-internal no-op callback.
///
/// # Returns
/// The `TimerId` (as `usize`) on success.
pub fn sys_time_create_timer(
    mode: usize,
    interval_ms: usize,
    _callback_ptr: usize,
) -> SyscallResult {
    let timer_mode = match mode {
        0 => crate::timer::TimerMode::OneShot,
        1 => crate::timer::TimerMode::Periodic,
        _ => return Err(SyscallError::InvalidArgument),
    };

    if interval_ms == 0 {
        return Err(SyscallError::InvalidArgument);
    }

    // User-space timers use a no-op kernel callback. In the future this
    // would deliver a signal or event to the calling process.
    fn user_timer_callback(_id: crate::timer::TimerId) {}

    match crate::timer::create_timer(timer_mode, interval_ms as u64, user_timer_callback) {
        Ok(id) => Ok(id.0 as usize),
        Err(_) => Err(SyscallError::ResourceNotFound),
    }
}

/// Cancel an active timer (SYS_TIME_CANCEL_TIMER = 102)
///
/// # Arguments
/// - `timer_id`: The timer ID returned by `SYS_TIME_CREATE_TIMER`.
///
/// # Returns
/// 0 on success.
pub fn sys_time_cancel_timer(timer_id: usize) -> SyscallResult {
    let id = crate::timer::TimerId(timer_id as u64);

    match crate::timer::cancel_timer(id) {
        Ok(()) => Ok(0),
        Err(_) => Err(SyscallError::ResourceNotFound),
    }
}
