//! epoll and pselect system calls
//!
//! Thin wrappers over the global epoll registry in `net::epoll`, plus a
//! `pselect`-style readiness check built on the same per-fd poll helper.

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(feature = "alloc")]
use alloc::vec::Vec;

use super::{validate_user_buffer, SyscallError, SyscallResult};
use crate::net::epoll::{self, EpollEvent};

/// Create a new epoll instance (syscall: epoll_create1). `flags` is
/// accepted for ABI compatibility but unused (no `EPOLL_CLOEXEC`
/// distinction -- epoll ids aren't regular file descriptors).
pub fn sys_epoll_create1(_flags: usize) -> SyscallResult {
    let pid = crate::process::current_process()
        .map(|p| p.pid.0)
        .unwrap_or(0);
    epoll::epoll_create(pid)
        .map(|id| id as usize)
        .map_err(|_| SyscallError::OutOfMemory)
}

/// Add, modify, or remove an fd from an epoll instance's interest list
/// (syscall: epoll_ctl). `event_ptr` is ignored for `EPOLL_CTL_DEL`.
pub fn sys_epoll_ctl(epoll_id: usize, op: usize, fd: usize, event_ptr: usize) -> SyscallResult {
    let op = op as u32;
    let event = if op == epoll::EPOLL_CTL_DEL {
        None
    } else {
        validate_user_buffer(event_ptr, core::mem::size_of::<EpollEvent>())?;
        // SAFETY: event_ptr was validated above to hold a readable
        // EpollEvent; the struct is repr(C) and Copy.
        Some(unsafe { *(event_ptr as *const EpollEvent) })
    };

    epoll::epoll_ctl(epoll_id as u32, op, fd as i32, event.as_ref())
        .map(|_| 0)
        .map_err(|_| SyscallError::InvalidArgument)
}

/// Wait for events on an epoll instance (syscall: epoll_pwait2). The
/// signal-mask argument of the real `epoll_pwait2` ABI is not accepted --
/// callers that need it should use `SYS_SIGPROCMASK` around the call.
pub fn sys_epoll_pwait2(
    epoll_id: usize,
    events_ptr: usize,
    max_events: usize,
    timeout_ms: usize,
) -> SyscallResult {
    if max_events == 0 {
        return Ok(0);
    }
    validate_user_buffer(
        events_ptr,
        max_events
            .checked_mul(core::mem::size_of::<EpollEvent>())
            .ok_or(SyscallError::InvalidArgument)?,
    )?;

    let mut events = Vec::with_capacity(max_events);
    events.resize(
        max_events,
        EpollEvent {
            events: 0,
            data: 0,
        },
    );

    let count = epoll::epoll_wait(epoll_id as u32, &mut events, timeout_ms as i32)
        .map_err(|_| SyscallError::ResourceNotFound)?;

    // SAFETY: events_ptr was validated above to hold max_events EpollEvent
    // slots; we write back only the `count <= max_events` that were filled.
    unsafe {
        let dst = events_ptr as *mut EpollEvent;
        core::ptr::copy_nonoverlapping(events.as_ptr(), dst, count);
    }
    Ok(count)
}

/// Destroy an epoll instance (reached via `SYS_CLOSE` on real Linux; exposed
/// directly here since epoll ids aren't threaded through the fd table).
pub fn sys_epoll_destroy(epoll_id: usize) -> SyscallResult {
    epoll::epoll_destroy(epoll_id as u32)
        .map(|_| 0)
        .map_err(|_| SyscallError::ResourceNotFound)
}

/// `fd_set` bitmap layout used by `pselect`: up to 1024 fds, 8 per byte.
const PSELECT_MAX_FDS: usize = 1024;
const FD_SET_BYTES: usize = PSELECT_MAX_FDS / 8;

fn fd_is_set(set: &[u8; FD_SET_BYTES], fd: usize) -> bool {
    fd < PSELECT_MAX_FDS && set[fd / 8] & (1 << (fd % 8)) != 0
}

fn fd_set_bit(set: &mut [u8; FD_SET_BYTES], fd: usize) {
    if fd < PSELECT_MAX_FDS {
        set[fd / 8] |= 1 << (fd % 8);
    }
}

/// Read an optional `fd_set` bitmap from user space, zeroed if `ptr` is 0.
fn read_fd_set(ptr: usize) -> Result<[u8; FD_SET_BYTES], SyscallError> {
    let mut set = [0u8; FD_SET_BYTES];
    if ptr != 0 {
        validate_user_buffer(ptr, FD_SET_BYTES)?;
        // SAFETY: ptr was validated above to hold FD_SET_BYTES readable
        // bytes when non-zero.
        unsafe {
            core::ptr::copy_nonoverlapping(ptr as *const u8, set.as_mut_ptr(), FD_SET_BYTES);
        }
    }
    Ok(set)
}

/// Synchronous multiplexed I/O readiness check (syscall: pselect).
///
/// `nfds` bounds the fd range scanned; `readfds`/`writefds`/`exceptfds` are
/// `fd_set` bitmaps (0 for "don't care"), overwritten in place with the
/// ready subset. The signal-mask argument of real `pselect` is not
/// accepted, matching `sys_epoll_pwait2`. Always returns immediately
/// (non-blocking poll) regardless of the timeout the caller passed --
/// there is no per-fd wait queue to block on yet.
pub fn sys_pselect(nfds: usize, readfds: usize, writefds: usize, exceptfds: usize) -> SyscallResult {
    if nfds > PSELECT_MAX_FDS {
        return Err(SyscallError::InvalidArgument);
    }

    let want_read = read_fd_set(readfds)?;
    let want_write = read_fd_set(writefds)?;
    let want_except = read_fd_set(exceptfds)?;

    let mut out_read = [0u8; FD_SET_BYTES];
    let mut out_write = [0u8; FD_SET_BYTES];
    let mut out_except = [0u8; FD_SET_BYTES];
    let mut ready = 0usize;

    for fd in 0..nfds {
        let watched = fd_is_set(&want_read, fd) || fd_is_set(&want_write, fd) || fd_is_set(&want_except, fd);
        if !watched {
            continue;
        }
        let readiness = epoll::poll_fd_readiness(fd as i32);
        if fd_is_set(&want_read, fd) && readiness & epoll::EPOLLIN != 0 {
            fd_set_bit(&mut out_read, fd);
            ready += 1;
        }
        if fd_is_set(&want_write, fd) && readiness & epoll::EPOLLOUT != 0 {
            fd_set_bit(&mut out_write, fd);
            ready += 1;
        }
        if fd_is_set(&want_except, fd) && readiness & epoll::EPOLLERR != 0 {
            fd_set_bit(&mut out_except, fd);
            ready += 1;
        }
    }

    for (ptr, set) in [
        (readfds, &out_read),
        (writefds, &out_write),
        (exceptfds, &out_except),
    ] {
        if ptr != 0 {
            // SAFETY: ptr was validated writable by read_fd_set above when
            // non-zero (validate_user_ptr checks both read and write).
            unsafe {
                core::ptr::copy_nonoverlapping(set.as_ptr(), ptr as *mut u8, FD_SET_BYTES);
            }
        }
    }

    Ok(ready)
}
