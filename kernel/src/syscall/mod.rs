//! System call interface
//!
//! A single numbered dispatch (`sys_dispatch`) reached from the IDT's
//! syscall vector. Every call validates any user pointers it is handed
//! against the caller's address space before touching them, then returns
//! a `long`-style result where negative values encode `-errno`.

#![allow(dead_code)]

pub mod arch_prctl;
pub mod console;
pub mod debug;
pub mod epoll;
pub mod filesystem;
pub mod futex;
pub mod info;
pub mod memory;
pub mod network_ext_syscalls;
pub mod process;
pub mod pty;
pub mod signal;
pub mod thread_clone;
pub mod time;
pub mod userspace;

/// System call result type. `Ok` carries the raw return value; callers at
/// the trap boundary negate `SyscallError` to form `-errno`.
pub type SyscallResult = Result<usize, SyscallError>;

/// System call error codes, mirroring POSIX errno families.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    InvalidSyscall = 1,
    InvalidArgument = 2,
    InvalidPointer = 3,
    InvalidState = 4,
    PermissionDenied = 5,
    AccessDenied = 6,
    ResourceNotFound = 7,
    ProcessNotFound = 8,
    BadFileDescriptor = 9,
    OutOfMemory = 10,
    WouldBlock = 11,
    Interrupted = 12,
    NotATerminal = 13,
    IoError = 14,
}

impl SyscallError {
    /// Negated errno-style value returned to user space.
    pub fn as_errno(self) -> isize {
        -(self as i32 as isize)
    }
}

/// Validate that `[ptr, ptr+len)` is a readable/writable user-space range.
pub fn validate_user_pointer(ptr: usize, len: usize) -> Result<(), SyscallError> {
    userspace::validate_user_ptr(ptr, len)
}

/// Validate that `ptr` points to a single, correctly-sized `T` in user space.
pub fn validate_user_ptr_typed<T>(ptr: usize) -> Result<(), SyscallError> {
    userspace::validate_user_ptr(ptr, core::mem::size_of::<T>())
}

/// Validate a user-space buffer of `len` bytes starting at `ptr`.
pub fn validate_user_buffer(ptr: usize, len: usize) -> Result<(), SyscallError> {
    userspace::validate_user_ptr(ptr, len)
}

// Syscall numbers, matching the fixed switch the IDT's syscall vector
// dispatches through.
pub const SYS_EXIT: usize = 1;
pub const SYS_READ: usize = 2;
pub const SYS_WRITE: usize = 3;
pub const SYS_OPENAT: usize = 4;
pub const SYS_CLOSE: usize = 5;
pub const SYS_FSTATAT: usize = 6;
pub const SYS_SEEK: usize = 7;
pub const SYS_TRUNCATE: usize = 8;
pub const SYS_MKDIRAT: usize = 9;
pub const SYS_RMDIR: usize = 10;
pub const SYS_MOUNT: usize = 11;
pub const SYS_UMOUNT: usize = 12;
pub const SYS_SYNC: usize = 13;
pub const SYS_CHDIR: usize = 14;
pub const SYS_GETCWD: usize = 15;
pub const SYS_FORK: usize = 16;
pub const SYS_EXECVE: usize = 17;
pub const SYS_WAIT4: usize = 18;
pub const SYS_GETPID: usize = 19;
pub const SYS_GETPPID: usize = 20;
pub const SYS_THREAD_CREATE: usize = 21;
pub const SYS_THREAD_EXIT: usize = 22;
pub const SYS_THREAD_JOIN: usize = 23;
pub const SYS_GETTID: usize = 24;
pub const SYS_THREAD_SETAFFINITY: usize = 25;
pub const SYS_THREAD_GETAFFINITY: usize = 26;
pub const SYS_THREAD_CLONE: usize = 27;
pub const SYS_SETPRIORITY: usize = 28;
pub const SYS_GETPRIORITY: usize = 29;
pub const SYS_MMAP: usize = 30;
pub const SYS_MUNMAP: usize = 31;
pub const SYS_MPROTECT: usize = 32;
pub const SYS_MSYNC: usize = 33;
pub const SYS_BRK: usize = 34;
pub const SYS_SIGACTION: usize = 35;
pub const SYS_SIGPROCMASK: usize = 36;
pub const SYS_SIGSUSPEND: usize = 37;
pub const SYS_SIGRETURN: usize = 38;
pub const SYS_KILL: usize = 39;
pub const SYS_FUTEX: usize = 40;
pub const SYS_OPENPTY: usize = 41;
pub const SYS_GRANTPT: usize = 42;
pub const SYS_UNLOCKPT: usize = 43;
pub const SYS_PTSNAME: usize = 44;
pub const SYS_TTY_CTRL: usize = 45;
pub const SYS_TCGETATTR: usize = 46;
pub const SYS_TCSETATTR: usize = 47;
pub const SYS_PTRACE: usize = 48;
pub const SYS_GET_KERNEL_INFO: usize = 49;
pub const SYS_UNAME: usize = 50;
pub const SYS_CLOCK_GETTIME: usize = 51;
pub const SYS_NANOSLEEP: usize = 52;
pub const SYS_TIMER_CREATE: usize = 53;
pub const SYS_TIMER_CANCEL: usize = 54;
pub const SYS_ARCH_PRCTL: usize = 55;
pub const SYS_SOCKET: usize = 56;
pub const SYS_BIND: usize = 57;
pub const SYS_LISTEN: usize = 58;
pub const SYS_CONNECT: usize = 59;
pub const SYS_ACCEPT: usize = 60;
pub const SYS_SEND: usize = 61;
pub const SYS_RECV: usize = 62;
pub const SYS_POWEROFF: usize = 63;
pub const SYS_EPOLL_CREATE1: usize = 64;
pub const SYS_EPOLL_CTL: usize = 65;
pub const SYS_EPOLL_PWAIT2: usize = 66;
pub const SYS_EPOLL_DESTROY: usize = 67;
pub const SYS_SMO_CREATE: usize = 68;
pub const SYS_SMO_MAP: usize = 69;
pub const SYS_SMO_DELETE: usize = 70;
pub const SYS_PSELECT: usize = 71;
pub const SYS_READ_DIR: usize = 72;
pub const SYS_LOAD_KEYMAP: usize = 73;

/// Entry point reached from the syscall IDT vector. Resolves the syscall
/// number against the fixed switch and returns a negated-errno result.
pub fn sys_dispatch(
    no: usize,
    a1: usize,
    a2: usize,
    a3: usize,
    a4: usize,
    a5: usize,
) -> isize {
    let result = dispatch_inner(no, a1, a2, a3, a4, a5);
    match result {
        Ok(value) => value as isize,
        Err(err) => err.as_errno(),
    }
}

fn dispatch_inner(
    no: usize,
    a1: usize,
    a2: usize,
    a3: usize,
    a4: usize,
    a5: usize,
) -> SyscallResult {
    match no {
        SYS_EXIT => process::sys_exit(a1),
        SYS_READ => filesystem::sys_read(a1, a2, a3),
        SYS_WRITE => filesystem::sys_write(a1, a2, a3),
        SYS_OPENAT => filesystem::sys_open(a1, a2, a3),
        SYS_CLOSE => filesystem::sys_close(a1),
        SYS_FSTATAT => filesystem::sys_stat(a1, a2),
        SYS_SEEK => filesystem::sys_seek(a1, a2 as isize, a3),
        SYS_TRUNCATE => filesystem::sys_truncate(a1, a2),
        SYS_MKDIRAT => filesystem::sys_mkdir(a1, a2),
        SYS_RMDIR => filesystem::sys_rmdir(a1),
        SYS_MOUNT => filesystem::sys_mount(a1, a2, a3, a4),
        SYS_UMOUNT => filesystem::sys_unmount(a1),
        SYS_SYNC => filesystem::sys_sync(),
        SYS_CHDIR => filesystem::sys_chdir(a1),
        SYS_GETCWD => filesystem::sys_getcwd(a1, a2),
        SYS_FORK => process::sys_fork(),
        SYS_EXECVE => process::sys_exec(a1, a2, a3),
        SYS_WAIT4 => process::sys_wait(a1 as isize, a2, a3),
        SYS_GETPID => process::sys_getpid(),
        SYS_GETPPID => process::sys_getppid(),
        SYS_THREAD_CREATE => process::sys_thread_create(a1, a2, a3, a4),
        SYS_THREAD_EXIT => process::sys_thread_exit(a1),
        SYS_THREAD_JOIN => process::sys_thread_join(a1, a2),
        SYS_GETTID => process::sys_gettid(),
        SYS_THREAD_SETAFFINITY => process::sys_thread_setaffinity(a1, a2, a3),
        SYS_THREAD_GETAFFINITY => process::sys_thread_getaffinity(a1, a2, a3),
        SYS_THREAD_CLONE => thread_clone::sys_thread_clone(a1, a2, a3, a4, a5),
        SYS_SETPRIORITY => process::sys_setpriority(a1, a2, a3),
        SYS_GETPRIORITY => process::sys_getpriority(a1, a2),
        SYS_MMAP => memory::sys_mmap(a1, a2, a3, a4, a5),
        SYS_MUNMAP => memory::sys_munmap(a1, a2),
        SYS_MPROTECT => memory::sys_mprotect(a1, a2, a3),
        SYS_MSYNC => memory::sys_msync(a1, a2, a3),
        SYS_BRK => memory::sys_brk(a1),
        SYS_SIGACTION => signal::sys_sigaction(a1, a2, a3),
        SYS_SIGPROCMASK => signal::sys_sigprocmask(a1, a2, a3),
        SYS_SIGSUSPEND => signal::sys_sigsuspend(a1),
        SYS_SIGRETURN => signal::sys_sigreturn(a1),
        SYS_KILL => process::sys_kill(a1, a2),
        SYS_FUTEX => futex::sys_futex_dispatch(a1, a2, a3, a4, a5).map(|v| v as usize),
        SYS_OPENPTY => pty::sys_openpty(a1, a2),
        SYS_GRANTPT => pty::sys_grantpt(a1),
        SYS_UNLOCKPT => pty::sys_unlockpt(a1),
        SYS_PTSNAME => pty::sys_ptsname(a1, a2, a3),
        SYS_TTY_CTRL => pty::handle_pty_ioctl(a1, a2, a3).unwrap_or(Err(SyscallError::InvalidSyscall)),
        SYS_TCGETATTR => pty::handle_pty_ioctl(a1, TCGETS, a2).unwrap_or(Err(SyscallError::InvalidSyscall)),
        SYS_TCSETATTR => pty::handle_pty_ioctl(a1, TCSETS, a2).unwrap_or(Err(SyscallError::InvalidSyscall)),
        SYS_PTRACE => debug::sys_ptrace(a1, a2, a3, a4),
        SYS_GET_KERNEL_INFO => info::sys_get_kernel_info(a1),
        SYS_UNAME => info::sys_uname(a1),
        SYS_CLOCK_GETTIME => time::sys_clock_gettime(a1, a2),
        SYS_NANOSLEEP => time::sys_nanosleep(a1, a2),
        SYS_TIMER_CREATE => time::sys_time_create_timer(a1, a2, a3),
        SYS_TIMER_CANCEL => time::sys_time_cancel_timer(a1),
        SYS_ARCH_PRCTL => arch_prctl::sys_arch_prctl(a1, a2).map(|v| v as usize),
        SYS_SOCKET => network_ext_syscalls::sys_socket(a1, a2, a3),
        SYS_BIND => network_ext_syscalls::sys_bind(a1, a2, a3),
        SYS_LISTEN => network_ext_syscalls::sys_listen(a1, a2),
        SYS_CONNECT => network_ext_syscalls::sys_connect(a1, a2, a3),
        SYS_ACCEPT => network_ext_syscalls::sys_accept(a1),
        SYS_SEND => network_ext_syscalls::sys_send(a1, a2, a3, a4),
        SYS_RECV => network_ext_syscalls::sys_recv(a1, a2, a3, a4),
        SYS_POWEROFF => crate::arch::halt(),
        SYS_EPOLL_CREATE1 => epoll::sys_epoll_create1(a1),
        SYS_EPOLL_CTL => epoll::sys_epoll_ctl(a1, a2, a3, a4),
        SYS_EPOLL_PWAIT2 => epoll::sys_epoll_pwait2(a1, a2, a3, a4),
        SYS_EPOLL_DESTROY => epoll::sys_epoll_destroy(a1),
        SYS_SMO_CREATE => memory::sys_smo_create(a1),
        SYS_SMO_MAP => memory::sys_smo_map(a1),
        SYS_SMO_DELETE => memory::sys_smo_delete(a1),
        SYS_PSELECT => epoll::sys_pselect(a1, a2, a3, a4),
        SYS_READ_DIR => filesystem::sys_read_dir(a1, a2, a3),
        SYS_LOAD_KEYMAP => console::sys_load_keymap(a1),
        _ => Err(SyscallError::InvalidSyscall),
    }
}

/// `ioctl` request codes used by `SYS_TCGETATTR`/`SYS_TCSETATTR` when routed
/// through the PTY line-discipline ioctl handler.
const TCGETS: usize = 0x5401;
const TCSETS: usize = 0x5402;

/// C ABI entry point called directly from the assembly syscall trampoline.
#[no_mangle]
pub extern "C" fn syscall_handler(
    syscall_num: usize,
    arg1: usize,
    arg2: usize,
    arg3: usize,
    arg4: usize,
    arg5: usize,
) -> isize {
    sys_dispatch(syscall_num, arg1, arg2, arg3, arg4, arg5)
}
