//! Kernel-wide error types.
//!
//! `KernelError` is the single result-carrying error type used by every
//! subsystem (mm, sched, process, fs, net, acpi, usb). Syscall dispatch
//! (`syscall::dispatch`) is the only place these are translated to a
//! negative `-errno` value; internal code never deals with raw errno
//! integers.

use core::fmt;

/// Main kernel error type, shared by every subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    // --- resource exhaustion ---
    OutOfMemory { requested: usize, available: usize },
    OutOfFrames,
    TooManyOpenFiles,
    AddressInUse,
    PortExhausted,

    // --- permission ---
    PermissionDenied { operation: &'static str },
    ReadOnly,

    // --- bad user input ---
    InvalidAddress { addr: usize },
    Fault,
    InvalidArgument { name: &'static str, value: &'static str },

    // --- not ready ---
    WouldBlock,

    // --- remote / protocol ---
    TimedOut,
    ConnectionReset,
    ConnectionRefused,
    HostUnreachable,
    NetworkUnreachable,
    BrokenPipe,

    // --- interrupted ---
    Interrupted,

    // --- unsupported ---
    NotSupported { feature: &'static str },
    NotImplemented { feature: &'static str },

    // --- lookup / identity ---
    ProcessNotFound { pid: u64 },
    ThreadNotFound { tid: u64 },
    NotFound { resource: &'static str },
    AlreadyExists { resource: &'static str },
    InvalidState { expected: &'static str, actual: &'static str },

    // --- subsystem-specific, carried verbatim ---
    FsError(FsError),
    SchedError(SchedError),
    NetError(NetError),

    /// Subsystem not initialized (called before init())
    NotInitialized { subsystem: &'static str },
}

/// Filesystem-specific errors, narrower than `KernelError` so the VFS can
/// pattern-match exhaustively before widening into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    AlreadyExists,
    PermissionDenied,
    NotADirectory,
    NotAFile,
    IsADirectory,
    ReadOnly,
    InvalidPath,
    NoRootFs,
    AlreadyMounted,
    NotMounted,
    UnknownFsType,
    IoError,
    DirectoryNotEmpty,
    TooManyOpenFiles,
    BadFileDescriptor,
    NotSupported,
    NotASymlink,
    FileTooLarge,
    TooManySymlinks,
    NameTooLong,
    NoSpace,
    CrossDevice,
}

/// Scheduler-specific errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    TaskNotFound { id: u64 },
    InvalidCpuId { cpu: usize },
    AlreadyScheduled,
}

/// Network-stack-specific errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    NoRoute,
    ArpTimeout,
    PortInUse,
    NotConnected,
    AlreadyConnected,
    InvalidState { expected: &'static str, actual: &'static str },
    ChecksumMismatch,
    FragmentTimeout,
}

pub type KernelResult<T> = Result<T, KernelError>;

/// POSIX errno values the syscall boundary translates `KernelError` into.
/// Kept as plain constants (rather than an enum) because they must match
/// the userspace ABI numerically.
#[allow(non_upper_case_globals)]
pub mod errno {
    pub const EPERM: i64 = 1;
    pub const ENOENT: i64 = 2;
    pub const EINTR: i64 = 4;
    pub const EIO: i64 = 5;
    pub const EAGAIN: i64 = 11;
    pub const ENOMEM: i64 = 12;
    pub const EACCES: i64 = 13;
    pub const EFAULT: i64 = 14;
    pub const EEXIST: i64 = 17;
    pub const ENOTDIR: i64 = 20;
    pub const EISDIR: i64 = 21;
    pub const EINVAL: i64 = 22;
    pub const EMFILE: i64 = 24;
    pub const ENOSPC: i64 = 28;
    pub const EPIPE: i64 = 32;
    pub const ENAMETOOLONG: i64 = 36;
    pub const ENOSYS: i64 = 38;
    pub const ENOTEMPTY: i64 = 39;
    pub const ELOOP: i64 = 40;
    pub const ENOTSUP: i64 = 95;
    pub const EADDRINUSE: i64 = 98;
    pub const ENETUNREACH: i64 = 101;
    pub const ECONNRESET: i64 = 104;
    pub const ETIMEDOUT: i64 = 110;
    pub const ECONNREFUSED: i64 = 111;
    pub const EHOSTUNREACH: i64 = 113;
    pub const EXDEV: i64 = 18;
    pub const EBADF: i64 = 9;
    pub const EROFS: i64 = 30;
}

impl KernelError {
    /// Map to the `-errno` value a syscall should return.
    pub fn errno(&self) -> i64 {
        use errno::*;
        match self {
            Self::OutOfMemory { .. } | Self::OutOfFrames => ENOMEM,
            Self::TooManyOpenFiles => EMFILE,
            Self::AddressInUse => EADDRINUSE,
            Self::PortExhausted => EADDRINUSE,
            Self::PermissionDenied { .. } => EACCES,
            Self::ReadOnly => EROFS,
            Self::InvalidAddress { .. } | Self::Fault => EFAULT,
            Self::InvalidArgument { .. } => EINVAL,
            Self::WouldBlock => EAGAIN,
            Self::TimedOut => ETIMEDOUT,
            Self::ConnectionReset => ECONNRESET,
            Self::ConnectionRefused => ECONNREFUSED,
            Self::HostUnreachable => EHOSTUNREACH,
            Self::NetworkUnreachable => ENETUNREACH,
            Self::BrokenPipe => EPIPE,
            Self::Interrupted => EINTR,
            Self::NotSupported { .. } => ENOTSUP,
            Self::NotImplemented { .. } => ENOSYS,
            Self::ProcessNotFound { .. } | Self::ThreadNotFound { .. } | Self::NotFound { .. } => {
                ENOENT
            }
            Self::AlreadyExists { .. } => EEXIST,
            Self::InvalidState { .. } => EINVAL,
            Self::NotInitialized { .. } => EIO,
            Self::SchedError(_) => EINVAL,
            Self::NetError(e) => match e {
                NetError::NoRoute | NetError::ArpTimeout => EHOSTUNREACH,
                NetError::PortInUse => EADDRINUSE,
                NetError::NotConnected => ENOTSUP,
                NetError::AlreadyConnected => EINVAL,
                NetError::InvalidState { .. } => EINVAL,
                NetError::ChecksumMismatch | NetError::FragmentTimeout => EIO,
            },
            Self::FsError(e) => match e {
                FsError::NotFound => ENOENT,
                FsError::AlreadyExists => EEXIST,
                FsError::PermissionDenied => EACCES,
                FsError::NotADirectory => ENOTDIR,
                FsError::NotAFile | FsError::NotASymlink => EINVAL,
                FsError::IsADirectory => EISDIR,
                FsError::ReadOnly => EROFS,
                FsError::InvalidPath => EINVAL,
                FsError::NoRootFs => EIO,
                FsError::AlreadyMounted => EEXIST,
                FsError::NotMounted => EINVAL,
                FsError::UnknownFsType => ENOTSUP,
                FsError::IoError => EIO,
                FsError::DirectoryNotEmpty => ENOTEMPTY,
                FsError::TooManyOpenFiles => EMFILE,
                FsError::BadFileDescriptor => EBADF,
                FsError::NotSupported => ENOTSUP,
                FsError::FileTooLarge => EINVAL,
                FsError::TooManySymlinks => ELOOP,
                FsError::NameTooLong => ENAMETOOLONG,
                FsError::NoSpace => ENOSPC,
                FsError::CrossDevice => EXDEV,
            },
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { requested, available } => write!(
                f,
                "out of memory: requested {} bytes, {} available",
                requested, available
            ),
            Self::OutOfFrames => write!(f, "physical frame allocator exhausted"),
            Self::TooManyOpenFiles => write!(f, "too many open files"),
            Self::AddressInUse => write!(f, "address already in use"),
            Self::PortExhausted => write!(f, "ephemeral port range exhausted"),
            Self::PermissionDenied { operation } => {
                write!(f, "permission denied: {}", operation)
            }
            Self::ReadOnly => write!(f, "filesystem is read-only"),
            Self::InvalidAddress { addr } => write!(f, "invalid address: {:#x}", addr),
            Self::Fault => write!(f, "bad pointer from userspace"),
            Self::InvalidArgument { name, value } => {
                write!(f, "invalid argument '{}': {}", name, value)
            }
            Self::WouldBlock => write!(f, "operation would block"),
            Self::TimedOut => write!(f, "operation timed out"),
            Self::ConnectionReset => write!(f, "connection reset by peer"),
            Self::ConnectionRefused => write!(f, "connection refused"),
            Self::HostUnreachable => write!(f, "host unreachable"),
            Self::NetworkUnreachable => write!(f, "network unreachable"),
            Self::BrokenPipe => write!(f, "broken pipe"),
            Self::Interrupted => write!(f, "interrupted system call"),
            Self::NotSupported { feature } => write!(f, "not supported: {}", feature),
            Self::NotImplemented { feature } => write!(f, "not implemented: {}", feature),
            Self::ProcessNotFound { pid } => write!(f, "process {} not found", pid),
            Self::ThreadNotFound { tid } => write!(f, "thread {} not found", tid),
            Self::NotFound { resource } => write!(f, "{} not found", resource),
            Self::AlreadyExists { resource } => write!(f, "{} already exists", resource),
            Self::InvalidState { expected, actual } => {
                write!(f, "invalid state: expected {}, got {}", expected, actual)
            }
            Self::FsError(e) => write!(f, "filesystem error: {:?}", e),
            Self::SchedError(e) => write!(f, "scheduler error: {:?}", e),
            Self::NetError(e) => write!(f, "network error: {:?}", e),
            Self::NotInitialized { subsystem } => {
                write!(f, "subsystem not initialized: {}", subsystem)
            }
        }
    }
}

impl From<FsError> for KernelError {
    fn from(err: FsError) -> Self {
        Self::FsError(err)
    }
}

impl From<SchedError> for KernelError {
    fn from(err: SchedError) -> Self {
        Self::SchedError(err)
    }
}

impl From<NetError> for KernelError {
    fn from(err: NetError) -> Self {
        Self::NetError(err)
    }
}

#[macro_export]
macro_rules! kernel_error {
    (OutOfMemory { requested: $req:expr, available: $avail:expr }) => {
        $crate::error::KernelError::OutOfMemory {
            requested: $req,
            available: $avail,
        }
    };
    (ProcessNotFound { pid: $pid:expr }) => {
        $crate::error::KernelError::ProcessNotFound { pid: $pid }
    };
    (InvalidArgument { $name:expr => $value:expr }) => {
        $crate::error::KernelError::InvalidArgument {
            name: $name,
            value: $value,
        }
    };
    ($variant:ident) => {
        $crate::error::KernelError::$variant
    };
}
