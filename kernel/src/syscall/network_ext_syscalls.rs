//! Socket system calls
//!
//! Thin wrappers over the global socket table in `net::socket`. Sockets are
//! addressed directly by their table id (returned by `sys_socket`) rather
//! than being threaded through the per-process file descriptor table.

use super::{validate_user_buffer, SyscallError, SyscallResult};
use crate::net::{
    socket::{self, SocketDomain, SocketProtocol, SocketType},
    Ipv4Address, Port, SocketAddr,
};

fn domain_from_raw(domain: usize) -> Result<SocketDomain, SyscallError> {
    match domain {
        2 => Ok(SocketDomain::Inet),  // AF_INET
        10 => Ok(SocketDomain::Inet6), // AF_INET6
        1 => Ok(SocketDomain::Unix),  // AF_UNIX
        _ => Err(SyscallError::InvalidArgument),
    }
}

fn type_from_raw(socket_type: usize) -> Result<SocketType, SyscallError> {
    match socket_type {
        1 => Ok(SocketType::Stream), // SOCK_STREAM
        2 => Ok(SocketType::Dgram),  // SOCK_DGRAM
        3 => Ok(SocketType::Raw),    // SOCK_RAW
        _ => Err(SyscallError::InvalidArgument),
    }
}

fn protocol_from_raw(protocol: usize) -> SocketProtocol {
    match protocol {
        6 => SocketProtocol::Tcp,
        17 => SocketProtocol::Udp,
        1 => SocketProtocol::Icmp,
        _ => SocketProtocol::Default,
    }
}

/// Layout of `struct sockaddr_in` as passed from user space.
#[repr(C)]
#[derive(Clone, Copy)]
struct UserSockAddrIn {
    family: u16,
    port: u16,
    addr: [u8; 4],
    _zero: [u8; 8],
}

fn read_sockaddr(addr_ptr: usize, addr_len: usize) -> Result<SocketAddr, SyscallError> {
    if addr_len < core::mem::size_of::<UserSockAddrIn>() {
        return Err(SyscallError::InvalidArgument);
    }
    validate_user_buffer(addr_ptr, core::mem::size_of::<UserSockAddrIn>())?;

    // SAFETY: addr_ptr was validated above to hold at least
    // size_of::<UserSockAddrIn>() readable bytes.
    let raw = unsafe { *(addr_ptr as *const UserSockAddrIn) };
    let port: Port = u16::from_be(raw.port);
    Ok(SocketAddr::v4(Ipv4Address(raw.addr), port))
}

/// Create an endpoint for communication (syscall: socket).
pub fn sys_socket(domain: usize, socket_type: usize, protocol: usize) -> SyscallResult {
    let domain = domain_from_raw(domain)?;
    let socket_type = type_from_raw(socket_type)?;
    let protocol = protocol_from_raw(protocol);

    socket::create_socket(domain, socket_type, protocol).map_err(|_| SyscallError::OutOfMemory)
}

/// Bind a socket to a local address (syscall: bind).
pub fn sys_bind(sockfd: usize, addr_ptr: usize, addr_len: usize) -> SyscallResult {
    let addr = read_sockaddr(addr_ptr, addr_len)?;
    let sock = socket::get_socket_mut(sockfd).map_err(|_| SyscallError::BadFileDescriptor)?;
    sock.bind(addr).map_err(|_| SyscallError::InvalidState)?;
    Ok(0)
}

/// Mark a socket as listening for incoming connections (syscall: listen).
pub fn sys_listen(sockfd: usize, backlog: usize) -> SyscallResult {
    let sock = socket::get_socket_mut(sockfd).map_err(|_| SyscallError::BadFileDescriptor)?;
    sock.listen(backlog).map_err(|_| SyscallError::InvalidState)?;
    Ok(0)
}

/// Connect a socket to a remote address (syscall: connect).
pub fn sys_connect(sockfd: usize, addr_ptr: usize, addr_len: usize) -> SyscallResult {
    let addr = read_sockaddr(addr_ptr, addr_len)?;
    let sock = socket::get_socket_mut(sockfd).map_err(|_| SyscallError::BadFileDescriptor)?;
    sock.connect(addr).map_err(|_| SyscallError::InvalidState)?;
    Ok(0)
}

/// Accept a connection on a listening socket (syscall: accept).
///
/// Returns the id of the newly created socket.
pub fn sys_accept(sockfd: usize) -> SyscallResult {
    let sock = socket::get_socket(sockfd).map_err(|_| SyscallError::BadFileDescriptor)?;
    let (new_sock, _peer) = sock.accept().map_err(|e| match e {
        crate::error::KernelError::WouldBlock => SyscallError::WouldBlock,
        _ => SyscallError::InvalidState,
    })?;
    socket::create_socket(new_sock.domain, new_sock.socket_type, new_sock.protocol)
        .map_err(|_| SyscallError::OutOfMemory)
}

/// Send data on a connected socket (syscall: send).
pub fn sys_send(sockfd: usize, buf_ptr: usize, len: usize, flags: usize) -> SyscallResult {
    validate_user_buffer(buf_ptr, len)?;
    // SAFETY: buf_ptr/len were validated as a readable user-space range above.
    let data = unsafe { core::slice::from_raw_parts(buf_ptr as *const u8, len) };
    let sock = socket::get_socket(sockfd).map_err(|_| SyscallError::BadFileDescriptor)?;
    sock.send(data, flags as u32)
        .map_err(|_| SyscallError::InvalidState)
}

/// Receive data on a connected socket (syscall: recv).
pub fn sys_recv(sockfd: usize, buf_ptr: usize, len: usize, flags: usize) -> SyscallResult {
    validate_user_buffer(buf_ptr, len)?;
    // SAFETY: buf_ptr/len were validated as a writable user-space range above.
    let buffer = unsafe { core::slice::from_raw_parts_mut(buf_ptr as *mut u8, len) };
    let sock = socket::get_socket(sockfd).map_err(|_| SyscallError::BadFileDescriptor)?;
    sock.recv(buffer, flags as u32)
        .map_err(|_| SyscallError::InvalidState)
}

/// Close a socket (syscall: close, routed here for socket fds).
pub fn sys_socket_close(sockfd: usize) -> SyscallResult {
    let sock = socket::get_socket_mut(sockfd).map_err(|_| SyscallError::BadFileDescriptor)?;
    sock.close().map_err(|_| SyscallError::InvalidState)?;
    Ok(0)
}
