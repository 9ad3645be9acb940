//! Socket system calls not covered by `std::net`.

use crate::reactor::Events;
use crate::reactor::poller::common::check;
use crate::scheduler::context::try_with_current;

use libc::{
    AF_INET, AF_INET6, EINPROGRESS, F_GETFL, F_SETFD, F_SETFL, FD_CLOEXEC, O_NONBLOCK, POLLIN,
    POLLOUT, SOCK_STREAM, connect, fcntl, pollfd, sockaddr, sockaddr_in, sockaddr_in6,
    sockaddr_storage, socket, socklen_t,
};
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// Sets a file descriptor to non-blocking, close-on-exec mode.
fn set_nonblocking_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = check(unsafe { fcntl(fd, F_GETFL) })?;
    check(unsafe { fcntl(fd, F_SETFL, flags | O_NONBLOCK) })?;
    check(unsafe { fcntl(fd, F_SETFD, FD_CLOEXEC) })?;

    Ok(())
}

/// Creates a non-blocking stream socket for the family of `addr`.
pub(crate) fn socket_for(addr: &SocketAddr) -> io::Result<OwnedFd> {
    let domain = match addr {
        SocketAddr::V4(_) => AF_INET,
        SocketAddr::V6(_) => AF_INET6,
    };

    let fd = check(unsafe { socket(domain, SOCK_STREAM, 0) })?;
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    set_nonblocking_cloexec(fd.as_raw_fd())?;

    Ok(fd)
}

/// Starts a non-blocking connect.
///
/// Returns `Ok(true)` if the connection completed immediately and
/// `Ok(false)` if it is in progress.
pub(crate) fn connect_nonblocking(fd: RawFd, addr: &SocketAddr) -> io::Result<bool> {
    let (storage, len) = socketaddr_to_storage(addr);

    let rc = unsafe { connect(fd, &storage as *const _ as *const sockaddr, len) };
    if rc == 0 {
        return Ok(true);
    }

    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(EINPROGRESS) => Ok(false),
        _ => Err(err),
    }
}

/// Converts a `SocketAddr` to a `sockaddr_storage`.
fn socketaddr_to_storage(addr: &SocketAddr) -> (sockaddr_storage, socklen_t) {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };

    match addr {
        SocketAddr::V4(v4) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in) };
            sa.sin_family = AF_INET as _;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.s_addr = u32::from(*v4.ip()).to_be();

            (storage, mem::size_of::<sockaddr_in>() as socklen_t)
        }

        SocketAddr::V6(v6) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in6) };
            sa.sin6_family = AF_INET6 as _;
            sa.sin6_port = v6.port().to_be();
            sa.sin6_addr.s6_addr = v6.ip().octets();
            sa.sin6_flowinfo = v6.flowinfo();
            sa.sin6_scope_id = v6.scope_id();

            (storage, mem::size_of::<sockaddr_in6>() as socklen_t)
        }
    }
}

/// Blocks the caller until `fd` is ready for `interest`.
///
/// Inside a coroutine this is a scheduler wait, so other coroutines keep
/// running. On a plain thread it falls back to a blocking `poll(2)`.
pub(crate) fn wait_ready(fd: RawFd, interest: Events) -> io::Result<()> {
    let in_coroutine = try_with_current(|core| core.in_coroutine()).unwrap_or(false);

    if in_coroutine {
        let events = crate::reactor::wait(fd, interest, None)?;

        if events.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "socket wait cancelled",
            ));
        }

        return Ok(());
    }

    let mut pfd = pollfd {
        fd,
        events: if interest.is_readable() { POLLIN } else { POLLOUT },
        revents: 0,
    };

    loop {
        let rc = unsafe { libc::poll(&mut pfd, 1, -1) };
        if rc >= 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Retries `op` until it stops reporting `WouldBlock`, waiting for
/// `interest` in between.
pub(crate) fn retry<T>(
    fd: RawFd,
    interest: Events,
    mut op: impl FnMut() -> io::Result<T>,
) -> io::Result<T> {
    loop {
        match op() {
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => wait_ready(fd, interest)?,
            other => return other,
        }
    }
}
