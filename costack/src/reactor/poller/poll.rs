//! Portable `poll(2)`-based poller implementation.
//!
//! Used on unix targets without `epoll`. It mirrors the `epoll` backend:
//! sockets are kept in a registry and turned into a `pollfd` array on
//! every wait, with a non-blocking pipe as wake source.

use super::common::{Waker, check};
use crate::reactor::event::{Event, Events};

use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT, pollfd};
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// Poller based on `poll(2)`.
///
/// This poller owns:
/// - a registry of monitored sockets,
/// - the read side of the wake pipe,
/// - a reusable buffer of `pollfd` structures.
pub(crate) struct PollPoller {
    /// Registered sockets and their interest.
    registry: HashMap<RawFd, Events>,

    /// Read side of the wake pipe.
    wake_recv: RawFd,

    /// Waker holding the write side of the wake pipe.
    waker: Arc<Waker>,

    /// Reusable `pollfd` buffer.
    fds: Vec<pollfd>,
}

impl Waker {
    /// Wake the poller.
    ///
    /// This writes a single byte into the wake pipe, causing `poll`
    /// to return immediately.
    pub(crate) fn wake(&self) {
        let buf = [1u8; 1];
        unsafe {
            libc::write(self.0, buf.as_ptr() as *const _, 1);
        }
    }
}

fn set_nonblocking_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = check(unsafe { libc::fcntl(fd, libc::F_GETFL) })?;
    check(unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) })?;
    check(unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) })?;
    Ok(())
}

impl PollPoller {
    /// Create a new `PollPoller` with its wake pipe.
    pub(crate) fn new() -> io::Result<Self> {
        let mut pipe = [0 as RawFd; 2];
        check(unsafe { libc::pipe(pipe.as_mut_ptr()) })?;

        let [wake_recv, wake_send] = pipe;
        let waker = Arc::new(Waker(wake_send));

        if let Err(err) = set_nonblocking_cloexec(wake_recv).and(set_nonblocking_cloexec(wake_send))
        {
            unsafe { libc::close(wake_recv) };
            return Err(err);
        }

        Ok(Self {
            registry: HashMap::new(),
            wake_recv,
            waker,
            fds: Vec::with_capacity(64),
        })
    }

    /// Return the poller waker.
    pub(crate) fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    /// Register a socket with the poller.
    ///
    /// Fails with `EEXIST` if the socket is already registered.
    pub(crate) fn register(&mut self, fd: RawFd, interest: Events) -> io::Result<()> {
        if self.registry.contains_key(&fd) {
            return Err(io::Error::from_raw_os_error(libc::EEXIST));
        }

        self.registry.insert(fd, interest);
        Ok(())
    }

    /// Replace the interest of a registered socket.
    ///
    /// Fails with `ENOENT` if the socket is not registered.
    pub(crate) fn modify(&mut self, fd: RawFd, interest: Events) -> io::Result<()> {
        match self.registry.get_mut(&fd) {
            Some(current) => {
                *current = interest;
                Ok(())
            }
            None => Err(io::Error::from_raw_os_error(libc::ENOENT)),
        }
    }

    /// Remove a socket from the poller.
    pub(crate) fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        match self.registry.remove(&fd) {
            Some(_) => Ok(()),
            None => Err(io::Error::from_raw_os_error(libc::ENOENT)),
        }
    }

    /// Poll for readiness events.
    ///
    /// Blocks until at least one socket becomes ready, the wake pipe is
    /// written, or the optional timeout expires. Returns the number of
    /// socket events pushed into `events`.
    pub(crate) fn poll(
        &mut self,
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> io::Result<usize> {
        let timeout_ms = timeout
            .map(|t| t.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1);

        events.clear();
        self.fds.clear();

        self.fds.push(pollfd {
            fd: self.wake_recv,
            events: POLLIN,
            revents: 0,
        });

        for (&fd, &interest) in &self.registry {
            let mut flags = 0;
            if interest.is_readable() {
                flags |= POLLIN;
            }
            if interest.is_writable() {
                flags |= POLLOUT;
            }

            self.fds.push(pollfd {
                fd,
                events: flags,
                revents: 0,
            });
        }

        let n = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout_ms,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }

        for pfd in &self.fds {
            if pfd.revents == 0 {
                continue;
            }

            // Wake-up event
            if pfd.fd == self.wake_recv {
                let mut buf = [0u8; 64];
                while unsafe { libc::read(self.wake_recv, buf.as_mut_ptr() as *mut _, buf.len()) }
                    > 0
                {}
                continue;
            }

            events.push(Event {
                fd: pfd.fd,
                events: translate(pfd.revents),
            });
        }

        Ok(events.len())
    }
}

/// Maps `poll` revents onto an event mask.
fn translate(revents: libc::c_short) -> Events {
    let mut events = Events::NONE;

    if revents & POLLIN != 0 {
        events |= Events::RECV;
    }
    if revents & POLLOUT != 0 {
        events |= Events::SEND;
    }
    if revents & POLLHUP != 0 {
        events |= Events::ALL | Events::EOF;
    }
    if revents & (POLLERR | POLLNVAL) != 0 {
        events |= Events::ALL | Events::ERROR;
    }

    events
}

impl Drop for PollPoller {
    fn drop(&mut self) {
        unsafe { libc::close(self.wake_recv) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_registration_fails() {
        let mut poller = PollPoller::new().expect("poller");

        poller.register(100, Events::RECV).expect("first registration");
        let err = poller.register(100, Events::SEND).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EEXIST));

        poller.deregister(100).expect("deregister");
        assert!(poller.deregister(100).is_err());
    }

    #[test]
    fn test_modify_replaces_interest() {
        let mut poller = PollPoller::new().expect("poller");

        let err = poller.modify(100, Events::SEND).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));

        poller.register(100, Events::RECV).expect("register");
        poller.modify(100, Events::ALL).expect("modify");
        assert_eq!(poller.registry[&100], Events::ALL);
    }

    #[test]
    fn test_wake_interrupts_poll() {
        let mut poller = PollPoller::new().expect("poller");
        let mut events = Vec::new();

        poller.waker().wake();
        let n = poller.poll(&mut events, None).expect("poll");

        assert_eq!(n, 0);
        assert!(events.is_empty());
    }
}
