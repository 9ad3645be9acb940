//! Linux `epoll`-based poller implementation.
//!
//! Responsibilities:
//! - Register sockets with read/write interests
//! - Block waiting for readiness
//! - Wake a blocked wait when the scheduler is stopped from another thread
//!
//! This backend is selected automatically on Linux targets.

use super::common::{Waker, check};
use crate::reactor::event::{Event, Events};

use libc::{
    EFD_CLOEXEC, EFD_NONBLOCK, EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD,
    EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLRDHUP, c_int, epoll_create1, epoll_ctl,
    epoll_event, epoll_wait,
};
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// Reserved token used internally for the wake-up event.
///
/// Socket registrations use the descriptor as token, which is never
/// `u64::MAX`.
const WAKE_TOKEN: u64 = u64::MAX;

/// Linux `epoll` poller.
///
/// This poller owns:
/// - an `epoll` instance,
/// - an internal `eventfd` used as a wake-up signal,
/// - a reusable event buffer.
pub(crate) struct EpollPoller {
    /// Epoll file descriptor.
    epoll: RawFd,

    /// Reusable buffer for epoll events.
    events: Vec<epoll_event>,

    /// Waker wrapping the internal eventfd.
    waker: Arc<Waker>,
}

impl Waker {
    /// Wake the poller.
    ///
    /// This writes to the internal `eventfd`, causing `epoll_wait`
    /// to return immediately.
    pub(crate) fn wake(&self) {
        let buf: u64 = 1;
        unsafe {
            libc::write(self.0, &buf as *const _ as *const _, 8);
        }
    }
}

impl EpollPoller {
    /// Create a new `EpollPoller`.
    ///
    /// This creates the epoll instance and a non-blocking `eventfd`
    /// registered as a persistent wake source.
    pub(crate) fn new() -> io::Result<Self> {
        let epoll = check(unsafe { epoll_create1(EPOLL_CLOEXEC) })?;

        let eventfd = match check(unsafe { libc::eventfd(0, EFD_NONBLOCK | EFD_CLOEXEC) }) {
            Ok(fd) => fd,
            Err(err) => {
                unsafe { libc::close(epoll) };
                return Err(err);
            }
        };
        let waker = Arc::new(Waker(eventfd));

        let mut event = epoll_event {
            events: EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };

        if let Err(err) = check(unsafe { epoll_ctl(epoll, EPOLL_CTL_ADD, eventfd, &mut event) }) {
            unsafe { libc::close(epoll) };
            return Err(err);
        }

        Ok(Self {
            epoll,
            events: Vec::with_capacity(64),
            waker,
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
        self.control(EPOLL_CTL_ADD, fd, interest)
    }

    /// Replace the interest of a registered socket.
    pub(crate) fn modify(&mut self, fd: RawFd, interest: Events) -> io::Result<()> {
        self.control(EPOLL_CTL_MOD, fd, interest)
    }

    fn control(&mut self, op: c_int, fd: RawFd, interest: Events) -> io::Result<()> {
        let mut flags = 0;

        if interest.is_readable() {
            flags |= EPOLLIN | EPOLLRDHUP;
        }
        if interest.is_writable() {
            flags |= EPOLLOUT;
        }

        let mut event = epoll_event {
            events: flags as u32,
            u64: fd as u64,
        };

        check(unsafe { epoll_ctl(self.epoll, op, fd, &mut event) }).map(|_| ())
    }

    /// Remove a socket from the poller.
    pub(crate) fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        check(unsafe { epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut()) }).map(|_| ())
    }

    /// Poll for readiness events.
    ///
    /// Blocks until at least one socket becomes ready, the wake event is
    /// triggered, or the optional timeout expires. Returns the number of
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

        let n = unsafe {
            epoll_wait(
                self.epoll,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
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

        unsafe {
            self.events.set_len(n as usize);
        }

        for ev in &self.events {
            // Wake-up event
            if ev.u64 == WAKE_TOKEN {
                let mut buf = 0u64;
                unsafe {
                    libc::read(self.waker.0, &mut buf as *mut _ as *mut _, 8);
                }
                continue;
            }

            events.push(Event {
                fd: ev.u64 as RawFd,
                events: translate(ev.events),
            });
        }

        unsafe {
            self.events.set_len(0);
        }

        Ok(events.len())
    }
}

/// Maps epoll readiness bits onto an event mask.
fn translate(bits: u32) -> Events {
    let mut events = Events::NONE;

    if bits & EPOLLIN as u32 != 0 {
        events |= Events::RECV;
    }
    if bits & EPOLLOUT as u32 != 0 {
        events |= Events::SEND;
    }
    if bits & EPOLLRDHUP as u32 != 0 {
        events |= Events::RECV | Events::EOF;
    }
    if bits & EPOLLHUP as u32 != 0 {
        events |= Events::ALL | Events::EOF;
    }
    if bits & EPOLLERR as u32 != 0 {
        events |= Events::ALL | Events::ERROR;
    }

    events
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        unsafe { libc::close(self.epoll) };
    }
}
