//! Platform-specific readiness poller abstraction.
//!
//! This module provides a unified interface over platform-specific
//! I/O polling mechanisms (`epoll` on Linux, `poll(2)` on other unix
//! targets).
//!
//! The poller is used by the I/O scheduler to:
//! - wait for socket readiness,
//! - be interrupted when the scheduler is stopped from another thread.
//!
//! The concrete implementation is selected at compile time
//! depending on the target operating system.

pub(crate) mod common;

pub(crate) use common::Waker;

#[cfg(not(unix))]
compile_error!("costack only supports unix targets");

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;

#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
mod poll;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) type Poller = epoll::EpollPoller;

#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
pub(crate) type Poller = poll::PollPoller;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::event::Events;

    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::time::Duration;

    #[test]
    fn test_readable_socket_is_reported() {
        let mut poller = Poller::new().expect("poller");
        let (mut left, right) = UnixStream::pair().expect("socket pair");
        let mut events = Vec::new();

        poller
            .register(right.as_raw_fd(), Events::RECV)
            .expect("register");
        left.write_all(b"x").expect("write");

        let n = poller
            .poll(&mut events, Some(Duration::from_secs(5)))
            .expect("poll");

        assert_eq!(n, 1);
        assert_eq!(events[0].fd, right.as_raw_fd());
        assert!(events[0].events.is_readable());

        poller.deregister(right.as_raw_fd()).expect("deregister");
    }

    #[test]
    fn test_timeout_without_events() {
        let mut poller = Poller::new().expect("poller");
        let (_left, right) = UnixStream::pair().expect("socket pair");
        let mut events = Vec::new();

        poller
            .register(right.as_raw_fd(), Events::RECV)
            .expect("register");

        let n = poller
            .poll(&mut events, Some(Duration::from_millis(20)))
            .expect("poll");

        assert_eq!(n, 0);
    }

    #[test]
    fn test_modify_widens_interest() {
        let mut poller = Poller::new().expect("poller");
        let (_left, right) = UnixStream::pair().expect("socket pair");
        let fd = right.as_raw_fd();
        let mut events = Vec::new();

        poller.register(fd, Events::RECV).expect("register");
        let n = poller
            .poll(&mut events, Some(Duration::from_millis(20)))
            .expect("poll");
        assert_eq!(n, 0);

        poller.modify(fd, Events::ALL).expect("modify");
        let n = poller
            .poll(&mut events, Some(Duration::from_secs(5)))
            .expect("poll");

        assert_eq!(n, 1);
        assert!(events[0].events.is_writable());
        assert!(!events[0].events.is_readable());

        poller.deregister(fd).expect("deregister");
    }

    #[test]
    fn test_waker_interrupts_infinite_poll() {
        let mut poller = Poller::new().expect("poller");
        let waker = poller.waker();
        let mut events = Vec::new();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            waker.wake();
        });

        let n = poller.poll(&mut events, None).expect("poll");
        assert_eq!(n, 0);

        handle.join().expect("waker thread panicked");
    }
}
