//! I/O scheduler and readiness events.
//!
//! This module implements the I/O side of the scheduler. The I/O
//! scheduler is responsible for:
//! - turning a readiness wait into a suspend of the calling coroutine,
//! - driving the poller from a dedicated loop coroutine,
//! - resuming waiters when their sockets become ready.
//!
//! It is created lazily by the first [`wait`] and shares the thread of
//! the scheduler it belongs to; there is no reactor thread.

mod core;
mod event;

pub(crate) mod poller;

pub(crate) use self::core::IoScheduler;
pub use event::Events;

use crate::error::Result;
use crate::scheduler::context::with_current;

use std::os::fd::RawFd;
use std::time::Duration;

/// Suspends the running coroutine until `fd` is ready for `events`.
///
/// Returns the readiness that fired: the requested directions, plus
/// [`Events::EOF`] or [`Events::ERROR`] when the peer hung up or the socket
/// failed. If the coroutine is woken by anything else (a manual
/// [`resume`](crate::resume) or [`cancel`]), [`Events::NONE`] is returned;
/// a [`Transfer::Value`](crate::Transfer::Value) passed to that resume is
/// dropped, while [`Transfer::Events`](crate::Transfer::Events) is returned
/// as is. Either way the registration is gone when `wait` returns.
///
/// Each socket takes one waiter for [`Events::RECV`] and one for
/// [`Events::SEND`], which may be different coroutines.
///
/// `timeout` must be `None`; finite timeouts are not supported.
///
/// # Errors
///
/// - [`Error::Stopped`](crate::Error::Stopped) if the scheduler is stopped,
///   before or during the wait,
/// - [`Error::NotInCoroutine`](crate::Error::NotInCoroutine) when called
///   from the host thread,
/// - [`Error::TimeoutUnsupported`](crate::Error::TimeoutUnsupported) for a
///   finite timeout,
/// - [`Error::AlreadyRegistered`](crate::Error::AlreadyRegistered) if
///   somebody already waits on `fd` in one of the requested directions,
/// - [`Error::Io`](crate::Error::Io) if `events` names no direction or the
///   poller rejects the socket.
///
/// # Panics
///
/// Panics when no scheduler is running on this thread.
pub fn wait(fd: RawFd, events: Events, timeout: Option<Duration>) -> Result<Events> {
    with_current(|core| self::core::wait(core, fd, events, timeout))
}

/// Cancels the waits pending on `fd`.
///
/// Both its reader and its writer are resumed, and their [`wait`]s return
/// [`Events::NONE`].
/// Returns `false` when nobody was waiting on `fd`.
///
/// # Panics
///
/// Panics when no scheduler is running on this thread.
pub fn cancel(fd: RawFd) -> Result<bool> {
    with_current(|core| self::core::cancel(core, fd))
}
