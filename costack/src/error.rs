//! Error type shared by the scheduler, the I/O scheduler and the sockets.

use crate::coroutine::{Coroutine, State};

use std::io;
use std::os::fd::RawFd;

/// Errors reported by costack operations.
///
/// Resource and registration failures are recoverable and returned to the
/// immediate caller. Misuse of the state machine is reported as
/// [`Error::InvalidState`] or [`Error::NotInCoroutine`] instead of being
/// silently corrected.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The scheduler was stopped; no new coroutine may start and no
    /// coroutine may block.
    #[error("scheduler is stopped")]
    Stopped,

    /// A coroutine stack could not be mapped.
    #[error("failed to allocate a {size} byte coroutine stack")]
    StackAllocation {
        size: usize,
        #[source]
        source: io::Error,
    },

    /// The target coroutine is in a state the operation does not accept.
    #[error("{coroutine} is {state}, expected {expected}")]
    InvalidState {
        coroutine: Coroutine,
        state: State,
        expected: &'static str,
    },

    /// A blocking operation was called from the host thread itself.
    #[error("operation requires a running coroutine, not the host thread")]
    NotInCoroutine,

    /// Another coroutine is already waiting on this socket.
    #[error("socket {0} is already registered with the poller")]
    AlreadyRegistered(RawFd),

    /// Finite timeouts are not implemented for readiness waits.
    #[error("finite wait timeouts are not supported")]
    TimeoutUnsupported,

    /// The coroutine driven by `block_on` never finished.
    #[error("coroutine did not run to completion")]
    Incomplete,

    /// Poller creation, registration or polling failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result type used throughout costack.
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(err) => err,
            Error::StackAllocation { source, .. } => source,
            Error::AlreadyRegistered(_) => io::Error::new(io::ErrorKind::AddrInUse, err),
            Error::TimeoutUnsupported => io::Error::new(io::ErrorKind::Unsupported, err),
            Error::Stopped | Error::Incomplete => io::Error::new(io::ErrorKind::Interrupted, err),
            other => io::Error::other(other),
        }
    }
}
