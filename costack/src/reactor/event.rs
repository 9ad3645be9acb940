use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};
use std::os::fd::RawFd;

/// Readiness event mask.
///
/// Used both as the interest passed to [`wait`](crate::wait) and as the
/// readiness it returns. Besides the requested bits, a delivered mask may
/// carry [`Events::EOF`] (peer hung up) and [`Events::ERROR`] (pending
/// socket error).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Events(u16);

impl Events {
    /// No events.
    pub const NONE: Events = Events(0);

    /// The socket is readable.
    pub const RECV: Events = Events(0x0001);

    /// The socket is writable.
    pub const SEND: Events = Events(0x0002);

    /// A listening socket has a pending connection.
    pub const ACCEPT: Events = Events::RECV;

    /// A non-blocking connect has completed.
    pub const CONNECT: Events = Events::SEND;

    /// Both directions.
    pub const ALL: Events = Events(0x0003);

    /// The peer closed its end.
    pub const EOF: Events = Events(0x0100);

    /// The socket has a pending error.
    pub const ERROR: Events = Events(0x0200);

    /// Raw bit representation.
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Builds a mask from raw bits, dropping unknown ones.
    pub const fn from_bits_truncate(bits: u16) -> Self {
        Events(bits & (Self::ALL.0 | Self::EOF.0 | Self::ERROR.0))
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if every bit of `other` is set in `self`.
    pub const fn contains(self, other: Events) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if any bit of `other` is set in `self`.
    pub const fn intersects(self, other: Events) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_readable(self) -> bool {
        self.intersects(Self::RECV)
    }

    pub const fn is_writable(self) -> bool {
        self.intersects(Self::SEND)
    }
}

impl BitOr for Events {
    type Output = Events;

    fn bitor(self, rhs: Events) -> Events {
        Events(self.0 | rhs.0)
    }
}

impl BitOrAssign for Events {
    fn bitor_assign(&mut self, rhs: Events) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Events {
    type Output = Events;

    fn bitand(self, rhs: Events) -> Events {
        Events(self.0 & rhs.0)
    }
}

impl Not for Events {
    type Output = Events;

    fn not(self) -> Events {
        Events::from_bits_truncate(!self.0)
    }
}

impl fmt::Debug for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }

        let names = [
            (Events::RECV, "RECV"),
            (Events::SEND, "SEND"),
            (Events::EOF, "EOF"),
            (Events::ERROR, "ERROR"),
        ];

        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }

        Ok(())
    }
}

/// A readiness event reported by the poller.
///
/// Produced by a poller backend and consumed by the I/O scheduler to
/// resume the coroutine waiting on `fd`.
pub(crate) struct Event {
    /// The socket the event belongs to.
    pub(crate) fd: RawFd,

    /// What became ready.
    pub(crate) events: Events,
}
