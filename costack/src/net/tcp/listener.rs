use super::stream::TcpStream;
use crate::net::sys;
use crate::reactor::Events;

use std::io;
use std::net::{self, SocketAddr, ToSocketAddrs};
use std::os::fd::{AsRawFd, RawFd};

/// A TCP listener that blocks only the calling coroutine.
///
/// `TcpListener` listens for incoming TCP connections. When no connection
/// is pending, [`accept`](Self::accept) waits for the socket through the
/// scheduler, letting the other coroutines run meanwhile. Used outside a
/// coroutine, it blocks the thread like [`std::net::TcpListener`].
pub struct TcpListener {
    inner: net::TcpListener,
}

impl TcpListener {
    /// Binds a TCP listener to the given address.
    ///
    /// The socket is switched to non-blocking mode; `SO_REUSEADDR` is set
    /// by the standard library on unix targets.
    pub fn bind<A: ToSocketAddrs>(address: A) -> io::Result<Self> {
        Self::from_std(net::TcpListener::bind(address)?)
    }

    /// Wraps a bound standard listener.
    pub fn from_std(listener: net::TcpListener) -> io::Result<Self> {
        listener.set_nonblocking(true)?;

        Ok(Self { inner: listener })
    }

    /// Accepts an incoming TCP connection.
    ///
    /// Waits until a client connects, then returns a [`TcpStream`] and the
    /// peer address.
    pub fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let (stream, address) =
            sys::retry(self.as_raw_fd(), Events::ACCEPT, || self.inner.accept())?;

        Ok((TcpStream::from_std(stream)?, address))
    }

    /// Returns the local socket address of this listener.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

impl AsRawFd for TcpListener {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}
