use crate::net::sys;
use crate::reactor::Events;

use std::io::{self, Read, Write};
use std::net::{self, Shutdown, SocketAddr, ToSocketAddrs};
use std::os::fd::{AsRawFd, RawFd};

/// A TCP stream that blocks only the calling coroutine.
///
/// Every operation first tries the non-blocking system call. When the
/// socket is not ready yet, the calling coroutine waits for it through
/// the scheduler and retries afterwards. Used outside a coroutine, the
/// stream blocks the thread like [`std::net::TcpStream`].
///
/// One coroutine may wait to read while another waits to write, so a
/// stream can be split between a reader and a writer. A second waiter in
/// the same direction fails with [`io::ErrorKind::AddrInUse`].
pub struct TcpStream {
    inner: net::TcpStream,
}

impl TcpStream {
    /// Establishes a TCP connection to `address`.
    ///
    /// Each resolved address is tried in turn: a non-blocking connect is
    /// started, the caller waits for the socket to become writable, and
    /// the pending socket error decides whether the attempt succeeded.
    /// The error of the last attempt is returned if none did.
    pub fn connect<A: ToSocketAddrs>(address: A) -> io::Result<Self> {
        let mut last = None;

        for addr in address.to_socket_addrs()? {
            match Self::connect_addr(&addr) {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    log::debug!("connect to {addr} failed: {err}");
                    last = Some(err);
                }
            }
        }

        Err(last.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "could not resolve to any address",
            )
        }))
    }

    fn connect_addr(addr: &SocketAddr) -> io::Result<Self> {
        let fd = sys::socket_for(addr)?;
        let inner = net::TcpStream::from(fd);

        if !sys::connect_nonblocking(inner.as_raw_fd(), addr)? {
            sys::wait_ready(inner.as_raw_fd(), Events::CONNECT)?;

            if let Some(err) = inner.take_error()? {
                return Err(err);
            }
        }

        Ok(Self { inner })
    }

    /// Wraps a connected standard stream, switching it to non-blocking
    /// mode.
    pub fn from_std(stream: net::TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;

        Ok(Self { inner: stream })
    }

    /// Returns the remote address of this connection.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.peer_addr()
    }

    /// Returns the local address of this connection.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Shuts down the read, write, or both halves of this connection.
    pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        self.inner.shutdown(how)
    }

    /// Sets the `TCP_NODELAY` option.
    pub fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        self.inner.set_nodelay(nodelay)
    }
}

impl Read for TcpStream {
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        let fd = self.as_raw_fd();
        let inner = &mut self.inner;

        sys::retry(fd, Events::RECV, || inner.read(buffer))
    }
}

impl Write for TcpStream {
    fn write(&mut self, buffer: &[u8]) -> io::Result<usize> {
        let fd = self.as_raw_fd();
        let inner = &mut self.inner;

        sys::retry(fd, Events::SEND, || inner.write(buffer))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl AsRawFd for TcpStream {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}
