//! TCP networking primitives.
//!
//! This module provides TCP sockets that cooperate with the scheduler.
//! When an operation would block inside a coroutine, the coroutine waits
//! for the socket through [`wait`](crate::wait) and the other coroutines
//! keep running. Outside a coroutine the same types block the thread.
//!
//! It exposes:
//! - listening for incoming TCP connections,
//! - establishing outbound TCP connections,
//! - reading and writing through `std::io::Read` / `Write`.

mod sys;
mod tcp;

pub use tcp::listener::TcpListener;
pub use tcp::stream::TcpStream;
