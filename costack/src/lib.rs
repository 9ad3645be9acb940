//! # costack
//!
//! **costack** is a stackful cooperative coroutine engine for Rust.
//!
//! Every coroutine runs on its own machine stack and gives up the processor
//! only at explicit points: a [`yield_now`], a [`suspend`], a readiness
//! [`wait`] or the end of its function. A [`Scheduler`] runs its coroutines
//! on a single thread, in FIFO order, with no locks and no preemption.
//!
//! It offers:
//!
//! - a **context switch** written in assembly for x86_64 and aarch64,
//! - **guarded stacks** with a `PROT_NONE` page and sentinel words at both
//!   ends,
//! - a **scheduler** with a ready queue, a suspend set and a bounded cache
//!   of dead coroutines whose stacks are reused,
//! - an **I/O scheduler** that parks coroutines on socket readiness
//!   (`epoll` on Linux, `poll(2)` elsewhere),
//! - **TCP sockets** that block only the calling coroutine,
//! - **macros** `#[costack::main]` and `#[costack::test]`.
//!
//! ## Quick Start
//!
//! ```rust
//! use costack::{Scheduler, Transfer};
//!
//! let scheduler = Scheduler::new();
//!
//! let worker = scheduler.spawn(|| {
//!     let value = costack::suspend(Transfer::Empty).unwrap();
//!     assert_eq!(value.into_value::<&str>(), Some("wake up"));
//! }).unwrap();
//!
//! scheduler.spawn(move || {
//!     costack::resume(worker, Transfer::value("wake up")).unwrap();
//! }).unwrap();
//!
//! scheduler.run();
//! assert!(scheduler.is_dead(worker));
//! ```
//!
//! ## Modules
//!
//! - [`net`]: TCP listener and stream built on readiness waits
//!
//! The library logs through the [`log`] facade and installs no logger.

mod coroutine;
mod error;
mod reactor;
mod scheduler;
mod utils;

pub mod net;

pub use coroutine::{Coroutine, State, Transfer};
pub use error::{Error, Result};
pub use reactor::{Events, cancel, wait};
pub use scheduler::builder::{
    DEFAULT_DEAD_CACHE, DEFAULT_STACK_SIZE, MIN_STACK_SIZE, SchedulerBuilder,
};
pub use scheduler::{
    Scheduler, StopHandle, finish, resume, running, spawn, start, stop, suspend, yield_now,
};

pub use costack_macros::{main, test};
