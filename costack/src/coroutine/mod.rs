//! Coroutine representation.
//!
//! A coroutine is an independently switchable unit of execution with a
//! private machine stack. This module provides:
//! - the context-switch primitive,
//! - guarded stack allocation,
//! - the coroutine control block with its create / recreate / destroy
//!   lifecycle and the trampoline every coroutine starts in,
//! - the public state, handle and transfer types.
//!
//! Scheduling decisions live in [`crate::scheduler`].

pub(crate) mod context;
pub(crate) mod core;
pub(crate) mod stack;

mod state;

pub(crate) use self::core::{Function, Record};
pub use state::{Coroutine, State, Transfer};
