//! Utilities for memory-efficient data structures.
//!
//! This module provides low-level utilities used internally by the
//! scheduler. In particular, it exposes the [`Slab`] arena holding the
//! coroutine control blocks.

mod slab;

pub(crate) use slab::Slab;
