//! TCP networking implementation.
//!
//! It is split into:
//! - [`listener`]: accepting incoming TCP connections,
//! - [`stream`]: connected TCP streams implementing `Read` and `Write`.

pub mod listener;
pub mod stream;
