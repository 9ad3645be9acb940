use crate::reactor::Events;

use std::any::Any;
use std::fmt;

/// Lifecycle state of a coroutine.
///
/// ```text
/// READY --switch in--> RUNNING --yield---> READY
///                      RUNNING --suspend-> SUSPEND --resume--> READY
///                      RUNNING --finish--> DEAD
/// ```
///
/// `Dead` is terminal until the coroutine is destroyed or recycled by a
/// later start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Queued and waiting for its turn.
    Ready,

    /// Currently executing. At most one coroutine per scheduler.
    Running,

    /// Parked until someone resumes it.
    Suspend,

    /// The user function has returned.
    Dead,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Ready => "ready",
            State::Running => "running",
            State::Suspend => "suspend",
            State::Dead => "dead",
        };

        f.write_str(name)
    }
}

/// Handle to a coroutine owned by a [`Scheduler`](crate::Scheduler).
///
/// Handles are cheap to copy. A handle keeps naming the same coroutine
/// until that coroutine is destroyed or its slot is recycled by a later
/// start; after that the handle is stale and every query on it reports
/// [`State::Dead`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Coroutine {
    pub(crate) slot: usize,
    pub(crate) id: u64,
}

impl Coroutine {
    /// Unique identifier of this coroutine incarnation.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Display for Coroutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "coroutine#{}", self.id)
    }
}

/// Value carried from a [`resume`](crate::Scheduler::resume) to the
/// matching [`suspend`](crate::Scheduler::suspend), or back.
///
/// Each wait reason has its own variant: readiness waits deliver
/// [`Transfer::Events`], user code passes arbitrary values through
/// [`Transfer::Value`].
#[derive(Debug, Default)]
pub enum Transfer {
    /// Nothing was passed.
    #[default]
    Empty,

    /// Readiness delivered by the I/O scheduler.
    Events(Events),

    /// An arbitrary user value.
    Value(Box<dyn Any>),
}

impl Transfer {
    /// Wraps a user value.
    pub fn value<T: 'static>(value: T) -> Self {
        Transfer::Value(Box::new(value))
    }

    /// Returns `true` for [`Transfer::Empty`].
    pub fn is_empty(&self) -> bool {
        matches!(self, Transfer::Empty)
    }

    /// Returns the readiness mask, if this transfer carries one.
    pub fn events(&self) -> Option<Events> {
        match self {
            Transfer::Events(events) => Some(*events),
            _ => None,
        }
    }

    /// Extracts a user value of type `T`.
    ///
    /// Returns `None` for the other variants or when the value has a
    /// different type.
    pub fn into_value<T: 'static>(self) -> Option<T> {
        match self {
            Transfer::Value(value) => value.downcast::<T>().ok().map(|v| *v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_value_downcast() {
        let transfer = Transfer::value(42u32);
        assert_eq!(transfer.into_value::<u32>(), Some(42));

        let transfer = Transfer::value("text");
        assert_eq!(transfer.into_value::<u32>(), None);
    }

    #[test]
    fn test_transfer_events() {
        let transfer = Transfer::Events(Events::RECV);
        assert_eq!(transfer.events(), Some(Events::RECV));
        assert!(Transfer::Empty.is_empty());
        assert_eq!(Transfer::Empty.events(), None);
    }
}
