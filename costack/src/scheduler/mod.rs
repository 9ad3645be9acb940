//! Coroutine scheduling.
//!
//! A [`Scheduler`] owns a set of coroutines and switches between them
//! cooperatively on one thread. Coroutines are scheduled in FIFO order:
//!
//! - [`start`] queues a new coroutine at the tail of the ready queue,
//! - [`yield_now`] moves the caller to the tail and runs the head,
//! - [`suspend`] parks the caller until someone calls [`resume`],
//! - a coroutine whose function returns becomes dead and its stack is kept
//!   for reuse by a later start.
//!
//! The host thread takes part as the *original* coroutine: it drives the
//! ready queue from [`Scheduler::run`] and gets control back once nothing
//! is ready any more.
//!
//! The free functions of this module act on the scheduler the calling
//! coroutine belongs to.

pub(crate) mod builder;
pub(crate) mod context;
pub(crate) mod core;

use self::builder::{Config, SchedulerBuilder};
use self::context::{enter, with_current};
use self::core::{Core, Shared};
use crate::coroutine::{Coroutine, State, Transfer};
use crate::error::{Error, Result};
use crate::reactor::Events;

use std::cell::Cell;
use std::os::fd::RawFd;
use std::panic;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

/// A cooperative coroutine scheduler bound to one thread.
///
/// `Scheduler` is responsible for:
/// - allocating coroutines and their stacks,
/// - switching between them in FIFO order,
/// - parking and resuming suspended coroutines,
/// - running readiness waits through its I/O scheduler.
///
/// Dropping the scheduler frees every stack, including those of
/// coroutines that never finished. Values owned by such coroutines are
/// leaked rather than dropped.
///
/// Coroutines only run while a caller borrows the scheduler, through
/// [`run`](Self::run), [`block_on`](Self::block_on) and the like, so the
/// scheduler is never dropped from one of its own stacks. A coroutine may
/// hold an `Rc<Scheduler>`; if it is still suspended when every other
/// handle is gone, the scheduler is leaked instead.
///
/// # Examples
///
/// ```rust
/// use costack::Scheduler;
///
/// let scheduler = Scheduler::new();
///
/// scheduler.spawn(|| {
///     costack::yield_now();
/// }).unwrap();
///
/// scheduler.run();
/// assert_eq!(scheduler.ready_count(), 0);
/// ```
pub struct Scheduler {
    core: Box<Core>,
}

impl Scheduler {
    /// Creates a scheduler with the default configuration.
    pub fn new() -> Self {
        SchedulerBuilder::new().build()
    }

    /// Returns a [`SchedulerBuilder`] to configure a new scheduler.
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    pub(crate) fn with_config(config: Config) -> Self {
        Self {
            core: Box::new(Core::new(config)),
        }
    }

    /// Starts a coroutine running `f` with at least `stack_size` bytes of
    /// stack.
    ///
    /// A `stack_size` of `0` uses the configured default, and any other
    /// request is raised to at least
    /// [`MIN_STACK_SIZE`](crate::MIN_STACK_SIZE). The coroutine is queued
    /// behind the coroutines already ready and runs at the next
    /// [`run`](Self::run).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Stopped`] once the scheduler is stopped and
    /// [`Error::StackAllocation`] if the stack cannot be mapped.
    pub fn start<F>(&self, f: F, stack_size: usize) -> Result<Coroutine>
    where
        F: FnOnce() + 'static,
    {
        self.core.start(Box::new(f), stack_size)
    }

    /// Starts a coroutine with the configured default stack size.
    pub fn spawn<F>(&self, f: F) -> Result<Coroutine>
    where
        F: FnOnce() + 'static,
    {
        self.core.start(Box::new(f), self.core.config.stack_size)
    }

    /// Runs coroutines until none is ready.
    ///
    /// Coroutines left suspended stay parked; they run again once resumed
    /// and the scheduler is run again.
    ///
    /// # Panics
    ///
    /// Re-raises the panic of a coroutine that panicked, after that
    /// coroutine has been marked dead. Also panics when called from one of
    /// this scheduler's own coroutines.
    pub fn run(&self) {
        enter(&self.core, || self.core.drive());
        self.raise();
    }

    /// Runs `f` in a coroutine and drives the scheduler until it returns.
    ///
    /// Other coroutines started from `f` keep running alongside; the call
    /// returns once nothing is ready.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Incomplete`] if `f` did not finish, e.g. because it
    /// is still suspended when the ready queue runs dry, and the errors of
    /// [`start`](Self::start).
    ///
    /// # Examples
    ///
    /// ```rust
    /// let scheduler = costack::Scheduler::new();
    ///
    /// let sum = scheduler.block_on(|| (1..=10).sum::<u32>()).unwrap();
    /// assert_eq!(sum, 55);
    /// ```
    pub fn block_on<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R + 'static,
        R: 'static,
    {
        let slot = Rc::new(Cell::new(None));
        let out = slot.clone();

        self.spawn(move || out.set(Some(f())))?;
        self.run();

        slot.take().ok_or(Error::Incomplete)
    }

    /// Yields to the ready queue.
    ///
    /// From the host thread, this runs ready coroutines until the queue is
    /// empty. Returns `false` when nothing was ready.
    pub fn yield_now(&self) -> bool {
        let ran = enter(&self.core, || self.core.yield_now());
        if !self.core.in_coroutine() {
            self.raise();
        }
        ran
    }

    /// Suspends the running coroutine; see [`suspend`].
    pub fn suspend(&self, value: Transfer) -> Result<Transfer> {
        self.core.suspend(value)
    }

    /// Resumes a suspended coroutine; see [`resume`].
    pub fn resume(&self, coroutine: Coroutine, value: Transfer) -> Result<Transfer> {
        self.core.resume(coroutine, value)
    }

    /// Frees a dead coroutine and its stack immediately.
    ///
    /// Dead coroutines are otherwise kept for reuse or evicted by later
    /// starts. A stale handle is accepted and ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the coroutine is not dead.
    pub fn destroy(&self, coroutine: Coroutine) -> Result<()> {
        self.core.destroy(coroutine)
    }

    /// Waits for readiness on `fd`; see [`wait`](crate::wait).
    pub fn wait(&self, fd: RawFd, events: Events, timeout: Option<Duration>) -> Result<Events> {
        enter(&self.core, || crate::reactor::wait(fd, events, timeout))
    }

    /// Cancels the waits pending on `fd`; see [`cancel`](crate::cancel).
    pub fn cancel(&self, fd: RawFd) -> Result<bool> {
        enter(&self.core, || crate::reactor::cancel(fd))
    }

    /// Stops the scheduler.
    ///
    /// Further starts, suspends and waits are refused with
    /// [`Error::Stopped`], and pending waits are released.
    pub fn stop(&self) {
        self.core.shared.stop();
    }

    /// Returns a handle that stops this scheduler from any thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: self.core.shared.clone(),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.core.is_stopped()
    }

    /// Current state of `coroutine`. Stale handles report
    /// [`State::Dead`].
    pub fn state(&self, coroutine: Coroutine) -> State {
        self.core.state(coroutine)
    }

    pub fn is_ready(&self, coroutine: Coroutine) -> bool {
        self.state(coroutine) == State::Ready
    }

    pub fn is_running(&self, coroutine: Coroutine) -> bool {
        self.state(coroutine) == State::Running
    }

    pub fn is_suspend(&self, coroutine: Coroutine) -> bool {
        self.state(coroutine) == State::Suspend
    }

    pub fn is_dead(&self, coroutine: Coroutine) -> bool {
        self.state(coroutine) == State::Dead
    }

    /// Usable stack bytes of `coroutine`, `0` for the original coroutine
    /// and for stale handles.
    pub fn stack_size(&self, coroutine: Coroutine) -> usize {
        self.core.stack_size(coroutine)
    }

    /// The coroutine currently running, the original one outside
    /// [`run`](Self::run).
    pub fn running(&self) -> Coroutine {
        self.core.running()
    }

    /// The coroutine standing for the host thread.
    pub fn original(&self) -> Coroutine {
        self.core.original()
    }

    /// Number of coroutines in the ready queue.
    pub fn ready_count(&self) -> usize {
        self.core.ready_count()
    }

    /// Number of suspended coroutines.
    pub fn suspend_count(&self) -> usize {
        self.core.suspend_count()
    }

    /// Number of dead coroutines kept for reuse.
    pub fn dead_count(&self) -> usize {
        self.core.dead_count()
    }

    /// Handles of the suspended coroutines, so that they can be resumed
    /// before the scheduler is dropped.
    pub fn suspended(&self) -> Vec<Coroutine> {
        self.core.suspended()
    }

    fn raise(&self) {
        if let Some(payload) = self.core.take_panic() {
            panic::resume_unwind(payload);
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle that stops a [`Scheduler`] from any thread.
///
/// Stopping sets the scheduler's stopped flag and interrupts the I/O
/// scheduler if it is blocked in the poller, so that pending waits return
/// [`Error::Stopped`].
#[derive(Clone)]
pub struct StopHandle {
    shared: Arc<Shared>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.shared.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }
}

/// Starts a coroutine on the current scheduler.
///
/// `stack_size` follows [`Scheduler::start`]: `0` selects the default.
///
/// # Panics
///
/// Panics when no scheduler is running on this thread.
pub fn start<F>(f: F, stack_size: usize) -> Result<Coroutine>
where
    F: FnOnce() + 'static,
{
    with_current(|core| core.start(Box::new(f), stack_size))
}

/// Starts a coroutine on the current scheduler with its default stack
/// size.
///
/// # Panics
///
/// Panics when no scheduler is running on this thread.
pub fn spawn<F>(f: F) -> Result<Coroutine>
where
    F: FnOnce() + 'static,
{
    with_current(|core| core.start(Box::new(f), core.config.stack_size))
}

/// Yields the processor to the next ready coroutine.
///
/// Returns `false`, without switching, when no other coroutine is ready.
///
/// # Panics
///
/// Panics when no scheduler is running on this thread.
pub fn yield_now() -> bool {
    with_current(|core| core.yield_now())
}

/// Suspends the running coroutine until it is resumed.
///
/// `value` is returned to the coroutine that resumes this one; the value
/// that coroutine passes to [`resume`] is returned here.
///
/// # Errors
///
/// Returns [`Error::Stopped`] if the scheduler is stopped and
/// [`Error::NotInCoroutine`] on the host thread.
///
/// # Panics
///
/// Panics when no scheduler is running on this thread.
pub fn suspend(value: Transfer) -> Result<Transfer> {
    with_current(|core| core.suspend(value))
}

/// Makes a suspended coroutine ready again.
///
/// The coroutine does not run right away: it is queued behind the ready
/// ones. Returns the value it passed to [`suspend`]. Resuming a ready
/// coroutine does nothing and returns [`Transfer::Empty`].
///
/// # Errors
///
/// Returns [`Error::InvalidState`] for a running or dead coroutine.
///
/// # Panics
///
/// Panics when no scheduler is running on this thread.
pub fn resume(coroutine: Coroutine, value: Transfer) -> Result<Transfer> {
    with_current(|core| core.resume(coroutine, value))
}

/// Ends the running coroutine immediately.
///
/// Values still owned by the coroutine's stack frames are leaked.
///
/// # Panics
///
/// Panics when called from the host thread or when no scheduler is
/// running on this thread.
pub fn finish() -> ! {
    with_current(|core| {
        core.finish();
    });

    unreachable!("dead coroutine resumed")
}

/// The coroutine currently running on this thread's scheduler.
///
/// # Panics
///
/// Panics when no scheduler is running on this thread.
pub fn running() -> Coroutine {
    with_current(|core| core.running())
}

/// Stops the current scheduler.
///
/// # Panics
///
/// Panics when no scheduler is running on this thread.
pub fn stop() {
    with_current(|core| core.shared.stop())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_handle_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StopHandle>();
    }

    #[test]
    fn test_stop_refuses_start() {
        let scheduler = Scheduler::new();
        let handle = scheduler.stop_handle();

        handle.stop();

        assert!(scheduler.is_stopped());
        assert!(matches!(scheduler.spawn(|| {}), Err(Error::Stopped)));
    }

    #[test]
    fn test_free_functions_inside_coroutine() {
        let scheduler = Scheduler::new();

        let inner = scheduler
            .block_on(|| {
                let me = running();
                let child = spawn(|| {}).expect("spawn");
                assert!(yield_now());
                (me, child)
            })
            .expect("block_on");

        assert_eq!(scheduler.state(inner.0), State::Dead);
        assert_eq!(scheduler.state(inner.1), State::Dead);
    }

    #[test]
    #[should_panic(expected = "no scheduler in context")]
    fn test_free_function_outside_scheduler() {
        running();
    }
}
