use super::builder::{Config, MIN_STACK_SIZE};
use crate::coroutine::context::{self, Transfer as RawTransfer};
use crate::coroutine::{Coroutine, Function, Record, State, Transfer};
use crate::error::{Error, Result};
use crate::reactor::IoScheduler;
use crate::reactor::poller::Waker;
use crate::utils::Slab;

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, VecDeque};
use std::ffi::c_void;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Slot of the original coroutine, i.e. the host thread.
pub(crate) const ORIGINAL: usize = 0;

/// Panic payload caught on a coroutine stack.
type Payload = Box<dyn Any + Send>;

/// State shared with [`StopHandle`](super::StopHandle)s on other threads.
pub(crate) struct Shared {
    stopped: AtomicBool,

    /// Waker of the I/O poller, set once the poller exists.
    waker: OnceLock<Arc<Waker>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            stopped: AtomicBool::new(false),
            waker: OnceLock::new(),
        }
    }

    /// Marks the scheduler stopped and kills a blocked poll.
    pub(crate) fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            log::debug!("scheduler stopped");
        }

        if let Some(waker) = self.waker.get() {
            waker.wake();
        }
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn set_waker(&self, waker: Arc<Waker>) {
        let _ = self.waker.set(waker);
    }
}

/// Scheduler state.
///
/// Every coroutine control block lives in the slab, the original one in
/// slot [`ORIGINAL`]. Apart from the running one, each coroutine is listed
/// in exactly one of `ready`, `suspend` or `dead`. The original is never
/// listed: while it is parked it waits as the fallback target of
/// `switch_next`.
///
/// None of the `RefCell` borrows below is ever held across a context
/// switch.
pub(crate) struct Core {
    coroutines: RefCell<Slab<Record>>,

    /// FIFO of slots waiting to run.
    ready: RefCell<VecDeque<usize>>,

    /// Slots parked by `suspend`, in slot order.
    suspend: RefCell<BTreeSet<usize>>,

    /// Dead slots kept for reuse, oldest first.
    dead: RefCell<VecDeque<usize>>,

    running: Cell<usize>,

    next_id: Cell<u64>,

    /// First panic caught on a coroutine stack, waiting to be re-raised.
    panic: RefCell<Option<Payload>>,

    pub(crate) shared: Arc<Shared>,

    /// Lazily created on the first readiness wait.
    pub(crate) io: RefCell<Option<IoScheduler>>,

    pub(crate) config: Config,
}

impl Core {
    pub(crate) fn new(config: Config) -> Self {
        let mut coroutines = Slab::new(16);
        let original = coroutines.insert(Record::original(0));
        debug_assert_eq!(original, ORIGINAL);

        Self {
            coroutines: RefCell::new(coroutines),
            ready: RefCell::new(VecDeque::new()),
            suspend: RefCell::new(BTreeSet::new()),
            dead: RefCell::new(VecDeque::new()),
            running: Cell::new(ORIGINAL),
            next_id: Cell::new(1),
            panic: RefCell::new(None),
            shared: Arc::new(Shared::new()),
            io: RefCell::new(None),
            config,
        }
    }

    fn next_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn handle(&self, slot: usize) -> Coroutine {
        Coroutine {
            slot,
            id: self.coroutines.borrow()[slot].id,
        }
    }

    pub(crate) fn running(&self) -> Coroutine {
        self.handle(self.running.get())
    }

    pub(crate) fn original(&self) -> Coroutine {
        self.handle(ORIGINAL)
    }

    /// Returns `true` when a coroutine other than the original is running.
    pub(crate) fn in_coroutine(&self) -> bool {
        self.running.get() != ORIGINAL
    }

    /// State of `coroutine`; stale handles report [`State::Dead`].
    pub(crate) fn state(&self, coroutine: Coroutine) -> State {
        self.coroutines
            .borrow()
            .get(coroutine.slot)
            .filter(|record| record.id == coroutine.id)
            .map_or(State::Dead, |record| record.state)
    }

    pub(crate) fn stack_size(&self, coroutine: Coroutine) -> usize {
        self.coroutines
            .borrow()
            .get(coroutine.slot)
            .filter(|record| record.id == coroutine.id)
            .map_or(0, Record::stack_size)
    }

    pub(crate) fn ready_count(&self) -> usize {
        self.ready.borrow().len()
    }

    pub(crate) fn suspend_count(&self) -> usize {
        self.suspend.borrow().len()
    }

    pub(crate) fn dead_count(&self) -> usize {
        self.dead.borrow().len()
    }

    pub(crate) fn suspended(&self) -> Vec<Coroutine> {
        let slots: Vec<usize> = self.suspend.borrow().iter().copied().collect();
        slots.into_iter().map(|slot| self.handle(slot)).collect()
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    /// Starts a coroutine running `function` on at least `stack_size`
    /// bytes of stack.
    ///
    /// A `stack_size` of `0` selects the configured default; smaller
    /// requests are raised to [`MIN_STACK_SIZE`]. The oldest dead coroutine
    /// is recycled when there is one, then the dead cache is trimmed to its
    /// cap. The new coroutine is queued at the tail of the ready queue;
    /// nothing is switched.
    pub(crate) fn start(&self, function: Function, stack_size: usize) -> Result<Coroutine> {
        if self.is_stopped() {
            return Err(Error::Stopped);
        }

        let stack_size = match stack_size {
            0 => self.config.stack_size,
            size => size.max(MIN_STACK_SIZE),
        };

        let id = self.next_id();
        let recycled = self.dead.borrow_mut().pop_front();

        let slot = match recycled {
            Some(slot) => {
                let mut coroutines = self.coroutines.borrow_mut();

                if let Err(source) = coroutines[slot].recreate(id, function, stack_size) {
                    coroutines.remove(slot);
                    return Err(Error::StackAllocation {
                        size: stack_size,
                        source,
                    });
                }

                log::debug!("coroutine#{id}: recycled slot {slot}");
                slot
            }
            None => {
                let record = Record::create(id, function, stack_size).map_err(|source| {
                    Error::StackAllocation {
                        size: stack_size,
                        source,
                    }
                })?;

                let slot = self.coroutines.borrow_mut().insert(record);
                log::debug!("coroutine#{id}: created in slot {slot}");
                slot
            }
        };

        self.ready.borrow_mut().push_back(slot);
        self.trim_dead();

        Ok(Coroutine { slot, id })
    }

    /// Destroys dead coroutines, oldest first, until the cache fits its cap.
    fn trim_dead(&self) {
        let mut dead = self.dead.borrow_mut();
        let mut coroutines = self.coroutines.borrow_mut();

        while dead.len() > self.config.dead_cache {
            let Some(slot) = dead.pop_front() else {
                break;
            };

            if let Some(record) = coroutines.remove(slot) {
                log::debug!("coroutine#{}: evicted from dead cache", record.id);
            }
        }
    }

    /// Frees a dead coroutine and its stack.
    ///
    /// A stale handle is a no-op, its coroutine is already gone.
    pub(crate) fn destroy(&self, coroutine: Coroutine) -> Result<()> {
        let current = self
            .coroutines
            .borrow()
            .get(coroutine.slot)
            .is_some_and(|record| record.id == coroutine.id);

        if !current {
            return Ok(());
        }

        let state = self.state(coroutine);
        if state != State::Dead {
            return Err(Error::InvalidState {
                coroutine,
                state,
                expected: "dead",
            });
        }

        self.dead.borrow_mut().retain(|&slot| slot != coroutine.slot);
        self.coroutines.borrow_mut().remove(coroutine.slot);
        log::debug!("{coroutine}: destroyed");

        Ok(())
    }

    /// Gives up the processor to the head of the ready queue.
    ///
    /// Returns `false` without switching when nothing else is ready. For
    /// the original coroutine this drives the ready queue until it is
    /// empty instead of requeuing the host thread.
    pub(crate) fn yield_now(&self) -> bool {
        if self.ready.borrow().is_empty() {
            return false;
        }

        let current = self.running.get();
        if current == ORIGINAL {
            return self.drive();
        }

        self.coroutines.borrow_mut()[current].state = State::Ready;
        self.ready.borrow_mut().push_back(current);
        self.switch_next();

        true
    }

    /// Runs ready coroutines from the host thread until the queue is empty
    /// or a coroutine panicked.
    ///
    /// Returns `true` if at least one coroutine ran.
    pub(crate) fn drive(&self) -> bool {
        assert!(
            !self.in_coroutine(),
            "a scheduler cannot be driven from one of its own coroutines"
        );

        let mut ran = false;

        loop {
            if self.panic.borrow().is_some() {
                break;
            }

            let Some(next) = self.ready.borrow_mut().pop_front() else {
                break;
            };

            self.coroutines.borrow_mut()[ORIGINAL].state = State::Ready;
            self.switch(next);
            ran = true;
        }

        ran
    }

    /// Parks the running coroutine until someone resumes it.
    ///
    /// `value` is handed to the resumer; the value it passes back is
    /// returned here.
    pub(crate) fn suspend(&self, value: Transfer) -> Result<Transfer> {
        if self.is_stopped() {
            return Err(Error::Stopped);
        }

        let current = self.running.get();
        if current == ORIGINAL {
            return Err(Error::NotInCoroutine);
        }

        {
            let mut coroutines = self.coroutines.borrow_mut();
            let record = &mut coroutines[current];
            record.transfer = value;
            record.state = State::Suspend;
        }

        self.suspend.borrow_mut().insert(current);
        self.switch_next();

        let value = mem::take(&mut self.coroutines.borrow_mut()[current].transfer);
        Ok(value)
    }

    /// Makes a suspended coroutine ready again.
    ///
    /// Stores `value` for the pending `suspend` and returns what that
    /// suspend handed over. A ready target is left alone. Never switches.
    pub(crate) fn resume(&self, coroutine: Coroutine, value: Transfer) -> Result<Transfer> {
        match self.state(coroutine) {
            State::Suspend => {
                self.suspend.borrow_mut().remove(&coroutine.slot);

                let previous = {
                    let mut coroutines = self.coroutines.borrow_mut();
                    let record = &mut coroutines[coroutine.slot];
                    record.state = State::Ready;
                    mem::replace(&mut record.transfer, value)
                };

                self.ready.borrow_mut().push_back(coroutine.slot);
                log::trace!("{coroutine}: resumed");

                Ok(previous)
            }
            State::Ready => Ok(Transfer::Empty),
            state => Err(Error::InvalidState {
                coroutine,
                state,
                expected: "suspend or ready",
            }),
        }
    }

    /// Ends the running coroutine and switches away for good.
    ///
    /// # Panics
    ///
    /// Panics when called from the host thread.
    pub(crate) fn finish(&self) -> ! {
        let current = self.running.get();
        assert!(current != ORIGINAL, "finish called from the host thread");

        // Dropped once the borrow is released, a value may own handles
        // that reach back into the scheduler.
        let (function, transfer) = {
            let mut coroutines = self.coroutines.borrow_mut();
            let record = &mut coroutines[current];
            record.state = State::Dead;
            log::trace!("coroutine#{}: finished", record.id);
            (record.function.take(), mem::take(&mut record.transfer))
        };
        drop(function);
        drop(transfer);

        self.dead.borrow_mut().push_back(current);
        self.switch_next();

        unreachable!("dead coroutine resumed")
    }

    /// Switches to the head of the ready queue, or back to the original
    /// when the queue is empty or a panic waits to be re-raised.
    fn switch_next(&self) {
        let next = if self.panic.borrow().is_some() {
            ORIGINAL
        } else {
            self.ready.borrow_mut().pop_front().unwrap_or(ORIGINAL)
        };

        self.switch(next);
    }

    /// Jumps from the running coroutine into `target`.
    ///
    /// The caller has already moved the running coroutine to its new
    /// state and collection. Returns once some other coroutine switches
    /// back.
    fn switch(&self, target: usize) {
        let current = self.running.get();

        if current == target {
            self.coroutines.borrow_mut()[target].state = State::Running;
            return;
        }

        let context = {
            let mut coroutines = self.coroutines.borrow_mut();

            if self.config.guard_checks {
                coroutines[current].check_guards();
            }

            let record = &mut coroutines[target];
            record.state = State::Running;
            log::trace!("switch slot {current} -> coroutine#{}", record.id);
            record.context
        };

        self.running.set(target);

        let transfer = unsafe { context::jump(context, ptr::without_provenance_mut(current)) };
        self.save_context(transfer);
    }

    /// Stores the context of the coroutine that just jumped here.
    ///
    /// The jump payload is the slot of that coroutine.
    fn save_context(&self, transfer: RawTransfer) {
        let from = transfer.data.addr();

        if let Some(record) = self.coroutines.borrow_mut().get_mut(from) {
            record.context = transfer.context;
        }
    }

    /// First bookkeeping on a fresh coroutine stack.
    ///
    /// Saves the context of the coroutine that switched in, checks the new
    /// stack and hands out the user function.
    pub(crate) fn enter_fresh(&self, transfer: RawTransfer) -> Option<Function> {
        self.save_context(transfer);

        let mut coroutines = self.coroutines.borrow_mut();
        let record = &mut coroutines[self.running.get()];

        if self.config.guard_checks {
            record.check_guards();
        }

        record.function.take()
    }

    pub(crate) fn store_panic(&self, payload: Payload) {
        log::error!("{}: panicked", self.running());

        let mut slot = self.panic.borrow_mut();
        if slot.is_none() {
            *slot = Some(payload);
        }
    }

    pub(crate) fn take_panic(&self) -> Option<Payload> {
        self.panic.borrow_mut().take()
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        let coroutines = self.coroutines.get_mut();

        // Values living on the stacks of abandoned coroutines are leaked;
        // unmapping the stacks is all that is left to do.
        log::debug!(
            "scheduler dropped: {} coroutines, {} suspended",
            coroutines.len() - 1,
            self.suspend.get_mut().len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::builder::SchedulerBuilder;
    use crate::scheduler::context::enter;

    use std::rc::Rc;

    fn core() -> Core {
        let builder = SchedulerBuilder::new().stack_size(64 * 1024).dead_cache(2);
        Core::new(builder.config())
    }

    #[test]
    fn test_original_is_running_at_start() {
        let core = core();

        assert!(!core.in_coroutine());
        assert_eq!(core.state(core.original()), State::Running);
        assert_eq!(core.running(), core.original());
        assert_eq!(core.ready_count(), 0);
    }

    #[test]
    fn test_start_queues_ready() {
        let core = core();

        let coroutine = core.start(Box::new(|| {}), 64 * 1024).expect("start");

        assert_eq!(core.state(coroutine), State::Ready);
        assert_eq!(core.ready_count(), 1);
        assert!(core.stack_size(coroutine) >= 64 * 1024);
    }

    #[test]
    fn test_drive_runs_to_dead() {
        let core = core();
        let hits = Rc::new(Cell::new(0));

        let h = hits.clone();
        let coroutine = core
            .start(Box::new(move || h.set(h.get() + 1)), 64 * 1024)
            .expect("start");

        assert!(enter(&core, || core.drive()));
        assert_eq!(hits.get(), 1);
        assert_eq!(core.state(coroutine), State::Dead);
        assert_eq!(core.dead_count(), 1);
        assert_eq!(core.state(core.original()), State::Running);
    }

    #[test]
    fn test_zero_stack_size_selects_default() {
        let core = core();

        let default = core.start(Box::new(|| {}), 0).expect("start");
        assert!(core.stack_size(default) >= 64 * 1024);

        let tiny = core.start(Box::new(|| {}), 1).expect("start");
        assert!(core.stack_size(tiny) >= MIN_STACK_SIZE);
    }

    #[test]
    fn test_dead_cache_is_trimmed() {
        let core = core();

        for _ in 0..4 {
            core.start(Box::new(|| {}), 64 * 1024).expect("start");
        }
        enter(&core, || core.drive());
        assert_eq!(core.dead_count(), 4);

        core.start(Box::new(|| {}), 64 * 1024).expect("start");
        assert_eq!(core.dead_count(), 2);
    }

    #[test]
    fn test_resume_rejects_running() {
        let core = core();

        let err = core.resume(core.original(), Transfer::Empty).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                state: State::Running,
                ..
            }
        ));
    }

    #[test]
    fn test_suspend_from_host_is_refused() {
        let core = core();

        let err = core.suspend(Transfer::Empty).unwrap_err();
        assert!(matches!(err, Error::NotInCoroutine));
    }
}
