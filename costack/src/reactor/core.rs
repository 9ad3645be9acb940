use super::event::{Event, Events};
use super::poller::Poller;
use crate::coroutine::{Coroutine, State, Transfer};
use crate::error::{Error, Result};
use crate::scheduler::context::with_current;
use crate::scheduler::core::Core;

use std::collections::HashMap;
use std::io;
use std::mem;
use std::os::fd::RawFd;
use std::time::Duration;

/// Coroutines parked on one socket, at most one per direction.
#[derive(Default)]
struct Waiters {
    recv: Option<Coroutine>,
    send: Option<Coroutine>,
}

impl Waiters {
    /// Directions somebody waits for.
    fn interest(&self) -> Events {
        let mut interest = Events::NONE;

        if self.recv.is_some() {
            interest |= Events::RECV;
        }
        if self.send.is_some() {
            interest |= Events::SEND;
        }

        interest
    }

    /// Clears every slot held by `coroutine`.
    fn release(&mut self, coroutine: Coroutine) -> bool {
        let mut released = false;

        for slot in [&mut self.recv, &mut self.send] {
            if *slot == Some(coroutine) {
                *slot = None;
                released = true;
            }
        }

        released
    }

    /// Takes the waiters that `ready` wakes, each with its share of the
    /// readiness.
    ///
    /// The reader is handed everything but `SEND` and the writer everything
    /// but `RECV`; a coroutine holding both slots gets both shares.
    fn take_ready(&mut self, ready: Events) -> Vec<(Coroutine, Events)> {
        let mut woken: Vec<(Coroutine, Events)> = Vec::with_capacity(2);

        for (waiter, direction) in [(self.recv, Events::RECV), (self.send, Events::SEND)] {
            let Some(coroutine) = waiter else {
                continue;
            };

            let delivered = ready & (direction | Events::EOF | Events::ERROR);
            if delivered.is_empty() {
                continue;
            }

            match woken.iter_mut().find(|(other, _)| *other == coroutine) {
                Some((_, events)) => *events |= delivered,
                None => woken.push((coroutine, delivered)),
            }
        }

        for (coroutine, _) in &woken {
            self.release(*coroutine);
        }

        woken
    }

    fn into_coroutines(self) -> Vec<Coroutine> {
        match (self.recv, self.send) {
            (Some(reader), Some(writer)) if reader == writer => vec![reader],
            (reader, writer) => reader.into_iter().chain(writer).collect(),
        }
    }
}

/// The I/O scheduler.
///
/// It owns the poller and the table of pending waits, and is driven by a
/// dedicated loop coroutine started through the ordinary scheduler. The
/// loop lets every ready coroutine run, then blocks in the poller and
/// resumes the coroutines whose sockets became ready.
///
/// A socket carries at most one reader and one writer. The poller watches
/// the union of their directions. Registrations are one-shot: a waiter's
/// direction is dropped from the poller as soon as it is resumed, whatever
/// resumed it, and the socket leaves the poller with its last waiter.
pub(crate) struct IoScheduler {
    poller: Poller,

    /// Reusable readiness buffer, taken out while events are dispatched.
    events: Vec<Event>,

    /// Pending waits, keyed by socket. Entries are never empty.
    waiters: HashMap<RawFd, Waiters>,

    /// Handle of the loop coroutine, `None` until it is first started.
    task: Option<Coroutine>,
}

impl IoScheduler {
    fn new() -> io::Result<Self> {
        Ok(Self {
            poller: Poller::new()?,
            events: Vec::with_capacity(64),
            waiters: HashMap::new(),
            task: None,
        })
    }

    /// Number of sockets currently waited on.
    pub(crate) fn registrations(&self) -> usize {
        self.waiters.len()
    }

    fn register(&mut self, fd: RawFd, coroutine: Coroutine, interest: Events) -> Result<()> {
        let interest = interest & Events::ALL;
        if interest.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "a wait needs a direction to wait for",
            )
            .into());
        }

        let before = self.waiters.get(&fd).map_or(Events::NONE, Waiters::interest);
        if before.intersects(interest) {
            return Err(Error::AlreadyRegistered(fd));
        }

        let result = if before.is_empty() {
            self.poller.register(fd, interest)
        } else {
            self.poller.modify(fd, before | interest)
        };

        match result {
            Ok(()) => {}
            Err(err) if err.raw_os_error() == Some(libc::EEXIST) => {
                return Err(Error::AlreadyRegistered(fd));
            }
            Err(err) => return Err(err.into()),
        }

        let waiters = self.waiters.entry(fd).or_default();
        if interest.is_readable() {
            waiters.recv = Some(coroutine);
        }
        if interest.is_writable() {
            waiters.send = Some(coroutine);
        }
        log::debug!("socket {fd}: {coroutine} waits for {interest:?}");

        Ok(())
    }

    /// Drops the waits of `coroutine` on `fd`.
    fn release(&mut self, fd: RawFd, coroutine: Coroutine) -> bool {
        let released = self
            .waiters
            .get_mut(&fd)
            .is_some_and(|waiters| waiters.release(coroutine));

        if released {
            self.sync(fd);
        }

        released
    }

    /// Takes the waiters of `fd` woken by `ready`.
    fn take_ready(&mut self, fd: RawFd, ready: Events) -> Vec<(Coroutine, Events)> {
        let woken = match self.waiters.get_mut(&fd) {
            Some(waiters) => waiters.take_ready(ready),
            None => return Vec::new(),
        };

        if !woken.is_empty() {
            self.sync(fd);
        }

        woken
    }

    /// Points the poller at the directions still waited for on `fd`.
    fn sync(&mut self, fd: RawFd) {
        let Some(interest) = self.waiters.get(&fd).map(Waiters::interest) else {
            return;
        };

        let result = if interest.is_empty() {
            self.waiters.remove(&fd);
            self.poller.deregister(fd)
        } else {
            self.poller.modify(fd, interest)
        };

        // The socket may already be closed, in which case the kernel
        // dropped it from the poller by itself.
        if let Err(err) = result {
            log::debug!("socket {fd}: poller update failed: {err}");
        }
    }

    /// Drops every wait on `fd`.
    fn deregister(&mut self, fd: RawFd) -> Vec<Coroutine> {
        let Some(waiters) = self.waiters.remove(&fd) else {
            return Vec::new();
        };

        if let Err(err) = self.poller.deregister(fd) {
            log::debug!("socket {fd}: deregister failed: {err}");
        }

        waiters.into_coroutines()
    }

    fn drain(&mut self) -> Vec<Coroutine> {
        let fds: Vec<RawFd> = self.waiters.keys().copied().collect();

        fds.into_iter()
            .flat_map(|fd| self.deregister(fd))
            .collect()
    }
}

/// Creates the I/O scheduler on first use and makes sure its loop
/// coroutine is alive.
///
/// A loop that exited earlier is started again over the same poller.
fn ensure(core: &Core) -> Result<()> {
    let task = {
        let mut io = core.io.borrow_mut();

        if io.is_none() {
            let scheduler = IoScheduler::new()?;
            core.shared.set_waker(scheduler.poller.waker());
            log::debug!("io scheduler created");
            *io = Some(scheduler);
        }

        io.as_ref().and_then(|io| io.task)
    };

    if task.is_some_and(|task| core.state(task) != State::Dead) {
        return Ok(());
    }

    let task = core.start(Box::new(io_loop), core.config.stack_size)?;
    if let Some(io) = core.io.borrow_mut().as_mut() {
        io.task = Some(task);
    }
    log::debug!("{task}: io loop started");

    Ok(())
}

/// Body of the loop coroutine.
fn io_loop() {
    with_current(|core| {
        while !core.is_stopped() {
            while core.yield_now() {}

            if core.is_stopped() {
                break;
            }

            let mut events = {
                let mut io = core.io.borrow_mut();
                let Some(io) = io.as_mut() else {
                    break;
                };

                // Nothing could ever wake a blocked poll.
                if io.registrations() == 0 {
                    log::debug!("io loop: no registrations left");
                    break;
                }

                let mut events = mem::take(&mut io.events);
                if let Err(err) = io.poller.poll(&mut events, None) {
                    log::error!("io loop: poll failed: {err}");
                    io.events = events;
                    break;
                }

                events
            };

            for event in &events {
                on_event(core, event.fd, event.events);
            }

            events.clear();
            if let Some(io) = core.io.borrow_mut().as_mut() {
                io.events = events;
            }
        }

        flush(core);
        log::debug!("io loop ended");
    });
}

/// Hands readiness on `fd` to its waiters.
///
/// Each waiter gets its own direction plus `EOF`/`ERROR`. A waiter whose
/// share is empty keeps its registration.
fn on_event(core: &Core, fd: RawFd, ready: Events) {
    let woken = match core.io.borrow_mut().as_mut() {
        Some(io) => io.take_ready(fd, ready),
        None => return,
    };

    for (coroutine, events) in woken {
        log::trace!("socket {fd}: {events:?} for {coroutine}");

        if let Err(err) = core.resume(coroutine, Transfer::Events(events)) {
            log::debug!("socket {fd}: waiter not resumed: {err}");
        }
    }
}

/// Releases every pending waiter when the loop ends.
fn flush(core: &Core) {
    let waiters = match core.io.borrow_mut().as_mut() {
        Some(io) => io.drain(),
        None => Vec::new(),
    };

    for coroutine in waiters {
        let _ = core.resume(coroutine, Transfer::Empty);
    }
}

/// Removes the registrations `coroutine` still holds on `fd`.
fn unregister(core: &Core, fd: RawFd, coroutine: Coroutine) {
    if let Some(io) = core.io.borrow_mut().as_mut() {
        io.release(fd, coroutine);
    }
}

/// Suspends the running coroutine until `fd` is ready for `interest`.
pub(crate) fn wait(
    core: &Core,
    fd: RawFd,
    interest: Events,
    timeout: Option<Duration>,
) -> Result<Events> {
    if core.is_stopped() {
        return Err(Error::Stopped);
    }

    if !core.in_coroutine() {
        return Err(Error::NotInCoroutine);
    }

    if timeout.is_some() {
        return Err(Error::TimeoutUnsupported);
    }

    ensure(core)?;

    let coroutine = core.running();
    match core.io.borrow_mut().as_mut() {
        Some(io) => io.register(fd, coroutine, interest)?,
        None => return Err(Error::Stopped),
    }

    let transfer = core.suspend(Transfer::Empty);

    // One-shot, whatever resumed us.
    unregister(core, fd, coroutine);

    match transfer? {
        Transfer::Events(events) => Ok(events),
        _ if core.is_stopped() => Err(Error::Stopped),
        // A value handed over by a manual resume is discarded.
        _ => Ok(Events::NONE),
    }
}

/// Drops the waits pending on `fd` and resumes their waiters with no
/// events.
///
/// Returns `false` when nobody was waiting on `fd`.
pub(crate) fn cancel(core: &Core, fd: RawFd) -> Result<bool> {
    let waiters = match core.io.borrow_mut().as_mut() {
        Some(io) => io.deregister(fd),
        None => Vec::new(),
    };

    if waiters.is_empty() {
        return Ok(false);
    }

    let mut result = Ok(true);
    for coroutine in waiters {
        log::debug!("socket {fd}: wait of {coroutine} cancelled");

        if let Err(err) = core.resume(coroutine, Transfer::Empty) {
            result = Err(err);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    const FIRST: Coroutine = Coroutine { slot: 1, id: 1 };
    const SECOND: Coroutine = Coroutine { slot: 2, id: 2 };

    #[test]
    fn test_one_waiter_per_direction() {
        let mut io = IoScheduler::new().expect("io scheduler");
        let (_left, right) = UnixStream::pair().expect("socket pair");
        let fd = right.as_raw_fd();

        io.register(fd, FIRST, Events::RECV).expect("register reader");
        io.register(fd, SECOND, Events::SEND).expect("register writer");
        assert_eq!(io.registrations(), 1);
        assert_eq!(io.waiters[&fd].interest(), Events::ALL);

        let err = io.register(fd, SECOND, Events::RECV).unwrap_err();
        assert!(matches!(err, Error::AlreadyRegistered(f) if f == fd));
        let err = io.register(fd, FIRST, Events::ALL).unwrap_err();
        assert!(matches!(err, Error::AlreadyRegistered(f) if f == fd));

        // Releasing the reader leaves the writer registered.
        assert!(io.release(fd, FIRST));
        assert!(!io.release(fd, FIRST));
        assert_eq!(io.waiters[&fd].interest(), Events::SEND);

        assert_eq!(io.deregister(fd), vec![SECOND]);
        assert_eq!(io.registrations(), 0);
    }

    #[test]
    fn test_wait_without_direction_is_refused() {
        let mut io = IoScheduler::new().expect("io scheduler");
        let (_left, right) = UnixStream::pair().expect("socket pair");

        let err = io.register(right.as_raw_fd(), FIRST, Events::EOF).unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::InvalidInput));
        assert_eq!(io.registrations(), 0);
    }

    #[test]
    fn test_readiness_is_split_by_direction() {
        let mut io = IoScheduler::new().expect("io scheduler");
        let (_left, right) = UnixStream::pair().expect("socket pair");
        let fd = right.as_raw_fd();

        io.register(fd, FIRST, Events::RECV).expect("register reader");
        io.register(fd, SECOND, Events::SEND).expect("register writer");

        // Writability alone wakes the writer only.
        assert_eq!(io.take_ready(fd, Events::SEND), vec![(SECOND, Events::SEND)]);
        assert_eq!(io.waiters[&fd].interest(), Events::RECV);

        io.register(fd, SECOND, Events::SEND).expect("register writer");

        // A hangup wakes both, each with its own direction.
        let woken = io.take_ready(fd, Events::ALL | Events::EOF);
        assert_eq!(
            woken,
            vec![
                (FIRST, Events::RECV | Events::EOF),
                (SECOND, Events::SEND | Events::EOF),
            ]
        );
        assert_eq!(io.registrations(), 0);
    }

    #[test]
    fn test_single_waiter_on_both_directions() {
        let mut io = IoScheduler::new().expect("io scheduler");
        let (_left, right) = UnixStream::pair().expect("socket pair");
        let fd = right.as_raw_fd();

        io.register(fd, FIRST, Events::ALL).expect("register");

        let woken = io.take_ready(fd, Events::ALL | Events::ERROR);
        assert_eq!(woken, vec![(FIRST, Events::ALL | Events::ERROR)]);
        assert_eq!(io.registrations(), 0);

        // Waking one direction releases the other too.
        io.register(fd, FIRST, Events::ALL).expect("register");
        assert_eq!(io.take_ready(fd, Events::RECV), vec![(FIRST, Events::RECV)]);
        assert_eq!(io.registrations(), 0);
    }

    #[test]
    fn test_drain_releases_everything() {
        let mut io = IoScheduler::new().expect("io scheduler");
        let (a, b) = UnixStream::pair().expect("socket pair");

        io.register(a.as_raw_fd(), FIRST, Events::RECV)
            .expect("register");
        io.register(a.as_raw_fd(), SECOND, Events::SEND)
            .expect("register");
        io.register(b.as_raw_fd(), SECOND, Events::ALL)
            .expect("register");

        assert_eq!(io.drain().len(), 3);
        assert_eq!(io.registrations(), 0);
    }
}
