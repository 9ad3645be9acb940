use costack::{Error, Events, Scheduler, Transfer};

use std::cell::RefCell;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_only_ready_socket_wakes_its_waiter() {
    init_logger();
    let scheduler = Scheduler::new();
    let order = Rc::new(RefCell::new(Vec::new()));

    let (a1, b1) = UnixStream::pair().unwrap();
    let (mut a2, b2) = UnixStream::pair().unwrap();

    let o = order.clone();
    scheduler
        .spawn(move || {
            let events = costack::wait(b1.as_raw_fd(), Events::RECV, None).unwrap();
            assert!(events.is_readable());
            assert!(!events.is_writable());
            o.borrow_mut().push("w1");

            a2.write_all(b"y").unwrap();
        })
        .unwrap();

    let o = order.clone();
    scheduler
        .spawn(move || {
            costack::wait(b2.as_raw_fd(), Events::RECV, None).unwrap();
            o.borrow_mut().push("w2");
        })
        .unwrap();

    let o = order.clone();
    scheduler
        .spawn(move || {
            o.borrow_mut().push("x");
            (&a1).write_all(b"x").unwrap();
        })
        .unwrap();

    scheduler.run();

    assert_eq!(*order.borrow(), ["x", "w1", "w2"]);
    assert_eq!(scheduler.suspend_count(), 0);
}

#[test]
fn test_write_interest_fires_immediately() {
    let scheduler = Scheduler::new();
    let (a, _b) = UnixStream::pair().unwrap();

    let events = scheduler
        .block_on(move || costack::wait(a.as_raw_fd(), Events::SEND, None))
        .unwrap()
        .unwrap();

    assert_eq!(events, Events::SEND);
}

#[test]
fn test_peer_hangup_reports_eof() {
    let scheduler = Scheduler::new();
    let (a, b) = UnixStream::pair().unwrap();

    scheduler.spawn(move || drop(b)).unwrap();

    let events = scheduler
        .block_on(move || costack::wait(a.as_raw_fd(), Events::RECV, None))
        .unwrap()
        .unwrap();

    assert!(events.contains(Events::RECV | Events::EOF));
    assert!(!events.is_writable());
}

#[test]
fn test_wait_from_host_is_refused() {
    let scheduler = Scheduler::new();
    let (a, _b) = UnixStream::pair().unwrap();

    let err = scheduler.wait(a.as_raw_fd(), Events::RECV, None).unwrap_err();

    assert!(matches!(err, Error::NotInCoroutine));
}

#[test]
fn test_finite_timeout_is_unsupported() {
    let scheduler = Scheduler::new();
    let (a, _b) = UnixStream::pair().unwrap();

    let result = scheduler
        .block_on(move || {
            costack::wait(a.as_raw_fd(), Events::RECV, Some(Duration::from_secs(1)))
        })
        .unwrap();

    assert!(matches!(result, Err(Error::TimeoutUnsupported)));
    assert_eq!(scheduler.suspend_count(), 0);
}

#[test]
fn test_reader_and_writer_share_a_socket() {
    init_logger();
    let scheduler = Scheduler::new();
    let (a, b) = UnixStream::pair().unwrap();
    let fd = b.as_raw_fd();

    let read = Rc::new(RefCell::new(None));
    let r = read.clone();
    scheduler
        .spawn(move || {
            let events = costack::wait(fd, Events::RECV, None).unwrap();
            *r.borrow_mut() = Some(events);
            drop(b);
        })
        .unwrap();

    let (refused, written) = scheduler
        .block_on(move || {
            let refused = costack::wait(fd, Events::RECV, None).unwrap_err();
            let events = costack::wait(fd, Events::SEND, None).unwrap();
            (&a).write_all(b"r").unwrap();
            (refused, events)
        })
        .unwrap();

    assert!(matches!(refused, Error::AlreadyRegistered(f) if f == fd));
    assert!(written.is_writable());
    assert!(!written.is_readable());

    scheduler.run();

    let read = read.borrow().expect("reader never woke");
    assert!(read.is_readable());
    assert!(!read.is_writable());
    assert_eq!(scheduler.suspend_count(), 0);
}

#[test]
fn test_cancel_releases_the_socket() {
    init_logger();
    let scheduler = Scheduler::new();
    let (_a, b) = UnixStream::pair().unwrap();
    let fd = b.as_raw_fd();

    let first = Rc::new(RefCell::new(None));
    let f = first.clone();
    scheduler
        .spawn(move || {
            let events = costack::wait(fd, Events::RECV, None).unwrap();
            *f.borrow_mut() = Some(events);
        })
        .unwrap();

    let (cancelled, again) = scheduler
        .block_on(move || {
            let cancelled = costack::cancel(fd).unwrap();
            let again = costack::cancel(fd).unwrap();
            (cancelled, again)
        })
        .unwrap();

    assert!(cancelled);
    assert!(!again);
    assert_eq!(*first.borrow(), Some(Events::NONE));
    drop(b);
}

#[test]
fn test_complementary_readiness_wakes_one_end() {
    init_logger();
    let scheduler = Rc::new(Scheduler::new());
    let order = Rc::new(RefCell::new(Vec::new()));
    let (a, b) = UnixStream::pair().unwrap();
    let (a, b) = (Rc::new(a), Rc::new(b));

    let o = order.clone();
    let end = a.clone();
    let left = scheduler
        .spawn(move || {
            let events = costack::wait(end.as_raw_fd(), Events::RECV, None).unwrap();
            assert!(events.is_readable());
            assert!(!events.is_writable());
            o.borrow_mut().push("left");
        })
        .unwrap();

    let o = order.clone();
    let end = b.clone();
    let s = scheduler.clone();
    scheduler
        .spawn(move || {
            costack::wait(end.as_raw_fd(), Events::RECV, None).unwrap();
            o.borrow_mut().push("right");

            // Only this end became readable.
            assert!(s.is_suspend(left));
            assert_eq!(s.suspend_count(), 1);

            (&*end).write_all(b"b").unwrap();
        })
        .unwrap();

    let o = order.clone();
    let end = a.clone();
    scheduler
        .spawn(move || {
            let events = costack::wait(end.as_raw_fd(), Events::SEND, None).unwrap();
            assert!(events.is_writable());
            assert!(!events.is_readable());
            o.borrow_mut().push("writer");

            (&*end).write_all(b"a").unwrap();
        })
        .unwrap();

    scheduler.run();

    assert_eq!(*order.borrow(), ["writer", "right", "left"]);
    assert_eq!(scheduler.suspend_count(), 0);
}

#[test]
fn test_manual_resume_releases_registration() {
    let scheduler = Scheduler::new();
    let (a, b) = UnixStream::pair().unwrap();
    let fd = b.as_raw_fd();

    let results = Rc::new(RefCell::new(Vec::new()));
    let r = results.clone();
    let waiter = scheduler
        .spawn(move || {
            for _ in 0..2 {
                let events = costack::wait(fd, Events::RECV, None).unwrap();
                r.borrow_mut().push(events);
            }
            drop(b);
        })
        .unwrap();

    scheduler
        .spawn(move || {
            costack::resume(waiter, Transfer::Empty).unwrap();
            assert!(costack::yield_now());
            (&a).write_all(b"z").unwrap();
        })
        .unwrap();

    scheduler.run();

    let results = results.borrow();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0], Events::NONE);
    assert!(results[1].is_readable());
}

#[test]
fn test_manual_transfers_release_registration() {
    let scheduler = Scheduler::new();
    let (a, b) = UnixStream::pair().unwrap();
    let fd = b.as_raw_fd();

    let results = Rc::new(RefCell::new(Vec::new()));
    let r = results.clone();
    let waiter = scheduler
        .spawn(move || {
            for _ in 0..3 {
                let events = costack::wait(fd, Events::RECV, None).unwrap();
                r.borrow_mut().push(events);
            }
            drop(b);
        })
        .unwrap();

    scheduler
        .spawn(move || {
            // Values are dropped, manual events are handed through.
            costack::resume(waiter, Transfer::value(5u32)).unwrap();
            assert!(costack::yield_now());
            costack::resume(waiter, Transfer::Events(Events::SEND)).unwrap();
            assert!(costack::yield_now());
            (&a).write_all(b"v").unwrap();
        })
        .unwrap();

    scheduler.run();

    let results = results.borrow();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0], Events::NONE);
    assert_eq!(results[1], Events::SEND);
    assert!(results[2].is_readable());
    assert_eq!(scheduler.suspend_count(), 0);
}

#[test]
fn test_loop_restarts_after_exit() {
    let scheduler = Scheduler::new();

    for _ in 0..2 {
        let (a, b) = UnixStream::pair().unwrap();

        scheduler
            .spawn(move || {
                (&a).write_all(b"!").unwrap();
            })
            .unwrap();

        let events = scheduler
            .block_on(move || costack::wait(b.as_raw_fd(), Events::RECV, None))
            .unwrap()
            .unwrap();

        assert!(events.is_readable());
        assert_eq!(scheduler.ready_count(), 0);
    }
}

#[test]
fn test_remote_stop_unblocks_wait() {
    init_logger();
    let scheduler = Scheduler::new();
    let handle = scheduler.stop_handle();
    let (_a, b) = UnixStream::pair().unwrap();

    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        handle.stop();
    });

    let result = scheduler
        .block_on(move || costack::wait(b.as_raw_fd(), Events::RECV, None))
        .unwrap();

    stopper.join().unwrap();

    assert!(matches!(result, Err(Error::Stopped)));
    assert!(scheduler.is_stopped());
    assert_eq!(scheduler.suspend_count(), 0);
}
