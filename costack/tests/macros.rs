use costack::{Events, SchedulerBuilder};

use std::cell::Cell;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;

#[costack::test]
fn test_body_runs_inside_a_coroutine() {
    let hits = Rc::new(Cell::new(0));

    let h = hits.clone();
    costack::spawn(move || h.set(h.get() + 1)).unwrap();

    assert!(costack::yield_now());
    assert_eq!(hits.get(), 1);
    assert!(!costack::yield_now());
}

#[costack::test(stack_size = 32 * 1024, dead_cache = 4)]
fn test_options_configure_the_scheduler() {
    let worker = costack::spawn(|| {}).unwrap();
    assert_ne!(worker, costack::running());

    // Extra coroutines wait on readiness like in any other scheduler.
    let (a, b) = UnixStream::pair().unwrap();
    costack::spawn(move || (&a).write_all(b"m").unwrap()).unwrap();

    let events = costack::wait(b.as_raw_fd(), Events::RECV, None).unwrap();
    assert!(events.is_readable());
}

#[costack::test]
fn test_result_return_is_forwarded() -> std::io::Result<()> {
    let (a, b) = UnixStream::pair()?;
    (&a).write_all(b"r")?;

    costack::wait(b.as_raw_fd(), Events::RECV, None)?;
    Ok(())
}

#[test]
fn test_builder_uses_default_stack_size() {
    let scheduler = SchedulerBuilder::new().build();
    let worker = scheduler.spawn(|| {}).unwrap();

    assert!(scheduler.stack_size(worker) >= costack::DEFAULT_STACK_SIZE);
    scheduler.run();
}
