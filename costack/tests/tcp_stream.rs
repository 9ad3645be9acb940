use costack::Scheduler;
use costack::net::{TcpListener, TcpStream};

use std::cell::RefCell;
use std::io::{Read, Write};
use std::net::Shutdown;
use std::rc::Rc;
use std::thread;

#[costack::test]
fn test_tcp_echo_between_coroutines() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get local address");

    costack::spawn(move || {
        let (mut stream, _) = listener.accept().expect("Failed to accept connection");
        let mut buffer = [0; 5];
        stream
            .read_exact(&mut buffer)
            .expect("Failed to read from stream");
        stream.write_all(&buffer).expect("Failed to write to stream");
    })
    .expect("Failed to spawn server");

    let mut stream = TcpStream::connect(addr).expect("Failed to connect to listener");
    assert_eq!(stream.peer_addr().unwrap(), addr);

    stream.write_all(b"hello").expect("Failed to write to stream");

    let mut buffer = [0; 5];
    stream
        .read_exact(&mut buffer)
        .expect("Failed to read from stream");
    assert_eq!(&buffer, b"hello");
}

#[test]
fn test_many_clients_are_served_concurrently() {
    let scheduler = Scheduler::new();
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get local address");
    let served = Rc::new(RefCell::new(0));
    let replies = Rc::new(RefCell::new(0));

    let count = served.clone();
    scheduler
        .spawn(move || {
            for _ in 0..3 {
                let (mut stream, _) = listener.accept().expect("Failed to accept connection");
                let count = count.clone();

                costack::spawn(move || {
                    let mut buffer = [0; 4];
                    stream
                        .read_exact(&mut buffer)
                        .expect("Failed to read from stream");
                    assert_eq!(&buffer, b"ping");
                    stream.write_all(b"pong").expect("Failed to write to stream");
                    *count.borrow_mut() += 1;
                })
                .expect("Failed to spawn handler");
            }
        })
        .expect("Failed to spawn acceptor");

    for _ in 0..3 {
        let replies = replies.clone();

        scheduler
            .spawn(move || {
                let mut stream = TcpStream::connect(addr).expect("Failed to connect");
                stream.write_all(b"ping").expect("Failed to write to stream");

                let mut buffer = [0; 4];
                stream
                    .read_exact(&mut buffer)
                    .expect("Failed to read from stream");
                assert_eq!(&buffer, b"pong");
                *replies.borrow_mut() += 1;
            })
            .expect("Failed to spawn client");
    }

    scheduler.run();

    assert_eq!(*served.borrow(), 3);
    assert_eq!(*replies.borrow(), 3);
    assert_eq!(scheduler.suspend_count(), 0);
}

#[costack::test]
fn test_read_returns_zero_after_shutdown() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get local address");

    costack::spawn(move || {
        let (stream, _) = listener.accept().expect("Failed to accept connection");
        stream
            .shutdown(Shutdown::Write)
            .expect("Failed to shut down stream");
    })
    .expect("Failed to spawn server");

    let mut stream = TcpStream::connect(addr).expect("Failed to connect to listener");
    let mut buffer = Vec::new();
    let n = stream
        .read_to_end(&mut buffer)
        .expect("Failed to read from stream");

    assert_eq!(n, 0);
}

#[test]
fn test_blocking_outside_coroutine() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get local address");

    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("Failed to accept connection");
        let mut buffer = [0; 4];
        stream
            .read_exact(&mut buffer)
            .expect("Failed to read from stream");
        buffer
    });

    let mut stream = TcpStream::connect(addr).expect("Failed to connect to listener");
    stream.write_all(b"ping").expect("Failed to write to stream");

    assert_eq!(&handle.join().expect("Thread panicked"), b"ping");
}
