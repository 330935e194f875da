//! End-to-end scenarios over a real `TcpServer` on an ephemeral loopback
//! port, driven by real `std::net::TcpStream` clients rather than a
//! mocked poller. EMFILE recovery is covered separately by a unit test in
//! `src/net/acceptor.rs`; see DESIGN.md for the full test plan.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reactor_core::net::{Address, TcpServer, TcpServerConfig};
use reactor_core::reactor::{Reactor, ReactorHandle};

fn loopback() -> Address {
    Address::new(Ipv4Addr::new(127, 0, 0, 1), 0)
}

fn connect(server: &TcpServer) -> TcpStream {
    let addr = server.local_addr();
    TcpStream::connect((addr.ip_string().as_str(), addr.port())).expect("client connect")
}

/// Client sends "hello\n", the message callback echoes it back verbatim,
/// the client reads it back, then closes; the server observes a close
/// callback for that connection.
#[test]
fn echoes_bytes_back_and_notifies_close() {
    let server = TcpServer::new(TcpServerConfig::new(loopback()).worker_count(4)).unwrap();

    server.set_message_callback(|reactor, conn, _recv_time| {
        let bytes = conn.in_buf().read_all();
        conn.send(reactor, &bytes);
    });

    let closed = Arc::new(AtomicBool::new(false));
    let closed_cb = Arc::clone(&closed);
    server.set_connect_callback(move |_reactor, _conn, connected| {
        if !connected {
            closed_cb.store(true, Ordering::SeqCst);
        }
    });

    server.run().unwrap();

    let mut client = connect(&server);
    client.write_all(b"hello\n").unwrap();

    let mut buf = [0u8; 16];
    let n = client.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"hello\n");

    drop(client);

    let deadline = Instant::now() + Duration::from_secs(2);
    while !closed.load(Ordering::SeqCst) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(closed.load(Ordering::SeqCst), "close callback never fired");

    server.shutdown();
}

/// A slow client reader forces the server's output buffer past a small
/// high-water mark while sending a payload much larger than one socket
/// buffer; the callback fires at least once with `queued >=
/// high_water_mark`, and a write-complete callback eventually fires once
/// the client drains.
#[test]
fn high_water_mark_fires_before_drain_completes() {
    const HIGH_WATER_MARK: usize = 256 * 1024;
    const PAYLOAD: usize = 4 * 1024 * 1024;

    let server = TcpServer::new(
        TcpServerConfig::new(loopback())
            .worker_count(1)
            .high_water_mark(HIGH_WATER_MARK),
    )
    .unwrap();

    let hwm_hits = Arc::new(AtomicUsize::new(0));
    let hwm_min_queued = Arc::new(Mutex::new(usize::MAX));
    let write_complete = Arc::new(AtomicBool::new(false));

    {
        let hwm_hits = Arc::clone(&hwm_hits);
        let hwm_min_queued = Arc::clone(&hwm_min_queued);
        server.set_connect_callback(move |reactor, conn, connected| {
            if connected {
                let hwm_hits = Arc::clone(&hwm_hits);
                let hwm_min_queued = Arc::clone(&hwm_min_queued);
                conn.set_high_water_mark_callback(Box::new(move |_reactor, _conn, queued| {
                    hwm_hits.fetch_add(1, Ordering::SeqCst);
                    let mut min = hwm_min_queued.lock().unwrap();
                    *min = (*min).min(queued);
                }));
                conn.send(reactor, &vec![0x42u8; PAYLOAD]);
            }
        });
        server.set_write_complete_callback({
            let write_complete = Arc::clone(&write_complete);
            move |_reactor, _conn| {
                write_complete.store(true, Ordering::SeqCst);
            }
        });
    }

    server.run().unwrap();

    let mut client = connect(&server);
    // Don't read yet: let the server's send() queue up past the
    // high-water mark while the client's receive buffer fills.
    std::thread::sleep(Duration::from_millis(200));

    let mut received = 0usize;
    let mut buf = [0u8; 65536];
    let deadline = Instant::now() + Duration::from_secs(10);
    while received < PAYLOAD && Instant::now() < deadline {
        match client.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => received += n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) => panic!("client read error: {e}"),
        }
    }
    assert_eq!(received, PAYLOAD, "client did not receive the full payload");

    assert!(hwm_hits.load(Ordering::SeqCst) >= 1, "high-water-mark callback never fired");
    assert!(
        *hwm_min_queued.lock().unwrap() >= HIGH_WATER_MARK,
        "high-water-mark callback fired below the configured threshold"
    );

    let deadline = Instant::now() + Duration::from_secs(2);
    while !write_complete.load(Ordering::SeqCst) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(write_complete.load(Ordering::SeqCst), "write-complete callback never fired");

    server.shutdown();
}

/// A repeat timer with a 100ms interval is cancelled after roughly 3.5
/// intervals; expect 3 firings and no more, with a margin for scheduling
/// jitter on a loaded CI box.
#[test]
fn cancelling_a_repeat_timer_stops_further_firings() {
    let (reactor, handle): (Reactor, ReactorHandle) =
        Reactor::new(reactor_core::poller::Backend::Epoll).unwrap();

    let fire_count = Arc::new(AtomicUsize::new(0));
    let fire_count_cb = Arc::clone(&fire_count);

    let interval = Duration::from_millis(100);
    let timer_id = handle.add_timer_every(interval, interval, move |_t| {
        fire_count_cb.fetch_add(1, Ordering::SeqCst);
    });

    let handle_for_thread = handle.clone();
    let join = std::thread::spawn(move || {
        let mut reactor = reactor;
        let _ = reactor.run_loop();
    });

    std::thread::sleep(Duration::from_millis(350));
    handle_for_thread.cancel_timer(timer_id);
    std::thread::sleep(Duration::from_millis(300));
    handle_for_thread.quit();
    join.join().unwrap();

    let fires = fire_count.load(Ordering::SeqCst);
    assert!((2..=4).contains(&fires), "expected roughly 3 firings, got {fires}");
}

/// Posting a task from an arbitrary thread to a Reactor blocked in
/// `poll(-1)` (no I/O, no timers pending) must execute within a small
/// bound, and two tasks posted from the same thread must run in post
/// order.
#[test]
fn cross_thread_post_preserves_order_and_wakes_promptly() {
    let (reactor, handle) = Reactor::new(reactor_core::poller::Backend::Epoll).unwrap();

    let order = Arc::new(Mutex::new(Vec::<u32>::new()));
    let order_a = Arc::clone(&order);
    let order_b = Arc::clone(&order);

    let join = std::thread::spawn(move || {
        let mut reactor = reactor;
        let _ = reactor.run_loop();
    });

    let started = Instant::now();
    handle.run_task(move |_r| order_a.lock().unwrap().push(1));
    handle.run_task(move |_r| order_b.lock().unwrap().push(2));

    let deadline = Instant::now() + Duration::from_millis(200);
    while order.lock().unwrap().len() < 2 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(2));
    }
    assert!(started.elapsed() < Duration::from_millis(200), "wakeup took too long");
    assert_eq!(*order.lock().unwrap(), vec![1, 2]);

    handle.quit();
    join.join().unwrap();
}
