//! Composition root: one acceptor Reactor, a pool of worker Reactors, and
//! the connection table that ties an accepted socket to the worker that
//! owns it.
//!
//! The connection table lives on the acceptor Reactor's thread (as a
//! `ServerState` installed via `Reactor::set_user_data`), the same way
//! `ConnectionRegistry` lives on each worker's thread — so its mutation
//! never needs a lock, only the discipline of staying on one thread.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::poller::Backend;
use crate::reactor::{Reactor, ReactorHandle, ReactorPool, ReactorThread, WorkerInit};

use super::acceptor::Acceptor;
use super::address::Address;
use super::connection::{self, ConnState, Connection, ConnectionId, DEFAULT_HIGH_WATER_MARK};
use super::socket::Socket;

pub type ServerConnectCallback = Arc<dyn Fn(&mut Reactor, &mut Connection, bool) + Send + Sync>;
pub type ServerMessageCallback = Arc<dyn Fn(&mut Reactor, &mut Connection, Instant) + Send + Sync>;
pub type ServerWriteCompleteCallback = Arc<dyn Fn(&mut Reactor, &mut Connection) + Send + Sync>;

/// Constructor parameters for a [`TcpServer`]: listen address, worker
/// thread count, optional per-worker init hook, `SO_REUSEPORT`, the
/// multiplexer backend, and the default high-water mark, each of which
/// is per-server configuration rather than a global constant. Builder-
/// style setters, matching a preference for plain constructor arguments
/// over an external config format.
pub struct TcpServerConfig {
    pub addr: Address,
    pub worker_count: usize,
    pub reuse_port: bool,
    pub backend: Backend,
    pub high_water_mark: usize,
    pub worker_init: Option<WorkerInit>,
}

impl TcpServerConfig {
    pub fn new(addr: Address) -> TcpServerConfig {
        TcpServerConfig {
            addr,
            worker_count: 0,
            reuse_port: false,
            backend: Backend::Epoll,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            worker_init: None,
        }
    }

    pub fn worker_count(mut self, n: usize) -> Self {
        self.worker_count = n;
        self
    }

    pub fn reuse_port(mut self, on: bool) -> Self {
        self.reuse_port = on;
        self
    }

    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn high_water_mark(mut self, n: usize) -> Self {
        self.high_water_mark = n;
        self
    }

    pub fn worker_init(mut self, init: WorkerInit) -> Self {
        self.worker_init = Some(init);
        self
    }
}

/// Lives on the acceptor Reactor's thread only, installed there the
/// moment `run()`'s setup task executes. Tracks every live connection by
/// name so `shutdown()` can close them all, and holds the shared pool
/// handle `on_new_connection` uses to pick the next worker.
struct ServerState {
    threads: Arc<Mutex<Option<ServerThreads>>>,
    connections: HashMap<String, (ReactorHandle, ConnectionId)>,
    connect_cb: Option<ServerConnectCallback>,
    message_cb: Option<ServerMessageCallback>,
    write_complete_cb: Option<ServerWriteCompleteCallback>,
    high_water_mark: usize,
}

/// The acceptor's own `ReactorThread` plus the worker pool, held together
/// behind one lock so `shutdown()` can tear both down exactly once.
struct ServerThreads {
    acceptor_thread: ReactorThread,
    pool: ReactorPool,
}

/// Composition of a `ReactorPool`, an `Acceptor` bound to its acceptor
/// Reactor, and the connection table tying accepted sockets to the worker
/// that owns each one. `run()` is idempotent and wires the acceptor's
/// new-connection callback; `shutdown()` is idempotent and drains every
/// live connection before stopping every Reactor thread.
pub struct TcpServer {
    config: TcpServerConfig,
    acceptor_handle: ReactorHandle,
    threads: Arc<Mutex<Option<ServerThreads>>>,
    started: AtomicBool,
    shutting_down: AtomicBool,
    connect_cb: Mutex<Option<ServerConnectCallback>>,
    message_cb: Mutex<Option<ServerMessageCallback>>,
    write_complete_cb: Mutex<Option<ServerWriteCompleteCallback>>,
    /// The address actually bound by `run()`, which may differ from
    /// `config.addr` when the caller asked for an ephemeral port
    /// (`:0`). `None` before `run()` succeeds.
    bound_addr: Mutex<Option<Address>>,
}

impl TcpServer {
    /// Spawns the acceptor Reactor and the worker pool, but binds no
    /// socket yet — binding happens in `run()`, so a bad address surfaces
    /// from `run()` rather than from construction. A bind or listen
    /// failure is fatal to the server but never takes down the process.
    pub fn new(config: TcpServerConfig) -> io::Result<TcpServer> {
        let acceptor_thread = ReactorThread::spawn(config.backend, "reactor-acceptor", None)?;
        let acceptor_handle = acceptor_thread.handle();
        let pool = ReactorPool::new(
            acceptor_handle.clone(),
            config.backend,
            config.worker_count,
            config.worker_init.clone(),
        )?;

        Ok(TcpServer {
            config,
            acceptor_handle,
            threads: Arc::new(Mutex::new(Some(ServerThreads { acceptor_thread, pool }))),
            started: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            connect_cb: Mutex::new(None),
            message_cb: Mutex::new(None),
            write_complete_cb: Mutex::new(None),
            bound_addr: Mutex::new(None),
        })
    }

    /// The address actually bound once `run()` has succeeded; the
    /// configured address (which may name an ephemeral `:0` port)
    /// beforehand.
    pub fn local_addr(&self) -> Address {
        self.bound_addr.lock().unwrap().unwrap_or(self.config.addr)
    }

    pub fn set_connect_callback<F>(&self, cb: F)
    where
        F: Fn(&mut Reactor, &mut Connection, bool) + Send + Sync + 'static,
    {
        *self.connect_cb.lock().unwrap() = Some(Arc::new(cb));
    }

    pub fn set_message_callback<F>(&self, cb: F)
    where
        F: Fn(&mut Reactor, &mut Connection, Instant) + Send + Sync + 'static,
    {
        *self.message_cb.lock().unwrap() = Some(Arc::new(cb));
    }

    pub fn set_write_complete_callback<F>(&self, cb: F)
    where
        F: Fn(&mut Reactor, &mut Connection) + Send + Sync + 'static,
    {
        *self.write_complete_cb.lock().unwrap() = Some(Arc::new(cb));
    }

    /// Idempotent: a second call is a no-op. Binds and listens on the
    /// acceptor Reactor's own thread and blocks the caller until that
    /// either succeeds or fails, so a bind error is reported synchronously
    /// rather than discovered later from a log line.
    pub fn run(&self) -> io::Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let addr = self.config.addr;
        let reuse_port = self.config.reuse_port;
        let high_water_mark = self.config.high_water_mark;
        let threads = Arc::clone(&self.threads);
        let acceptor_handle = self.acceptor_handle.clone();
        let connect_cb = self.connect_cb.lock().unwrap().clone();
        let message_cb = self.message_cb.lock().unwrap().clone();
        let write_complete_cb = self.write_complete_cb.lock().unwrap().clone();

        let (tx, rx) = mpsc::channel::<io::Result<Address>>();

        self.acceptor_handle.run_task(move |reactor| {
            let result = setup_acceptor(
                reactor,
                addr,
                reuse_port,
                high_water_mark,
                threads,
                acceptor_handle,
                connect_cb,
                message_cb,
                write_complete_cb,
            );
            let _ = tx.send(result);
        });

        let bound = rx
            .recv()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "acceptor reactor exited before completing run()"))??;
        *self.bound_addr.lock().unwrap() = Some(bound);
        Ok(())
    }

    /// Idempotent: schedules `close(0)` on every live connection's worker
    /// Reactor, then stops every worker Reactor and finally the acceptor
    /// Reactor. A second call observes `shutting_down` already set and
    /// returns immediately.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if !self.started.load(Ordering::SeqCst) {
            return;
        }

        let (tx, rx) = mpsc::channel::<()>();
        self.acceptor_handle.run_task(move |reactor| {
            if let Some(state) = reactor.user_data::<ServerState>() {
                let entries: Vec<(ReactorHandle, ConnectionId)> = state.connections.drain().map(|(_, v)| v).collect();
                for (worker_handle, id) in entries {
                    connection::close(&worker_handle, id, Duration::ZERO);
                }
            }
            let _ = tx.send(());
        });
        let _ = rx.recv();

        if let Some(mut server_threads) = self.threads.lock().unwrap().take() {
            server_threads.pool.quit();
            server_threads.acceptor_thread.quit();
        }
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[allow(clippy::too_many_arguments)]
fn setup_acceptor(
    reactor: &mut Reactor,
    addr: Address,
    reuse_port: bool,
    high_water_mark: usize,
    threads: Arc<Mutex<Option<ServerThreads>>>,
    acceptor_handle: ReactorHandle,
    connect_cb: Option<ServerConnectCallback>,
    message_cb: Option<ServerMessageCallback>,
    write_complete_cb: Option<ServerWriteCompleteCallback>,
) -> io::Result<Address> {
    let acceptor = Acceptor::new(reactor, &addr, reuse_port)?;

    reactor.set_user_data(ServerState {
        threads,
        connections: HashMap::new(),
        connect_cb,
        message_cb,
        write_complete_cb,
        high_water_mark,
    });

    let bound_addr = {
        let mut acc = acceptor.borrow_mut();
        let acceptor_handle = acceptor_handle.clone();
        acc.set_new_connection_callback(Box::new(move |reactor, socket, t| {
            on_new_connection(reactor, socket, t, &acceptor_handle);
        }));
        acc.listen(reactor)?;
        acc.local_addr()?
    };

    // Keeps the `Acceptor` (and its Channel callback closure, which holds
    // the only other strong reference) alive for the Reactor's lifetime.
    reactor.set_user_data(acceptor);
    Ok(bound_addr)
}

/// Runs on the acceptor Reactor: picks the next worker via the pool's
/// round robin, hands the accepted socket off to it as a task, and lets
/// that task report the new connection's id back here once it has opened
/// on the worker thread.
fn on_new_connection(reactor: &mut Reactor, socket: Socket, _t: Instant, acceptor_handle: &ReactorHandle) {
    let peer_addr = match socket.peer_addr() {
        Ok(a) => a,
        Err(e) => {
            log::warn!("new connection: failed to read peer address: {e}");
            return;
        }
    };
    let local_addr = match socket.local_addr() {
        Ok(a) => a,
        Err(e) => {
            log::warn!("new connection: failed to read local address: {e}");
            return;
        }
    };
    let name = format!("{local_addr}-{peer_addr}");

    let state = match reactor.user_data::<ServerState>() {
        Some(s) => s,
        None => return,
    };

    let worker = match state.threads.lock().unwrap().as_ref() {
        Some(t) => t.pool.next_worker(),
        None => return, // shutdown raced the acceptor; drop the connection
    };
    let high_water_mark = state.high_water_mark;
    let connect_cb = state.connect_cb.clone();
    let message_cb = state.message_cb.clone();
    let write_complete_cb = state.write_complete_cb.clone();

    let acceptor_handle = acceptor_handle.clone();
    let worker_for_map = worker.clone();
    let name_for_task = name.clone();

    worker.run_task(move |reactor| {
        let id = connection::create(reactor, name_for_task.clone(), socket, peer_addr, high_water_mark);

        connection::with_connection(reactor, id, |_reactor, conn| {
            if let Some(cb) = connect_cb {
                conn.set_connect_callback(Box::new(move |r, c, connected| (cb)(r, c, connected)));
            }
            if let Some(cb) = message_cb {
                conn.set_message_callback(Box::new(move |r, c, t| (cb)(r, c, t)));
            }
            if let Some(cb) = write_complete_cb {
                conn.set_write_complete_callback(Box::new(move |r, c| (cb)(r, c)));
            }

            let acceptor_handle = acceptor_handle.clone();
            let name = name_for_task.clone();
            conn.set_close_callback(Box::new(move |_r, _c| {
                let name = name.clone();
                acceptor_handle.run_task(move |reactor| {
                    if let Some(state) = reactor.user_data::<ServerState>() {
                        state.connections.remove(&name);
                    }
                });
            }));
        });

        connection::open(reactor, id);

        let worker_for_map = worker_for_map.clone();
        let name_for_map = name_for_task.clone();
        acceptor_handle.run_task(move |reactor| {
            if let Some(state) = reactor.user_data::<ServerState>() {
                state.connections.insert(name_for_map, (worker_for_map, id));
            }
        });
    });
}

/// Convenience accessor used by tests and callers that want to know
/// whether a freshly-closed connection is still reachable through a
/// stale id — mirrors `ConnectionRegistry::get` at the server layer.
pub fn connection_state(reactor: &mut Reactor, id: ConnectionId) -> Option<ConnState> {
    connection::with_connection(reactor, id, |_r, conn| conn.state())
}
