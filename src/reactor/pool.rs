//! Distributes accepted connections across a fixed pool of worker
//! Reactors, handing each new connection to the next loop in round-robin
//! order.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::poller::Backend;

use super::thread::ReactorThread;
use super::{Reactor, ReactorHandle};

/// Hook run on each worker Reactor's own thread right after construction,
/// before its `run_loop` starts. Shared (`Arc<dyn Fn>` rather than
/// `FnOnce`) because the same hook runs once per worker thread.
pub type WorkerInit = Arc<dyn Fn(&mut Reactor) + Send + Sync>;

/// One acceptor Reactor plus zero or more worker Reactors, each on its own
/// thread. With zero workers, the acceptor's own Reactor also runs every
/// connection — a single-threaded configuration useful for tests and small
/// deployments.
pub struct ReactorPool {
    acceptor: ReactorHandle,
    workers: Vec<ReactorThread>,
    next: AtomicUsize,
}

impl ReactorPool {
    pub fn new(
        acceptor: ReactorHandle,
        backend: Backend,
        worker_count: usize,
        init: Option<WorkerInit>,
    ) -> io::Result<ReactorPool> {
        let mut workers = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let hook = init.clone().map(|init| -> super::thread::InitHook {
                Box::new(move |reactor: &mut Reactor| init(reactor))
            });
            let thread = ReactorThread::spawn(backend, format!("reactor-worker-{i}"), hook)?;
            workers.push(thread);
        }
        Ok(ReactorPool {
            acceptor,
            workers,
            next: AtomicUsize::new(0),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Picks the Reactor that should own the next accepted connection:
    /// the next worker in round-robin order, or the acceptor's own
    /// Reactor when the pool has no dedicated workers.
    pub fn next_worker(&self) -> ReactorHandle {
        if self.workers.is_empty() {
            return self.acceptor.clone();
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        self.workers[i].handle()
    }

    /// Requests shutdown of every worker Reactor (not the acceptor's,
    /// which the caller owns and stops separately) and waits for each in
    /// turn.
    pub fn quit(&mut self) {
        for worker in &mut self.workers {
            worker.quit();
        }
    }
}

impl Drop for ReactorPool {
    fn drop(&mut self) {
        self.quit();
    }
}
