//! Runs one Reactor on its own OS thread, pairing a `std::thread` with
//! the Reactor it owns.

use std::io;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::poller::Backend;

use super::{Reactor, ReactorHandle};

const QUIT_JOIN_TIMEOUT: Duration = Duration::from_secs(3);

/// A hook run on the Reactor thread after construction but before
/// `run_loop` starts — e.g. to open an Acceptor's listening Channel before
/// the thread pool's creator thread proceeds.
pub type InitHook = Box<dyn FnOnce(&mut Reactor) + Send>;

struct Done {
    finished: Mutex<bool>,
    condvar: Condvar,
}

/// Owns one Reactor running on its own thread. Dropping it requests
/// shutdown and waits up to three seconds for the thread to exit; past
/// that it logs a warning and lets the `JoinHandle` drop un-joined rather
/// than block the dropping thread indefinitely.
pub struct ReactorThread {
    handle: ReactorHandle,
    done: Arc<Done>,
    join: Option<JoinHandle<()>>,
}

impl ReactorThread {
    /// Spawns the thread, runs `init` (if given) on it before the loop
    /// starts, and blocks the caller until the Reactor is constructed and
    /// its handle is ready to hand back.
    pub fn spawn(backend: Backend, name: impl Into<String>, init: Option<InitHook>) -> io::Result<ReactorThread> {
        let name = name.into();
        let (ready_tx, ready_rx) = mpsc::channel::<io::Result<ReactorHandle>>();
        let done = Arc::new(Done {
            finished: Mutex::new(false),
            condvar: Condvar::new(),
        });
        let done_for_thread = Arc::clone(&done);

        let join = thread::Builder::new().name(name.clone()).spawn(move || {
            let (mut reactor, handle) = match Reactor::new(backend) {
                Ok(pair) => pair,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            if let Some(init) = init {
                init(&mut reactor);
            }

            if ready_tx.send(Ok(handle)).is_err() {
                return;
            }

            if let Err(e) = reactor.run_loop() {
                log::error!("reactor thread {name} exited with error: {e}");
            }

            *done_for_thread.finished.lock().unwrap() = true;
            done_for_thread.condvar.notify_all();
        })?;

        let handle = ready_rx
            .recv()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "reactor thread exited before becoming ready"))??;

        Ok(ReactorThread {
            handle,
            done,
            join: Some(join),
        })
    }

    pub fn handle(&self) -> ReactorHandle {
        self.handle.clone()
    }

    /// Requests shutdown and waits up to three seconds for the loop to
    /// return and the thread to finish. A timeout is logged, not returned
    /// as an error — the thread is left to exit on its own.
    pub fn quit(&mut self) {
        self.handle.quit();

        let guard = self.done.finished.lock().unwrap();
        let (guard, timeout) = self
            .done
            .condvar
            .wait_timeout_while(guard, QUIT_JOIN_TIMEOUT, |finished| !*finished)
            .unwrap();
        drop(guard);

        if timeout.timed_out() {
            log::warn!(
                "reactor {} did not quit within {:?}; detaching its thread",
                self.handle.id(),
                QUIT_JOIN_TIMEOUT
            );
            // Drop the JoinHandle without joining rather than block the
            // caller indefinitely; the OS thread keeps running until it
            // notices `running` is false on its own.
            self.join.take();
            return;
        }

        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for ReactorThread {
    fn drop(&mut self) {
        if self.join.is_some() {
            self.quit();
        }
    }
}
