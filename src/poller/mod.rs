//! The I/O demultiplexer: waits for readiness on a set of registered fds and
//! reports which became active, with per-fd event flags.
//!
//! Two backends share one interface — an edge/level-capable `epoll` and a
//! level-triggered `poll(2)` fallback — selected at construction time and
//! dispatched through a small tagged enum rather than a trait object, so
//! there is no per-call vtable hop on the hot path.

mod mask;
mod opt;
mod token;

pub use mask::EventMask;
pub use opt::PollOpt;
pub use token::Token;

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::sys;

/// Which multiplexer a `Poller` is backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Epoll,
    Poll,
}

enum Inner {
    Epoll(sys::epoll::Epoll),
    Poll(sys::poll::Poll),
}

enum InnerEvents {
    Epoll(sys::epoll::Events),
    Poll(sys::poll::Events),
}

/// Waits for I/O readiness on a set of fds and reports the active subset
/// with per-fd event flags. Mutating methods (`add`/`modify`/`remove`) must
/// only be called from the owning Reactor's thread — an "owner thread
/// only" discipline on `Channel`/`Poller` mutation, enforced by the
/// Reactor rather than by the type system.
pub struct Poller {
    inner: Inner,
}

/// Active-event buffer reused across `poll()` calls.
pub struct Events {
    inner: InnerEvents,
}

impl Poller {
    pub fn new(backend: Backend) -> io::Result<Poller> {
        let inner = match backend {
            Backend::Epoll => Inner::Epoll(sys::epoll::Epoll::new()?),
            Backend::Poll => Inner::Poll(sys::poll::Poll::new()?),
        };
        Ok(Poller { inner })
    }

    /// Blocks up to `timeout` (`None` = indefinitely). Returns `Ok(())` on
    /// success, including a timeout or `EINTR` (both report zero active
    /// events); the caller inspects `events` to tell the two apart from a
    /// genuine zero-readiness wakeup — both are harmless no-ops either way.
    pub fn wait(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        match (&mut self.inner, &mut events.inner) {
            (Inner::Epoll(ep), InnerEvents::Epoll(evs)) => match ep.wait(evs, timeout) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(()),
                Err(e) => Err(e),
            },
            (Inner::Poll(p), InnerEvents::Poll(evs)) => match p.wait(evs, timeout) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(()),
                Err(e) => Err(e),
            },
            _ => unreachable!("Events backend must match Poller backend"),
        }
    }

    pub fn add(&mut self, fd: RawFd, token: Token, interest: EventMask, opts: PollOpt) -> io::Result<()> {
        match &mut self.inner {
            Inner::Epoll(ep) => ep.add(fd, token, interest, opts),
            Inner::Poll(p) => p.add(fd, token, interest, opts),
        }
    }

    pub fn modify(&mut self, fd: RawFd, token: Token, interest: EventMask, opts: PollOpt) -> io::Result<()> {
        match &mut self.inner {
            Inner::Epoll(ep) => ep.modify(fd, token, interest, opts),
            Inner::Poll(p) => p.modify(fd, token, interest, opts),
        }
    }

    pub fn remove(&mut self, fd: RawFd) -> io::Result<()> {
        match &mut self.inner {
            Inner::Epoll(ep) => ep.delete(fd),
            Inner::Poll(p) => p.delete(fd),
        }
    }

    pub fn events(&self, capacity: usize) -> Events {
        let inner = match &self.inner {
            Inner::Epoll(_) => InnerEvents::Epoll(sys::epoll::Events::with_capacity(capacity)),
            Inner::Poll(_) => InnerEvents::Poll(sys::poll::Events::with_capacity(capacity)),
        };
        Events { inner }
    }
}

impl Events {
    pub fn len(&self) -> usize {
        match &self.inner {
            InnerEvents::Epoll(e) => e.len(),
            InnerEvents::Poll(e) => e.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.inner {
            InnerEvents::Epoll(e) => e.is_empty(),
            InnerEvents::Poll(e) => e.is_empty(),
        }
    }

    pub fn capacity(&self) -> usize {
        match &self.inner {
            InnerEvents::Epoll(e) => e.capacity(),
            InnerEvents::Poll(e) => e.capacity(),
        }
    }

    /// Doubles capacity when the previous `wait()` returned exactly as many
    /// events as the buffer could hold.
    pub fn grow_if_full(&mut self) {
        match &mut self.inner {
            InnerEvents::Epoll(e) => e.grow_if_full(),
            InnerEvents::Poll(e) => e.grow_if_full(),
        }
    }

    pub fn get(&self, idx: usize) -> Option<(Token, EventMask)> {
        match &self.inner {
            InnerEvents::Epoll(e) => e.get(idx),
            InnerEvents::Poll(e) => e.get(idx),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Token, EventMask)> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }
}
