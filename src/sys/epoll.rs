use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use libc::{EPOLLERR, EPOLLET, EPOLLHUP, EPOLLIN, EPOLLONESHOT, EPOLLOUT, EPOLLPRI, EPOLLRDHUP};

use super::syscall;
use crate::poller::{EventMask, PollOpt, Token};

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

/// Raw `epoll_create1`/`epoll_ctl`/`epoll_wait` wrapper. One per `Poller`.
pub struct Epoll {
    id: usize,
    epfd: RawFd,
}

impl Epoll {
    pub fn new() -> io::Result<Epoll> {
        let epfd = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Epoll { id, epfd })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Blocks up to `timeout` (`None` = indefinitely). `EINTR` surfaces as
    /// `io::ErrorKind::Interrupted`; the caller decides whether that is
    /// transient or fatal.
    pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        let timeout_ms = timeout
            .map(|to| std::cmp::min(to.as_millis(), libc::c_int::MAX as u128) as libc::c_int)
            .unwrap_or(-1);

        let cnt = syscall!(epoll_wait(
            self.epfd,
            events.events.as_mut_ptr(),
            events.events.capacity() as i32,
            timeout_ms
        ))?;

        unsafe { events.events.set_len(cnt as usize) };
        Ok(())
    }

    pub fn add(&self, fd: RawFd, token: Token, interest: EventMask, opts: PollOpt) -> io::Result<()> {
        let mut info = libc::epoll_event {
            events: mask_to_epoll(interest, opts),
            u64: token.0 as u64,
        };
        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, fd, &mut info))?;
        Ok(())
    }

    pub fn modify(&self, fd: RawFd, token: Token, interest: EventMask, opts: PollOpt) -> io::Result<()> {
        let mut info = libc::epoll_event {
            events: mask_to_epoll(interest, opts),
            u64: token.0 as u64,
        };
        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_MOD, fd, &mut info))?;
        Ok(())
    }

    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        let mut info = libc::epoll_event { events: 0, u64: 0 };
        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, &mut info))?;
        Ok(())
    }
}

fn mask_to_epoll(interest: EventMask, opts: PollOpt) -> u32 {
    let mut kind = 0;

    if interest.is_readable() {
        kind |= EPOLLIN | EPOLLPRI | EPOLLRDHUP;
    }
    if interest.is_writable() {
        kind |= EPOLLOUT;
    }

    if opts.is_edge() {
        kind |= EPOLLET;
    }
    if opts.is_oneshot() {
        kind |= EPOLLONESHOT;
    }

    kind as u32
}

impl AsRawFd for Epoll {
    fn as_raw_fd(&self) -> RawFd {
        self.epfd
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::close(self.epfd);
        }
    }
}

/// Raw active-event buffer returned by `epoll_wait`. Grows (doubles) only
/// when a `wait()` call returns exactly as many events as the buffer could
/// hold — i.e. the buffer was provably a limiting factor, not on `>=`.
pub struct Events {
    events: Vec<libc::epoll_event>,
}

impl Events {
    pub fn with_capacity(cap: usize) -> Events {
        Events {
            events: Vec::with_capacity(cap),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn capacity(&self) -> usize {
        self.events.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Doubles capacity if the last `wait()` filled the buffer exactly.
    pub fn grow_if_full(&mut self) {
        if self.events.len() == self.events.capacity() {
            self.events.reserve(self.events.capacity());
        }
    }

    pub fn get(&self, idx: usize) -> Option<(Token, EventMask)> {
        self.events.get(idx).map(|event| {
            let epoll = event.events as libc::c_int;
            let mut mask = EventMask::NONE;

            if (epoll & EPOLLIN) != 0 || (epoll & EPOLLPRI) != 0 || (epoll & EPOLLRDHUP) != 0 {
                mask |= EventMask::READ;
            }
            if (epoll & EPOLLOUT) != 0 {
                mask |= EventMask::WRITE;
            }
            if (epoll & EPOLLHUP) != 0 {
                mask |= EventMask::CLOSE;
            }
            if (epoll & EPOLLERR) != 0 {
                mask |= EventMask::ERROR;
            }

            (Token(event.u64 as usize), mask)
        })
    }
}
