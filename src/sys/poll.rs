use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use super::syscall;
use crate::poller::{EventMask, PollOpt, Token};

/// Level-triggered `poll(2)`-based fallback backend. `PollOpt::edge` has no
/// effect here; `poll(2)` is always level-triggered.
pub struct Poll {
    fds: Vec<libc::pollfd>,
    tokens: Vec<Token>,
}

impl Poll {
    pub fn new() -> io::Result<Poll> {
        Ok(Poll {
            fds: Vec::new(),
            tokens: Vec::new(),
        })
    }

    pub fn wait(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        let timeout_ms = timeout
            .map(|to| std::cmp::min(to.as_millis(), libc::c_int::MAX as u128) as libc::c_int)
            .unwrap_or(-1);

        for pfd in &mut self.fds {
            pfd.revents = 0;
        }

        let cnt = syscall!(poll(self.fds.as_mut_ptr(), self.fds.len() as libc::nfds_t, timeout_ms))?;

        events.active.clear();
        if cnt > 0 {
            for (pfd, token) in self.fds.iter().zip(self.tokens.iter()) {
                if pfd.revents == 0 {
                    continue;
                }

                let mut mask = EventMask::NONE;
                if pfd.revents & (libc::POLLIN | libc::POLLPRI) != 0 {
                    mask |= EventMask::READ;
                }
                if pfd.revents & libc::POLLOUT != 0 {
                    mask |= EventMask::WRITE;
                }
                if pfd.revents & (libc::POLLHUP | libc::POLLNVAL) != 0 {
                    mask |= EventMask::CLOSE;
                }
                if pfd.revents & libc::POLLERR != 0 {
                    mask |= EventMask::ERROR;
                }

                events.active.push((*token, mask));
            }
        }

        Ok(())
    }

    pub fn add(&mut self, fd: RawFd, token: Token, interest: EventMask, _opts: PollOpt) -> io::Result<()> {
        self.fds.push(libc::pollfd {
            fd,
            events: mask_to_poll(interest),
            revents: 0,
        });
        self.tokens.push(token);
        Ok(())
    }

    pub fn modify(&mut self, fd: RawFd, token: Token, interest: EventMask, _opts: PollOpt) -> io::Result<()> {
        if let Some(idx) = self.index_of(fd) {
            self.fds[idx].events = mask_to_poll(interest);
            self.tokens[idx] = token;
            Ok(())
        } else {
            Err(io::Error::from(io::ErrorKind::NotFound))
        }
    }

    pub fn delete(&mut self, fd: RawFd) -> io::Result<()> {
        if let Some(idx) = self.index_of(fd) {
            self.fds.swap_remove(idx);
            self.tokens.swap_remove(idx);
            Ok(())
        } else {
            Err(io::Error::from(io::ErrorKind::NotFound))
        }
    }

    fn index_of(&self, fd: RawFd) -> Option<usize> {
        self.fds.iter().position(|p| p.fd == fd)
    }
}

fn mask_to_poll(interest: EventMask) -> libc::c_short {
    let mut kind = 0;
    if interest.is_readable() {
        kind |= libc::POLLIN;
    }
    if interest.is_writable() {
        kind |= libc::POLLOUT;
    }
    kind as libc::c_short
}

pub struct Events {
    active: Vec<(Token, EventMask)>,
}

impl Events {
    pub fn with_capacity(cap: usize) -> Events {
        Events {
            active: Vec::with_capacity(cap),
        }
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn capacity(&self) -> usize {
        self.active.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn grow_if_full(&mut self) {
        if self.active.len() == self.active.capacity() {
            self.active.reserve(self.active.capacity());
        }
    }

    pub fn get(&self, idx: usize) -> Option<(Token, EventMask)> {
        self.active.get(idx).copied()
    }
}
