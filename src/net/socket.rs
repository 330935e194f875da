//! Typed wrapper over a TCP listening/connected socket fd, layered over
//! the raw `sys::socket`/`sys::fd` wrappers rather than re-deriving libc
//! bindings at this layer.

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};

use crate::sys;
use crate::sys::fd::FileDesc;

use super::address::Address;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SocketKind {
    Tcp,
    Udp,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Shutdown {
    Read,
    Write,
    Both,
}

/// Owns one socket fd. Immutable after construction aside from the
/// `set_*` option setters; closed exactly once on drop via `FileDesc`.
pub struct Socket {
    fd: FileDesc,
    kind: SocketKind,
}

impl Socket {
    /// Opens a new, non-blocking TCP socket matching `addr`'s family.
    pub fn new_tcp(addr: &Address) -> io::Result<Socket> {
        let family = match addr {
            Address::V4(_) => libc::AF_INET,
            Address::V6(_) => libc::AF_INET6,
        };
        let fd = sys::socket::new_raw_socket(family, libc::SOCK_STREAM)?;
        fd.set_nonblocking(true)?;
        Ok(Socket { fd, kind: SocketKind::Tcp })
    }

    pub(crate) fn from_fd(fd: FileDesc) -> Socket {
        Socket { fd, kind: SocketKind::Tcp }
    }

    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn bind(&self, addr: &Address) -> io::Result<()> {
        let std_addr: SocketAddr = (*addr).into();
        sys::socket::bind(&self.fd, &std_addr)
    }

    pub fn listen(&self, backlog: i32) -> io::Result<()> {
        sys::socket::listen(&self.fd, backlog)
    }

    pub fn connect(&self, addr: &Address) -> io::Result<()> {
        let std_addr: SocketAddr = (*addr).into();
        sys::socket::connect(&self.fd, &std_addr)
    }

    /// Accepts one pending connection with `CLOEXEC`/`NONBLOCK` already
    /// set on the new fd, inheriting the listener's non-blocking posture.
    pub fn accept(&self) -> io::Result<(Socket, Address)> {
        let (fd, peer) = sys::socket::accept4(&self.fd)?;
        Ok((Socket { fd, kind: self.kind }, peer.into()))
    }

    pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        let how = match how {
            Shutdown::Read => libc::SHUT_RD,
            Shutdown::Write => libc::SHUT_WR,
            Shutdown::Both => libc::SHUT_RDWR,
        };
        sys::socket::shutdown(&self.fd, how)
    }

    pub fn local_addr(&self) -> io::Result<Address> {
        sys::socket::local_addr(&self.fd).map(Address::from)
    }

    pub fn peer_addr(&self) -> io::Result<Address> {
        sys::socket::peer_addr(&self.fd).map(Address::from)
    }

    pub fn set_reuse_addr(&self, on: bool) -> io::Result<()> {
        sys::socket::set_reuseaddr(&self.fd, on)
    }

    pub fn set_reuse_port(&self, on: bool) -> io::Result<()> {
        sys::socket::set_reuseport(&self.fd, on)
    }

    pub fn set_keepalive(&self, on: bool) -> io::Result<()> {
        sys::socket::set_keepalive(&self.fd, on)
    }

    pub fn set_tcp_nodelay(&self, on: bool) -> io::Result<()> {
        sys::socket::set_tcp_nodelay(&self.fd, on)
    }

    pub fn set_nonblocking(&self, on: bool) -> io::Result<()> {
        self.fd.set_nonblocking(on)
    }

    pub fn set_close_on_exec(&self) -> io::Result<()> {
        self.fd.set_cloexec()
    }

    /// Returns the pending error recorded on the socket (`SO_ERROR`),
    /// clearing it, without needing a `read`/`write` to surface it.
    pub fn take_error(&self) -> io::Result<Option<io::Error>> {
        sys::socket::take_error(&self.fd)
    }
}

impl std::io::Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.fd).read(buf)
    }
}

impl std::io::Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&self.fd).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
