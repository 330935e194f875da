use std::io::{self, Error, ErrorKind};
use std::mem;
use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::io::{AsRawFd, RawFd};

use libc::{c_int, c_void, sockaddr, socklen_t};

use super::fd::FileDesc;
use super::syscall;

pub fn new_raw_socket(family: c_int, ty: c_int) -> io::Result<FileDesc> {
    match syscall!(socket(family, ty | libc::SOCK_CLOEXEC, 0)) {
        Ok(fd) => return Ok(unsafe { FileDesc::new(fd) }),
        Err(ref e) if e.raw_os_error() == Some(libc::EINVAL) => {}
        Err(e) => return Err(e),
    }

    // Kernel predates SOCK_CLOEXEC in socket(2); fall back and set it by hand.
    let fd = syscall!(socket(family, ty, 0))?;
    let fd = unsafe { FileDesc::new(fd) };
    fd.set_cloexec()?;
    Ok(fd)
}

pub fn bind(fd: &FileDesc, addr: &SocketAddr) -> io::Result<()> {
    let storage = RawAddr::from(addr);
    syscall!(bind(fd.as_raw_fd(), storage.as_ptr(), storage.len()))?;
    Ok(())
}

pub fn listen(fd: &FileDesc, backlog: c_int) -> io::Result<()> {
    syscall!(listen(fd.as_raw_fd(), backlog))?;
    Ok(())
}

pub fn connect(fd: &FileDesc, addr: &SocketAddr) -> io::Result<()> {
    let storage = RawAddr::from(addr);
    match syscall!(connect(fd.as_raw_fd(), storage.as_ptr(), storage.len())) {
        Ok(_) => Ok(()),
        Err(ref e) if e.raw_os_error() == Some(libc::EINPROGRESS) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Owned on-stack `sockaddr_in`/`sockaddr_in6` storage, so the raw pointer
/// handed to a syscall stays valid for the lifetime of the call.
enum RawAddr {
    V4(libc::sockaddr_in),
    V6(libc::sockaddr_in6),
}

impl RawAddr {
    fn as_ptr(&self) -> *const sockaddr {
        match self {
            RawAddr::V4(a) => a as *const _ as *const sockaddr,
            RawAddr::V6(a) => a as *const _ as *const sockaddr,
        }
    }

    fn len(&self) -> socklen_t {
        match self {
            RawAddr::V4(_) => mem::size_of::<libc::sockaddr_in>() as socklen_t,
            RawAddr::V6(_) => mem::size_of::<libc::sockaddr_in6>() as socklen_t,
        }
    }
}

impl From<&SocketAddr> for RawAddr {
    fn from(addr: &SocketAddr) -> RawAddr {
        match addr {
            SocketAddr::V4(a) => RawAddr::V4(v4_to_raw(a)),
            SocketAddr::V6(a) => RawAddr::V6(v6_to_raw(a)),
        }
    }
}

/// `accept4` with `SOCK_CLOEXEC | SOCK_NONBLOCK` set atomically on the new
/// fd, propagating both flags the way the listener itself carries them.
pub fn accept4(fd: &FileDesc) -> io::Result<(FileDesc, SocketAddr)> {
    unsafe {
        let mut storage: libc::sockaddr_storage = mem::zeroed();
        let mut len = mem::size_of_val(&storage) as socklen_t;

        let accepted = syscall!(accept4(
            fd.as_raw_fd(),
            &mut storage as *mut _ as *mut sockaddr,
            &mut len,
            libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK
        ))?;

        let peer = sockaddr_to_addr(&storage, len as usize)?;
        Ok((FileDesc::new(accepted), peer))
    }
}

pub fn shutdown(fd: &FileDesc, how: c_int) -> io::Result<()> {
    syscall!(shutdown(fd.as_raw_fd(), how))?;
    Ok(())
}

pub fn local_addr(fd: &FileDesc) -> io::Result<SocketAddr> {
    sockname(fd, libc::getsockname)
}

pub fn peer_addr(fd: &FileDesc) -> io::Result<SocketAddr> {
    sockname(fd, libc::getpeername)
}

fn sockname(
    fd: &FileDesc,
    f: unsafe extern "C" fn(c_int, *mut sockaddr, *mut socklen_t) -> c_int,
) -> io::Result<SocketAddr> {
    unsafe {
        let mut storage: libc::sockaddr_storage = mem::zeroed();
        let mut len = mem::size_of_val(&storage) as socklen_t;
        let rc = f(fd.as_raw_fd(), &mut storage as *mut _ as *mut sockaddr, &mut len);
        if rc == -1 {
            return Err(Error::last_os_error());
        }
        sockaddr_to_addr(&storage, len as usize)
    }
}

pub fn set_reuseaddr(fd: &FileDesc, on: bool) -> io::Result<()> {
    setsockopt(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, on as c_int)
}

pub fn set_reuseport(fd: &FileDesc, on: bool) -> io::Result<()> {
    setsockopt(fd, libc::SOL_SOCKET, libc::SO_REUSEPORT, on as c_int)
}

pub fn set_keepalive(fd: &FileDesc, on: bool) -> io::Result<()> {
    setsockopt(fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE, on as c_int)
}

pub fn set_tcp_nodelay(fd: &FileDesc, on: bool) -> io::Result<()> {
    setsockopt(fd, libc::IPPROTO_TCP, libc::TCP_NODELAY, on as c_int)
}

fn setsockopt(fd: &FileDesc, level: c_int, opt: c_int, val: c_int) -> io::Result<()> {
    let payload = &val as *const c_int as *const c_void;
    syscall!(setsockopt(
        fd.as_raw_fd(),
        level,
        opt,
        payload,
        mem::size_of::<c_int>() as socklen_t
    ))?;
    Ok(())
}

pub fn take_error(fd: &FileDesc) -> io::Result<Option<io::Error>> {
    let mut payload: c_int = 0;
    let mut len = mem::size_of::<c_int>() as socklen_t;
    syscall!(getsockopt(
        fd.as_raw_fd(),
        libc::SOL_SOCKET,
        libc::SO_ERROR,
        &mut payload as *mut _ as *mut c_void,
        &mut len
    ))?;

    if payload == 0 {
        Ok(None)
    } else {
        Ok(Some(io::Error::from_raw_os_error(payload)))
    }
}

fn v4_to_raw(addr: &SocketAddrV4) -> libc::sockaddr_in {
    libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: addr.port().to_be(),
        sin_addr: libc::in_addr {
            s_addr: u32::from_ne_bytes(addr.ip().octets()),
        },
        sin_zero: [0; 8],
    }
}

fn v6_to_raw(addr: &SocketAddrV6) -> libc::sockaddr_in6 {
    libc::sockaddr_in6 {
        sin6_family: libc::AF_INET6 as libc::sa_family_t,
        sin6_port: addr.port().to_be(),
        sin6_flowinfo: addr.flowinfo(),
        sin6_addr: libc::in6_addr {
            s6_addr: addr.ip().octets(),
        },
        sin6_scope_id: addr.scope_id(),
    }
}

pub fn sockaddr_to_addr(storage: &libc::sockaddr_storage, len: usize) -> io::Result<SocketAddr> {
    match storage.ss_family as c_int {
        libc::AF_INET => {
            if len < mem::size_of::<libc::sockaddr_in>() {
                return Err(Error::new(ErrorKind::InvalidInput, "short sockaddr_in"));
            }
            let raw: libc::sockaddr_in =
                unsafe { *(storage as *const _ as *const libc::sockaddr_in) };
            let ip = std::net::Ipv4Addr::from(raw.sin_addr.s_addr.to_ne_bytes());
            Ok(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(raw.sin_port))))
        }
        libc::AF_INET6 => {
            if len < mem::size_of::<libc::sockaddr_in6>() {
                return Err(Error::new(ErrorKind::InvalidInput, "short sockaddr_in6"));
            }
            let raw: libc::sockaddr_in6 =
                unsafe { *(storage as *const _ as *const libc::sockaddr_in6) };
            let ip = std::net::Ipv6Addr::from(raw.sin6_addr.s6_addr);
            Ok(SocketAddr::V6(SocketAddrV6::new(
                ip,
                u16::from_be(raw.sin6_port),
                raw.sin6_flowinfo,
                raw.sin6_scope_id,
            )))
        }
        _ => Err(Error::new(ErrorKind::InvalidInput, "unsupported address family")),
    }
}
