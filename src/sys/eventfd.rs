use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};

use super::fd::FileDesc;
use super::syscall;

pub const EFD_CLOEXEC: libc::c_int = libc::EFD_CLOEXEC;
pub const EFD_NONBLOCK: libc::c_int = libc::EFD_NONBLOCK;

/// Linux `eventfd(2)`: a kernel counter that doubles as a many-writer,
/// one-reader readiness signal. Backs both the Reactor's wakeup channel and
/// the cross-thread task `Queue`'s readiness.
#[derive(Debug)]
pub struct EventFd {
    inner: FileDesc,
}

impl EventFd {
    /// Creates an eventfd with `initval: 0`, `CLOEXEC | NONBLOCK`.
    pub fn new() -> io::Result<EventFd> {
        EventFd::with_options(0, EFD_CLOEXEC | EFD_NONBLOCK)
    }

    pub fn with_options(initval: u32, flags: libc::c_int) -> io::Result<EventFd> {
        let fd = syscall!(eventfd(initval, flags))?;
        Ok(EventFd {
            inner: unsafe { FileDesc::new(fd) },
        })
    }

    pub fn read(&self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        (&self.inner).read_exact(&mut buf)?;
        Ok(u64::from_ne_bytes(buf))
    }

    /// Writes `val` to the counter. A short write cannot happen for an
    /// 8-byte eventfd write; if the underlying `write` still returns a
    /// partial count this logs at `warn` rather than propagating an error,
    /// matching the intended (logging-only) policy.
    pub fn write(&self, val: u64) -> io::Result<()> {
        let buf = val.to_ne_bytes();
        match (&self.inner).write(&buf) {
            Ok(n) if n < buf.len() => {
                log::warn!("eventfd write was short: {n} of {} bytes", buf.len());
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl FromRawFd for EventFd {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        EventFd {
            inner: FileDesc::new(fd),
        }
    }
}

impl IntoRawFd for EventFd {
    fn into_raw_fd(self) -> RawFd {
        self.inner.into_raw_fd()
    }
}

impl AsRawFd for EventFd {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.raw()
    }
}

#[cfg(test)]
mod test {
    use super::EventFd;

    #[test]
    fn write_and_read() {
        let eventfd = EventFd::new().unwrap();
        eventfd.write(123).unwrap();
        let count = eventfd.read().unwrap();
        assert_eq!(123, count);
    }

    #[test]
    fn read_blocks_when_empty() {
        let eventfd = EventFd::new().unwrap();
        let err = eventfd.read().unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);
    }
}
