use std::io::{self, Read};
use std::mem;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use std::time::Duration;

use super::fd::FileDesc;
use super::syscall;

/// Linux `timerfd(2)`: a monotonic-clock fd whose readiness signals a
/// pending timer expiration. Drives the whole `TimerQueue`.
#[derive(Debug)]
pub struct TimerFd {
    inner: FileDesc,
}

impl TimerFd {
    /// Creates a timerfd on `CLOCK_MONOTONIC` with `TFD_CLOEXEC | TFD_NONBLOCK`.
    pub fn new() -> io::Result<TimerFd> {
        let flags = libc::TFD_CLOEXEC | libc::TFD_NONBLOCK;
        let fd = syscall!(timerfd_create(libc::CLOCK_MONOTONIC, flags))?;
        Ok(TimerFd {
            inner: unsafe { FileDesc::new(fd) },
        })
    }

    /// Arms the timer to fire once after `value`, then never again
    /// (`interval: Duration::ZERO`). Passing `Duration::ZERO` for `value`
    /// disarms the timer.
    pub fn set(&self, value: Duration, interval: Duration) -> io::Result<()> {
        let new_value = libc::itimerspec {
            it_interval: duration_to_timespec(interval),
            it_value: duration_to_timespec(value),
        };
        let mut old_value: libc::itimerspec = unsafe { mem::zeroed() };

        syscall!(timerfd_settime(
            self.inner.as_raw_fd(),
            0,
            &new_value,
            &mut old_value
        ))?;
        Ok(())
    }

    pub fn disarm(&self) -> io::Result<()> {
        self.set(Duration::ZERO, Duration::ZERO)
    }

    /// Reads the expiration counter to acknowledge the fd's readiness.
    /// Returns the number of expirations since the last read.
    pub fn read(&self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        (&self.inner).read_exact(&mut buf)?;
        Ok(u64::from_ne_bytes(buf))
    }
}

fn duration_to_timespec(d: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    }
}

impl FromRawFd for TimerFd {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        TimerFd {
            inner: FileDesc::new(fd),
        }
    }
}

impl IntoRawFd for TimerFd {
    fn into_raw_fd(self) -> RawFd {
        self.inner.into_raw_fd()
    }
}

impl AsRawFd for TimerFd {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.raw()
    }
}
