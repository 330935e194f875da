use std::{fmt, ops};

const READ: usize = 0b0001;
const WRITE: usize = 0b0010;
const CLOSE: usize = 0b0100;
const ERROR: usize = 0b1000;

/// A set of readiness events: `Read | Write | Close | Error`. `Read`
/// additionally stands in for "urgent" (`EPOLLPRI`) and "peer half-close"
/// (`EPOLLRDHUP`) readiness, which the kernel reports as extra bits on the
/// same read-side notification.
///
/// Composable with the usual bitwise operators, hand-rolled the same way
/// `queen_io`'s `Ready`/`EpollOpt` types are rather than pulling in the
/// `bitflags` crate for four bits.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventMask(usize);

impl EventMask {
    pub const NONE: EventMask = EventMask(0);
    pub const READ: EventMask = EventMask(READ);
    pub const WRITE: EventMask = EventMask(WRITE);
    pub const CLOSE: EventMask = EventMask(CLOSE);
    pub const ERROR: EventMask = EventMask(ERROR);

    #[inline]
    pub fn is_readable(self) -> bool {
        self.contains(EventMask::READ)
    }

    #[inline]
    pub fn is_writable(self) -> bool {
        self.contains(EventMask::WRITE)
    }

    #[inline]
    pub fn is_close(self) -> bool {
        self.contains(EventMask::CLOSE)
    }

    #[inline]
    pub fn is_error(self) -> bool {
        self.contains(EventMask::ERROR)
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn contains(self, other: EventMask) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: EventMask) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: EventMask) {
        self.0 &= !other.0;
    }

    /// Iterates over the individual single-bit masks set in `self`, in
    /// `Close > Error > Read > Write` priority order — the dispatch order
    /// `Channel::handle_event` fires callbacks in.
    pub fn iter_by_priority(self) -> impl Iterator<Item = EventMask> {
        [EventMask::CLOSE, EventMask::ERROR, EventMask::READ, EventMask::WRITE]
            .into_iter()
            .filter(move |&bit| self.contains(bit))
    }
}

impl ops::BitOr for EventMask {
    type Output = EventMask;

    #[inline]
    fn bitor(self, other: EventMask) -> EventMask {
        EventMask(self.0 | other.0)
    }
}

impl ops::BitOrAssign for EventMask {
    #[inline]
    fn bitor_assign(&mut self, other: EventMask) {
        self.0 |= other.0;
    }
}

impl ops::BitAnd for EventMask {
    type Output = EventMask;

    #[inline]
    fn bitand(self, other: EventMask) -> EventMask {
        EventMask(self.0 & other.0)
    }
}

impl ops::Sub for EventMask {
    type Output = EventMask;

    #[inline]
    fn sub(self, other: EventMask) -> EventMask {
        EventMask(self.0 & !other.0)
    }
}

impl fmt::Debug for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut wrote = false;
        for (flag, name) in [
            (EventMask::READ, "Read"),
            (EventMask::WRITE, "Write"),
            (EventMask::CLOSE, "Close"),
            (EventMask::ERROR, "Error"),
        ] {
            if self.contains(flag) {
                if wrote {
                    write!(f, " | ")?;
                }
                write!(f, "{name}")?;
                wrote = true;
            }
        }
        if !wrote {
            write!(f, "None")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::EventMask;

    #[test]
    fn compose_and_query() {
        let mask = EventMask::READ | EventMask::WRITE;
        assert!(mask.is_readable());
        assert!(mask.is_writable());
        assert!(!mask.is_close());
        assert!(!mask.is_error());
    }

    #[test]
    fn priority_order() {
        let mask = EventMask::READ | EventMask::CLOSE | EventMask::WRITE;
        let order: Vec<_> = mask.iter_by_priority().collect();
        assert_eq!(order, vec![EventMask::CLOSE, EventMask::READ, EventMask::WRITE]);
    }

    #[test]
    fn remove_bit() {
        let mut mask = EventMask::READ | EventMask::WRITE;
        mask.remove(EventMask::WRITE);
        assert!(mask.is_readable());
        assert!(!mask.is_writable());
    }
}
