use std::ops;

const EDGE: usize = 0b001;
const LEVEL: usize = 0b010;
const ONESHOT: usize = 0b100;

/// Polling options: edge- vs level-triggered, and one-shot rearm. Has no
/// effect on the `poll(2)` backend, which is always level-triggered.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct PollOpt(usize);

impl PollOpt {
    #[inline]
    pub fn edge() -> PollOpt {
        PollOpt(EDGE)
    }

    #[inline]
    pub fn level() -> PollOpt {
        PollOpt(LEVEL)
    }

    #[inline]
    pub fn oneshot() -> PollOpt {
        PollOpt(ONESHOT)
    }

    #[inline]
    pub fn is_edge(self) -> bool {
        self.0 & EDGE != 0
    }

    #[inline]
    pub fn is_level(self) -> bool {
        self.0 & LEVEL != 0
    }

    #[inline]
    pub fn is_oneshot(self) -> bool {
        self.0 & ONESHOT != 0
    }
}

impl ops::BitOr for PollOpt {
    type Output = PollOpt;

    #[inline]
    fn bitor(self, other: PollOpt) -> PollOpt {
        PollOpt(self.0 | other.0)
    }
}
