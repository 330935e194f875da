use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::poller::{EventMask, PollOpt};
use crate::sys;

use super::channel::ChannelId;
use super::Reactor;

/// Identifies one scheduled timer task across its lifetime, independent of
/// its current position in the ordered set (which changes every time a
/// repeat timer re-fires).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub(crate) u64);

struct Task {
    callback: Box<dyn FnMut(Instant) + 'static>,
    interval: Option<Duration>,
}

/// One timer-fd drives every scheduled task. Tasks are held in a set
/// ordered by `(expires_at, id)`; the earliest entry's `expires_at` always
/// matches the timer-fd's next programmed fire time, unless the set is
/// empty (timer disarmed).
pub(crate) struct TimerQueue {
    timer_fd: sys::timerfd::TimerFd,
    channel: ChannelId,
    order: BTreeSet<(Instant, TimerId)>,
    tasks: HashMap<TimerId, Task>,
    cancel_set: HashSet<TimerId>,
    handling: bool,
}

impl TimerQueue {
    pub(crate) fn new(timer_fd: sys::timerfd::TimerFd, channel: ChannelId) -> TimerQueue {
        TimerQueue {
            timer_fd,
            channel,
            order: BTreeSet::new(),
            tasks: HashMap::new(),
            cancel_set: HashSet::new(),
            handling: false,
        }
    }

    pub(crate) fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Fixes up the channel id once the timer-fd has actually been
    /// registered with the Poller — `Reactor::new` builds the
    /// `TimerQueue` before its Channel arena exists, so the real id isn't
    /// known at construction time.
    pub(crate) fn set_channel(&mut self, channel: ChannelId) {
        self.channel = channel;
    }

    pub(crate) fn insert(
        &mut self,
        id: TimerId,
        expires_at: Instant,
        interval: Option<Duration>,
        callback: Box<dyn FnMut(Instant) + 'static>,
    ) {
        let was_earliest = self.order.iter().next().copied();

        self.order.insert((expires_at, id));
        self.tasks.insert(id, Task { callback, interval });

        let now_earliest = self.order.iter().next().copied();
        if now_earliest != was_earliest {
            let _ = self.rearm();
        }
    }

    pub(crate) fn cancel(&mut self, id: TimerId) {
        if self.handling {
            // Deferred: removing the entry mid-iteration would let a
            // repeat task's interval-reset resurrect it. Mark it instead;
            // the expiry handler checks the set before reinserting.
            self.cancel_set.insert(id);
            return;
        }

        if let Some(task) = self.tasks.remove(&id) {
            drop(task);
            self.order.retain(|&(_, tid)| tid != id);
        }
    }

    /// Computes `(earliest.expires_at - now)` and arms the timer-fd
    /// one-shot. A non-positive delta arms with 1ns so a re-entrant fire
    /// follows immediately rather than never.
    fn rearm(&self) -> std::io::Result<()> {
        match self.order.iter().next() {
            Some(&(expires_at, _)) => {
                let now = Instant::now();
                let delay = if expires_at > now {
                    expires_at - now
                } else {
                    Duration::from_nanos(1)
                };
                self.timer_fd.set(delay, Duration::ZERO)
            }
            None => self.timer_fd.disarm(),
        }
    }
}

/// Called from `Reactor::dispatch` when the timer-fd's Channel reports
/// `Read`. Acknowledges the fd, fires every task expired at-or-before
/// `now + 1ms`, reinserts repeat tasks at `expires_at + interval` unless
/// cancelled during this pass, then rearms.
pub(crate) fn handle_timer_expiry(reactor: &mut Reactor, t: Instant) {
    let _ = reactor.timer_queue.timer_fd.read();

    reactor.timer_queue.handling = true;
    let epsilon = Duration::from_millis(1);
    let deadline = t + epsilon;

    let mut expired = Vec::new();
    loop {
        match reactor.timer_queue.order.iter().next().copied() {
            Some((expires_at, id)) if expires_at <= deadline => {
                reactor.timer_queue.order.remove(&(expires_at, id));
                expired.push((expires_at, id));
            }
            _ => break,
        }
    }

    for (expires_at, id) in expired {
        let cancelled_before_fire = reactor.timer_queue.cancel_set.remove(&id);
        if cancelled_before_fire {
            reactor.timer_queue.tasks.remove(&id);
            continue;
        }

        let interval = match reactor.timer_queue.tasks.get(&id) {
            Some(task) => task.interval,
            None => continue,
        };

        if let Some(task) = reactor.timer_queue.tasks.get_mut(&id) {
            (task.callback)(t);
        }

        let cancelled_during_fire = reactor.timer_queue.cancel_set.remove(&id);
        match (interval, cancelled_during_fire) {
            (Some(interval), false) => {
                reactor.timer_queue.order.insert((expires_at + interval, id));
            }
            _ => {
                reactor.timer_queue.tasks.remove(&id);
            }
        }
    }

    reactor.timer_queue.cancel_set.clear();
    reactor.timer_queue.handling = false;
    let _ = reactor.timer_queue.rearm();
}

/// Opens an arena slot for the Reactor's (already-created) timer-fd and
/// registers it with the Poller for `Read`. No Channel callback is
/// attached: the timer-fd's token is recognized and dispatched specially
/// by `Reactor::dispatch`, since a Channel callback only receives
/// `Instant` and has no path back to sibling Reactor state such as the
/// TimerQueue itself. Takes the fd by raw value rather than creating a
/// fresh `TimerFd` so callers that already own one (namely
/// `Reactor::new`, which must have the fd in hand before it can build the
/// `TimerQueue` that owns it) never end up with two.
pub(crate) fn register_timer_channel(reactor: &mut Reactor, fd: std::os::unix::io::RawFd) -> std::io::Result<ChannelId> {
    let id = reactor.open_channel(fd);
    reactor.channel_open(id, EventMask::READ, PollOpt::level())?;
    Ok(id)
}
