use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::time::Instant;

use crate::poller::{EventMask, Token};

use super::Reactor;

/// A Channel's position relative to the Poller.
///
/// `Pending` — never registered. `InLoop` — registered with a non-empty
/// listen mask. `NotInLoop` — registered historically, but the listen mask
/// was reduced to `NONE`; the arena slot is kept (not erased) until
/// `Channel::close` runs, so lookups by `ChannelId` remain valid.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Pending,
    InLoop,
    NotInLoop,
}

/// A Channel's per-event callback. Takes `&mut Reactor` (the Channel has
/// already been detached from the arena by `Reactor::dispatch`, so this
/// never aliases it) so handlers like `Connection`'s can call back into
/// `channel_update`/`channel_close` without a separate reentry path.
pub(crate) type EventCallback = Box<dyn FnMut(&mut Reactor, Instant)>;

/// Identifies a slot in the Reactor's Channel arena. The generation is
/// bumped every time a slot is freed and reused, so a `Token` carrying a
/// stale generation (an event for a since-closed/reused fd, reported by a
/// Poller backend that buffered it before the close was processed) is
/// recognized and dropped instead of dispatched to the wrong Channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChannelId {
    index: u32,
    generation: u32,
}

impl ChannelId {
    pub(crate) fn new(index: u32, generation: u32) -> ChannelId {
        ChannelId { index, generation }
    }

    pub(crate) fn index(self) -> usize {
        self.index as usize
    }

    pub(crate) fn generation(self) -> u32 {
        self.generation
    }

    pub(crate) fn to_token(self) -> Token {
        Token(((self.generation as usize) << 32) | self.index as usize)
    }

    pub(crate) fn from_token(token: Token) -> ChannelId {
        ChannelId {
            index: (token.0 & 0xFFFF_FFFF) as u32,
            generation: (token.0 >> 32) as u32,
        }
    }
}

/// Reactor-side representation of one fd. Never owns the fd — the
/// `Socket`/`TimerFd`/`EventFd` it watches does — and is itself owned by
/// the Reactor's channel arena, addressed elsewhere by `ChannelId`. This
/// replaces a `Channel`<->`Reactor` shared/weak-pointer pair with a
/// single ownership direction plus a generation-checked arena index.
pub struct Channel {
    fd: RawFd,
    state: ChannelState,
    listen_mask: EventMask,
    callbacks: HashMap<EventMaskKey, EventCallback>,
}

/// `EventMask` doesn't implement `Hash`/`Eq` in a way suitable for use as a
/// map key directly (it intentionally only exposes bitwise composition),
/// so callbacks are keyed on the raw bit pattern instead.
type EventMaskKey = usize;

fn key_of(mask: EventMask) -> EventMaskKey {
    // EventMask has no public accessor for its bits; round-trip through
    // `contains` against each known bit to reconstruct a stable key.
    let mut k = 0usize;
    if mask.is_readable() {
        k |= 0b0001;
    }
    if mask.is_writable() {
        k |= 0b0010;
    }
    if mask.is_close() {
        k |= 0b0100;
    }
    if mask.is_error() {
        k |= 0b1000;
    }
    k
}

impl Channel {
    pub(crate) fn new(fd: RawFd) -> Channel {
        Channel {
            fd,
            state: ChannelState::Pending,
            listen_mask: EventMask::NONE,
            callbacks: HashMap::new(),
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn listen_mask(&self) -> EventMask {
        self.listen_mask
    }

    pub(crate) fn set_state(&mut self, state: ChannelState) {
        self.state = state;
    }

    pub(crate) fn set_listen_mask(&mut self, mask: EventMask) {
        self.listen_mask = mask;
    }

    /// Registers a callback for an exact mask (a single bit, or a
    /// combination). An exact-mask match takes precedence over per-bit
    /// dispatch in `handle_event`.
    pub fn set_callback(&mut self, mask: EventMask, cb: EventCallback) {
        self.callbacks.insert(key_of(mask), cb);
    }

    pub fn clear_callback(&mut self, mask: EventMask) {
        self.callbacks.remove(&key_of(mask));
    }

    /// Dispatches `active` by priority `Close > Error > Read > Write`. An
    /// exact-mask callback registered for `active` fires once and takes
    /// precedence; otherwise each single bit of `active` fires its own
    /// callback, if one is registered. Close/Error bits are dispatched
    /// even when `listen_mask` never requested them — the kernel reports
    /// `EPOLLHUP`/`EPOLLERR` unsolicited, regardless of the registered
    /// interest set.
    pub(crate) fn handle_event(&mut self, reactor: &mut Reactor, active: EventMask, t: Instant) {
        if let Some(cb) = self.callbacks.get_mut(&key_of(active)) {
            cb(reactor, t);
            return;
        }

        for bit in active.iter_by_priority() {
            if let Some(cb) = self.callbacks.get_mut(&key_of(bit)) {
                cb(reactor, t);
            }
        }
    }
}
