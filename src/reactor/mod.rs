//! The Reactor: one `Poller`, one wakeup channel, one `TimerQueue`, and the
//! Channel arena they share, all confined to a single OS thread after
//! `run_loop` starts. Cross-thread interaction happens only through a
//! [`ReactorHandle`], which is cheap to clone and safe to share.

mod channel;
mod pool;
mod thread;
mod timer;

pub use channel::{Channel, ChannelId, ChannelState};
pub use pool::{ReactorPool, WorkerInit};
pub use thread::{InitHook, ReactorThread};
pub use timer::TimerId;

use std::any::{Any, TypeId};
use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use slab::Slab;

use crate::poller::{Backend, EventMask, PollOpt, Poller, Token};
use crate::sys;

/// A unit of cross-thread work posted to a Reactor. Its closure must be
/// `Send` (it is constructed on an arbitrary thread) but is only ever
/// invoked on the owning Reactor's thread.
pub type Task = Box<dyn FnOnce(&mut Reactor) + Send>;

struct ChannelSlot {
    channel: Channel,
    generation: u32,
}

struct Shared {
    id: u64,
    owner_thread: OnceLock<ThreadId>,
    running: AtomicBool,
    waiting: AtomicBool,
    wake_fd: sys::eventfd::EventFd,
    tasks: Mutex<VecDeque<Task>>,
    next_timer_id: AtomicU64,
}

thread_local! {
    /// Set for the duration of `Reactor::run_loop` on the thread running
    /// it, so `ReactorHandle::run_task` called reentrantly from inside a
    /// dispatched callback (same thread, same call stack) can execute
    /// inline instead of posting-and-waking itself. Never read from, or
    /// written on, any thread other than the one currently inside
    /// `run_loop` for the Reactor it points at.
    static CURRENT_REACTOR: Cell<*mut Reactor> = Cell::new(std::ptr::null_mut());
}

struct CurrentGuard;

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        CURRENT_REACTOR.with(|c| c.set(std::ptr::null_mut()));
    }
}

static NEXT_REACTOR_ID: AtomicU64 = AtomicU64::new(1);

/// One event loop: a `Poller`, a Channel arena, a `TimerQueue`, and a
/// cross-thread task queue drained once per iteration. Constructed and run
/// entirely on the thread that calls `run_loop` — never sent to another
/// thread itself; other threads interact with it only via the
/// [`ReactorHandle`] returned by [`Reactor::new`].
pub struct Reactor {
    shared: Arc<Shared>,
    poller: Poller,
    channels: Slab<ChannelSlot>,
    wake_channel: ChannelId,
    timer_queue: timer::TimerQueue,
    /// Thread-confined extension slots, one per installed type. The net
    /// layer uses this to keep its `ConnectionRegistry` (on every worker
    /// Reactor) and the server's `ServerState` (on the acceptor Reactor)
    /// reachable from Channel callbacks without this module depending on
    /// `crate::net` — and, when a pool runs with zero dedicated workers,
    /// to let both coexist on the one Reactor that plays both roles.
    user_data: HashMap<TypeId, Box<dyn Any>>,
}

/// A cheap, `Send + Sync` handle to a Reactor, usable from any thread to
/// post work, schedule timers, or request shutdown.
#[derive(Clone)]
pub struct ReactorHandle {
    shared: Arc<Shared>,
}

const EVENTS_INITIAL_CAPACITY: usize = 64;

impl Reactor {
    /// Builds a new Reactor: opens the Poller, registers the wakeup
    /// eventfd and timerfd channels, and returns both the Reactor (to be
    /// moved into the thread that will run it) and a `ReactorHandle` (to
    /// hand out to callers on any other thread before that happens).
    pub fn new(backend: Backend) -> io::Result<(Reactor, ReactorHandle)> {
        let poller = Poller::new(backend)?;
        let wake_fd = sys::eventfd::EventFd::new()?;
        let timer_fd = sys::timerfd::TimerFd::new()?;
        let timer_fd_raw = timer_fd.as_raw_fd();

        let shared = Arc::new(Shared {
            id: NEXT_REACTOR_ID.fetch_add(1, Ordering::Relaxed),
            owner_thread: OnceLock::new(),
            running: AtomicBool::new(false),
            waiting: AtomicBool::new(false),
            wake_fd,
            tasks: Mutex::new(VecDeque::new()),
            next_timer_id: AtomicU64::new(1),
        });

        // The TimerQueue needs a ChannelId, which needs `channels` to exist
        // first; built here with a placeholder id and fixed up below via
        // `timer::register_timer_channel` once the arena is live — but the
        // `timer_fd` itself is allocated exactly once, above, and moved in
        // here rather than recreated.
        let mut reactor = Reactor {
            shared: Arc::clone(&shared),
            poller,
            channels: Slab::new(),
            // Placeholder; replaced immediately below once the arena exists.
            wake_channel: ChannelId::new(0, 0),
            timer_queue: timer::TimerQueue::new(timer_fd, ChannelId::new(0, 0)),
            user_data: HashMap::new(),
        };

        let wake_fd_raw = reactor.shared.wake_fd.as_raw_fd();
        reactor.wake_channel = reactor.open_channel(wake_fd_raw);
        reactor.channel_set_callback(
            reactor.wake_channel,
            EventMask::READ,
            Box::new({
                let shared = Arc::clone(&shared);
                move |_reactor: &mut Reactor, _t: Instant| {
                    let _ = shared.wake_fd.read();
                }
            }),
        );
        reactor.channel_open(reactor.wake_channel, EventMask::READ, PollOpt::level())?;

        let timer_channel = timer::register_timer_channel(&mut reactor, timer_fd_raw)?;
        reactor.timer_queue.set_channel(timer_channel);

        let handle = ReactorHandle { shared };
        Ok((reactor, handle))
    }

    pub fn handle(&self) -> ReactorHandle {
        ReactorHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Installs thread-confined extension state, replacing any previous
    /// value of the same type `T`. Distinct types coexist side by side —
    /// this is how a pool with zero dedicated workers lets the acceptor
    /// Reactor hold both a `ConnectionRegistry` and the server's
    /// `ServerState` at once.
    pub fn set_user_data<T: 'static>(&mut self, data: T) {
        self.user_data.insert(TypeId::of::<T>(), Box::new(data));
    }

    /// Returns the extension state of type `T` installed by
    /// `set_user_data`, if any.
    pub fn user_data<T: 'static>(&mut self) -> Option<&mut T> {
        self.user_data.get_mut(&TypeId::of::<T>()).and_then(|b| b.downcast_mut::<T>())
    }

    /// Runs the event loop until `quit()` is called. Named `run_loop`
    /// rather than `loop` (a reserved word) or plain `run` (reserved for
    /// the task-execution entry point mirrored on `ReactorHandle`).
    pub fn run_loop(&mut self) -> io::Result<()> {
        let _ = self.shared.owner_thread.set(std::thread::current().id());
        self.shared.running.store(true, Ordering::SeqCst);

        CURRENT_REACTOR.with(|c| c.set(self as *mut Reactor));
        let _guard = CurrentGuard;

        let mut events = self.poller.events(EVENTS_INITIAL_CAPACITY);

        while self.shared.running.load(Ordering::SeqCst) {
            self.shared.waiting.store(true, Ordering::SeqCst);
            let wait_result = self.poller.wait(&mut events, Some(Duration::from_secs(1)));
            self.shared.waiting.store(false, Ordering::SeqCst);
            wait_result?;

            let now = Instant::now();
            let active: Vec<(Token, EventMask)> = events.iter().collect();
            for (token, mask) in active {
                self.dispatch(token, mask, now);
            }

            events.grow_if_full();

            self.drain_tasks();
        }

        Ok(())
    }

    fn dispatch(&mut self, token: Token, mask: EventMask, t: Instant) {
        let id = ChannelId::from_token(token);

        if id == self.timer_queue.channel() {
            timer::handle_timer_expiry(self, t);
            return;
        }

        let slot = match self.channels.get_mut(id.index()) {
            Some(slot) if slot.generation == id.generation() => slot,
            _ => return, // stale token: slot freed and possibly reused
        };

        // Temporarily detach the Channel from the arena so its callback
        // can freely call back into `&mut Reactor` (e.g. via
        // `ReactorHandle::run_task`'s same-thread fast path) without
        // aliasing `self.channels`.
        let mut channel = std::mem::replace(&mut slot.channel, Channel::new(slot.channel.fd()));
        channel.handle_event(self, mask, t);
        if let Some(slot) = self.channels.get_mut(id.index()) {
            if slot.generation == id.generation() {
                // The callback may have called `channel_open`/
                // `channel_update` on its own id while `channel` was
                // detached; those mutated the placeholder left behind in
                // the slot, not `channel`. Carry that in-flight
                // state/listen_mask forward before restoring the
                // detached copy, so dispatch doesn't revert a channel's
                // own mid-callback mask change.
                channel.set_state(slot.channel.state());
                channel.set_listen_mask(slot.channel.listen_mask());
                slot.channel = channel;
            }
        }
    }

    fn drain_tasks(&mut self) {
        loop {
            let task = {
                let mut tasks = self.shared.tasks.lock().unwrap();
                tasks.pop_front()
            };
            match task {
                Some(task) => task(self),
                None => break,
            }
        }
    }

    // -- Channel arena ----------------------------------------------------

    /// Allocates a new arena slot for `fd` in `Pending` state. Does not
    /// register it with the Poller; call `channel_open` for that.
    pub(crate) fn open_channel(&mut self, fd: RawFd) -> ChannelId {
        let generation = 0;
        let index = self.channels.insert(ChannelSlot {
            channel: Channel::new(fd),
            generation,
        });
        ChannelId::new(index as u32, generation)
    }

    pub(crate) fn channel_set_callback(&mut self, id: ChannelId, mask: EventMask, cb: channel::EventCallback) {
        if let Some(slot) = self.slot_mut(id) {
            slot.channel.set_callback(mask, cb);
        }
    }

    pub(crate) fn channel_clear_callback(&mut self, id: ChannelId, mask: EventMask) {
        if let Some(slot) = self.slot_mut(id) {
            slot.channel.clear_callback(mask);
        }
    }

    /// Registers `id`'s fd with the Poller for `mask`, or updates an
    /// already-registered Channel's interest set.
    pub(crate) fn channel_open(&mut self, id: ChannelId, mask: EventMask, opts: PollOpt) -> io::Result<()> {
        let (fd, prior_state) = match self.slot_mut(id) {
            Some(slot) => (slot.channel.fd(), slot.channel.state()),
            None => return Ok(()),
        };

        match prior_state {
            ChannelState::Pending => {
                self.poller.add(fd, id.to_token(), mask, opts)?;
            }
            ChannelState::InLoop | ChannelState::NotInLoop => {
                self.poller.modify(fd, id.to_token(), mask, opts)?;
            }
        }

        if let Some(slot) = self.slot_mut(id) {
            slot.channel.set_listen_mask(mask);
            slot.channel.set_state(if mask.is_empty() {
                ChannelState::NotInLoop
            } else {
                ChannelState::InLoop
            });
        }
        Ok(())
    }

    pub(crate) fn channel_update(&mut self, id: ChannelId, mask: EventMask) -> io::Result<()> {
        self.channel_open(id, mask, PollOpt::level())
    }

    /// Deregisters `id`'s fd from the Poller (if registered) and frees the
    /// arena slot, bumping its generation so any event already queued for
    /// the old token is recognized as stale in `dispatch`.
    pub(crate) fn channel_close(&mut self, id: ChannelId) -> io::Result<()> {
        let (fd, state) = match self.slot_mut(id) {
            Some(slot) => (slot.channel.fd(), slot.channel.state()),
            None => return Ok(()),
        };

        if state != ChannelState::Pending {
            self.poller.remove(fd)?;
        }

        if self.channels.get(id.index()).is_some() {
            let mut slot = self.channels.remove(id.index());
            slot.generation = slot.generation.wrapping_add(1);
        }
        Ok(())
    }

    fn slot_mut(&mut self, id: ChannelId) -> Option<&mut ChannelSlot> {
        match self.channels.get_mut(id.index()) {
            Some(slot) if slot.generation == id.generation() => Some(slot),
            _ => None,
        }
    }
}

impl ReactorHandle {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    fn is_owner_thread(&self) -> bool {
        self.shared.owner_thread.get() == Some(&std::thread::current().id()).copied().as_ref()
    }

    fn wake(&self) {
        let _ = self.shared.wake_fd.write(1);
    }

    /// Posts `task` to run on the Reactor's own thread. `high_priority`
    /// pushes it to the front of the queue instead of the back — used for
    /// the same-thread-but-not-currently-in-`run_loop` fallback path of
    /// `run_task`, and for urgent control messages like `quit`.
    pub fn post(&self, task: Task, high_priority: bool) {
        {
            let mut tasks = self.shared.tasks.lock().unwrap();
            if high_priority {
                tasks.push_front(task);
            } else {
                tasks.push_back(task);
            }
        }
        if self.shared.waiting.load(Ordering::SeqCst) || !self.is_owner_thread() {
            self.wake();
        }
    }

    /// Runs `task` against the Reactor. If called on the Reactor's own
    /// thread while it is actively inside `run_loop`, runs inline in the
    /// calling stack frame; otherwise posts it with high priority and
    /// wakes the loop.
    pub fn run_task<F>(&self, task: F)
    where
        F: FnOnce(&mut Reactor) + Send + 'static,
    {
        if self.is_owner_thread() {
            let ptr = CURRENT_REACTOR.with(|c| c.get());
            if !ptr.is_null() {
                // Safety: `ptr` was set by `run_loop` for this exact
                // thread and is cleared before `run_loop` returns, so it
                // is valid for the duration of this reentrant call.
                unsafe { task(&mut *ptr) };
                return;
            }
        }
        self.post(Box::new(task), true);
    }

    /// Requests shutdown. Safe to call from any thread, including the
    /// Reactor's own.
    pub fn quit(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.wake();
    }

    /// Schedules `callback` to fire once at `at`. Returns a `TimerId`
    /// immediately (allocated here, before the insertion task runs on the
    /// owner thread) so a caller on the same thread can cancel it before
    /// it is even inserted — the cancel, posted after the insert from the
    /// same caller thread, is guaranteed to run after it.
    pub fn add_timer_at<F>(&self, at: Instant, callback: F) -> TimerId
    where
        F: FnMut(Instant) + Send + 'static,
    {
        self.schedule(at, None, callback)
    }

    pub fn add_timer_after<F>(&self, delay: Duration, callback: F) -> TimerId
    where
        F: FnMut(Instant) + Send + 'static,
    {
        self.schedule(Instant::now() + delay, None, callback)
    }

    pub fn add_timer_every<F>(&self, first: Duration, interval: Duration, callback: F) -> TimerId
    where
        F: FnMut(Instant) + Send + 'static,
    {
        self.schedule(Instant::now() + first, Some(interval), callback)
    }

    fn schedule<F>(&self, at: Instant, interval: Option<Duration>, callback: F) -> TimerId
    where
        F: FnMut(Instant) + Send + 'static,
    {
        let id = TimerId(self.shared.next_timer_id.fetch_add(1, Ordering::Relaxed));
        let cb: Box<dyn FnMut(Instant) + Send + 'static> = Box::new(callback);
        self.run_task(move |reactor| {
            reactor.timer_queue.insert(id, at, interval, cb);
        });
        id
    }

    pub fn cancel_timer(&self, id: TimerId) {
        self.run_task(move |reactor| {
            reactor.timer_queue.cancel(id);
        });
    }
}
