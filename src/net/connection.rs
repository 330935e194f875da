//! One accepted TCP connection's state machine (`Connected -> Disconnected
//! -> Closed`), owned by a `ConnectionRegistry` living in its worker
//! Reactor's `user_data` slot and addressed by the `Send`-safe
//! `ConnectionId` rather than a shared pointer — so nothing here ever
//! needs an `Rc`, and a connection's own Channel callbacks can freely
//! call back into `channel_update`/`channel_close` by detaching the
//! `Connection` from the registry first, the same way `Reactor::dispatch`
//! detaches a `Channel` from its arena.

use std::collections::HashMap;
use std::io;
use std::time::{Duration, Instant};

use crate::poller::EventMask;
use crate::reactor::{ChannelId, Reactor, ReactorHandle};

use super::address::Address;
use super::buffer::Buffer;
use super::socket::{Shutdown, Socket};

pub const DEFAULT_HIGH_WATER_MARK: usize = 64 * 1024 * 1024;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnState {
    Connected,
    Disconnected,
    Closed,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

pub type ConnectCallback = Box<dyn FnMut(&mut Reactor, &mut Connection, bool)>;
pub type MessageCallback = Box<dyn FnMut(&mut Reactor, &mut Connection, Instant)>;
pub type WriteCompleteCallback = Box<dyn FnMut(&mut Reactor, &mut Connection)>;
pub type HighWaterMarkCallback = Box<dyn FnMut(&mut Reactor, &mut Connection, usize)>;
pub type CloseCallback = Box<dyn FnMut(&mut Reactor, &mut Connection)>;

pub struct Connection {
    name: String,
    socket: Socket,
    channel: ChannelId,
    peer_addr: Address,
    in_buf: Buffer,
    out_buf: Buffer,
    high_water_mark: usize,
    write_enabled: bool,
    state: ConnState,
    connect_cb: Option<ConnectCallback>,
    message_cb: Option<MessageCallback>,
    write_complete_cb: Option<WriteCompleteCallback>,
    high_water_mark_cb: Option<HighWaterMarkCallback>,
    close_cb: Option<CloseCallback>,
}

impl Connection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn peer_addr(&self) -> Address {
        self.peer_addr
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn in_buf(&mut self) -> &mut Buffer {
        &mut self.in_buf
    }

    pub fn out_buf(&self) -> &Buffer {
        &self.out_buf
    }

    pub fn set_connect_callback(&mut self, cb: ConnectCallback) {
        self.connect_cb = Some(cb);
    }

    pub fn set_message_callback(&mut self, cb: MessageCallback) {
        self.message_cb = Some(cb);
    }

    pub fn set_write_complete_callback(&mut self, cb: WriteCompleteCallback) {
        self.write_complete_cb = Some(cb);
    }

    pub fn set_high_water_mark_callback(&mut self, cb: HighWaterMarkCallback) {
        self.high_water_mark_cb = Some(cb);
    }

    pub fn set_close_callback(&mut self, cb: CloseCallback) {
        self.close_cb = Some(cb);
    }

    /// Writes `data` now if the output buffer is empty and the Channel
    /// isn't already waiting on Write readiness; queues whatever wasn't
    /// written (never the whole buffer again — queuing the original
    /// `data` after a successful partial direct write would duplicate the
    /// bytes already on the wire) and enables Write.
    pub fn send(&mut self, reactor: &mut Reactor, data: &[u8]) {
        use std::io::Write;

        if self.state != ConnState::Connected {
            log::warn!("{}: send() while not connected, dropping {} bytes", self.name, data.len());
            return;
        }

        let mut tail = data;
        let mut wrote_direct_ok = false;

        if self.out_buf.readable_bytes() == 0 && !self.write_enabled {
            match self.socket.write(tail) {
                Ok(n) if n == tail.len() => wrote_direct_ok = true,
                Ok(n) => tail = &tail[n..],
                Err(e) if would_block(&e) => {}
                Err(e) => {
                    // Leave teardown to the Close/Error Channel event the
                    // kernel reports for a broken socket shortly after —
                    // `self` is only borrowed here, not owned, so this
                    // function can't itself remove it from the registry.
                    log::warn!("{}: write error: {e}", self.name);
                    return;
                }
            }
        }

        if wrote_direct_ok {
            fire_write_complete(reactor, self);
            return;
        }

        let before = self.out_buf.readable_bytes();
        self.out_buf.write(tail);
        let after = self.out_buf.readable_bytes();

        if !self.write_enabled {
            self.write_enabled = true;
            let _ = reactor.channel_update(self.channel, EventMask::READ | EventMask::WRITE);
        }

        if before < self.high_water_mark && after >= self.high_water_mark {
            fire_high_water_mark(reactor, self, after);
        }
    }

    /// Half-closes the write side. If output is already fully flushed,
    /// shuts down immediately; otherwise defers until `handle_write`
    /// drains the rest, then shuts down from there.
    pub fn shutdown(&mut self) {
        if self.state != ConnState::Connected {
            return;
        }
        if self.out_buf.readable_bytes() == 0 {
            let _ = self.socket.shutdown(Shutdown::Write);
        } else {
            self.state = ConnState::Disconnected;
        }
    }

    pub fn enable_read(&mut self, reactor: &mut Reactor) {
        let mask = if self.write_enabled {
            EventMask::READ | EventMask::WRITE
        } else {
            EventMask::READ
        };
        let _ = reactor.channel_update(self.channel, mask);
    }

    pub fn disable_read(&mut self, reactor: &mut Reactor) {
        let mask = if self.write_enabled { EventMask::WRITE } else { EventMask::NONE };
        let _ = reactor.channel_update(self.channel, mask);
    }
}

fn would_block(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::Interrupted
}

fn fire_write_complete(reactor: &mut Reactor, conn: &mut Connection) {
    if let Some(mut cb) = conn.write_complete_cb.take() {
        cb(reactor, conn);
        conn.write_complete_cb = Some(cb);
    }
}

fn fire_high_water_mark(reactor: &mut Reactor, conn: &mut Connection, queued: usize) {
    if let Some(mut cb) = conn.high_water_mark_cb.take() {
        cb(reactor, conn, queued);
        conn.high_water_mark_cb = Some(cb);
    }
}

fn fire_connect(reactor: &mut Reactor, conn: &mut Connection, connected: bool) {
    if let Some(mut cb) = conn.connect_cb.take() {
        cb(reactor, conn, connected);
        conn.connect_cb = Some(cb);
    }
}

fn fire_close(reactor: &mut Reactor, conn: &mut Connection) {
    if let Some(mut cb) = conn.close_cb.take() {
        cb(reactor, conn);
        conn.close_cb = Some(cb);
    }
}

/// Registry of live connections for one Reactor, installed into its
/// `user_data` slot. `ConnectionId` is `Copy + Send`, so code on another
/// thread can hold one (paired with that worker's `ReactorHandle`)
/// without ever touching the `Connection` itself.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
    next_id: u64,
}

impl ConnectionRegistry {
    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    fn alloc_id(&mut self) -> ConnectionId {
        self.next_id += 1;
        ConnectionId(self.next_id)
    }
}

fn registry(reactor: &mut Reactor) -> &mut ConnectionRegistry {
    if reactor.user_data::<ConnectionRegistry>().is_none() {
        reactor.set_user_data(ConnectionRegistry::default());
    }
    reactor.user_data::<ConnectionRegistry>().expect("just installed")
}

/// Detaches the Connection named by `id` out of the registry, for the
/// duration of a callback that needs simultaneous `&mut Reactor` and
/// `&mut Connection` access — mirrors `Reactor::dispatch`'s Channel
/// detach, for the same reason.
fn take(reactor: &mut Reactor, id: ConnectionId) -> Option<Connection> {
    registry(reactor).connections.remove(&id)
}

fn put_back(reactor: &mut Reactor, id: ConnectionId, conn: Connection) {
    registry(reactor).connections.insert(id, conn);
}

/// Builds a `Connection` for an accepted `socket`, installs it in the
/// calling Reactor's registry, wires its Channel callbacks, and returns
/// the id. Does not yet register interest with the Poller or fire
/// `connect_cb` — call `open` for that, once on the owning worker
/// thread.
pub fn create(reactor: &mut Reactor, name: String, socket: Socket, peer_addr: Address, high_water_mark: usize) -> ConnectionId {
    let channel = reactor.open_channel(socket.fd());

    let conn = Connection {
        name,
        socket,
        channel,
        peer_addr,
        in_buf: Buffer::new(),
        out_buf: Buffer::new(),
        high_water_mark,
        write_enabled: false,
        state: ConnState::Connected,
        connect_cb: None,
        message_cb: None,
        write_complete_cb: None,
        high_water_mark_cb: None,
        close_cb: None,
    };

    let id = registry(reactor).alloc_id();
    registry(reactor).connections.insert(id, conn);

    reactor.channel_set_callback(channel, EventMask::READ, Box::new(move |r, t| handle_read(r, id, t)));
    reactor.channel_set_callback(channel, EventMask::WRITE, Box::new(move |r, t| handle_write(r, id, t)));
    reactor.channel_set_callback(channel, EventMask::CLOSE, Box::new(move |r, _t| handle_close(r, id)));
    reactor.channel_set_callback(channel, EventMask::ERROR, Box::new(move |r, _t| handle_error(r, id)));

    id
}

/// Registers the Channel for `Read` and fires `connect_cb(true)`. Must
/// run on the Reactor that owns `id`'s registry entry.
pub fn open(reactor: &mut Reactor, id: ConnectionId) {
    let mut conn = match take(reactor, id) {
        Some(c) => c,
        None => return,
    };
    let _ = reactor.channel_update(conn.channel, EventMask::READ);
    fire_connect(reactor, &mut conn, true);
    put_back(reactor, id, conn);
}

fn handle_read(reactor: &mut Reactor, id: ConnectionId, t: Instant) {
    let mut conn = match take(reactor, id) {
        Some(c) => c,
        None => return,
    };

    let result = conn.in_buf.read_from(&mut conn.socket);
    match result {
        Ok(0) => close_detached(reactor, conn),
        Ok(_) => {
            if let Some(mut cb) = conn.message_cb.take() {
                cb(reactor, &mut conn, t);
                conn.message_cb = Some(cb);
            }
            put_back(reactor, id, conn);
        }
        Err(e) if would_block(&e) => put_back(reactor, id, conn),
        Err(e) => {
            log::warn!("{}: read error: {e}", conn.name);
            close_detached(reactor, conn);
        }
    }
}

fn handle_write(reactor: &mut Reactor, id: ConnectionId, _t: Instant) {
    use std::io::Write;

    let mut conn = match take(reactor, id) {
        Some(c) => c,
        None => return,
    };

    if !conn.write_enabled {
        put_back(reactor, id, conn);
        return;
    }

    let write_result = conn.socket.write(conn.out_buf.peek());
    let result = write_result.map(|n| conn.out_buf.discard(n));

    match result {
        Ok(()) => {
            if conn.out_buf.readable_bytes() == 0 {
                conn.write_enabled = false;
                let _ = reactor.channel_update(conn.channel, EventMask::READ);
                fire_write_complete(reactor, &mut conn);
                if conn.state == ConnState::Disconnected {
                    let _ = conn.socket.shutdown(Shutdown::Write);
                }
            }
            put_back(reactor, id, conn);
        }
        Err(e) if would_block(&e) => put_back(reactor, id, conn),
        Err(e) => {
            log::warn!("{}: write error: {e}", conn.name);
            close_detached(reactor, conn);
        }
    }
}

fn handle_close(reactor: &mut Reactor, id: ConnectionId) {
    if let Some(conn) = take(reactor, id) {
        close_detached(reactor, conn);
    }
}

fn handle_error(reactor: &mut Reactor, id: ConnectionId) {
    let conn = match take(reactor, id) {
        Some(c) => c,
        None => return,
    };
    if let Ok(Some(e)) = conn.socket.take_error() {
        log::warn!("{}: socket error: {e}", conn.name);
    }
    close_detached(reactor, conn);
}

/// Finishes tearing down a detached `Connection`: deregisters its
/// Channel, transitions to `Closed`, fires `connect_cb(false)` then
/// `close_cb`, and drops it rather than putting it back in the registry.
/// The caller has already removed `conn` from the registry, so a stale
/// second event for the same Channel finds nothing left to take and
/// never re-enters here.
fn close_detached(reactor: &mut Reactor, mut conn: Connection) {
    conn.state = ConnState::Closed;
    let _ = reactor.channel_close(conn.channel);
    fire_connect(reactor, &mut conn, false);
    fire_close(reactor, &mut conn);
}

/// Detaches the connection named by `id`, runs `f` against it with
/// simultaneous `&mut Reactor` access, and puts it back. Used by the net
/// layer to wire per-connection callbacks right after `create`.
pub(crate) fn with_connection<R>(
    reactor: &mut Reactor,
    id: ConnectionId,
    f: impl FnOnce(&mut Reactor, &mut Connection) -> R,
) -> Option<R> {
    let mut conn = take(reactor, id)?;
    let result = f(reactor, &mut conn);
    put_back(reactor, id, conn);
    Some(result)
}

/// Requests that the connection named by `id` close, optionally after
/// `delay`. Safe to call from any thread via `reactor_handle`; the
/// actual teardown always runs on the owning worker thread.
pub fn close(reactor_handle: &ReactorHandle, id: ConnectionId, delay: Duration) {
    if delay.is_zero() {
        reactor_handle.run_task(move |reactor| handle_close(reactor, id));
    } else {
        let handle = reactor_handle.clone();
        reactor_handle.add_timer_after(delay, move |_t: Instant| {
            handle.run_task(move |reactor| handle_close(reactor, id));
        });
    }
}
