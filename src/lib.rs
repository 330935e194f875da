//! A single-machine, multi-reactor TCP server runtime: one epoll (or
//! `poll(2)`) event loop per OS thread, a cross-thread task queue and
//! timer queue on each, and a buffered-I/O `Connection` state machine
//! composed into a `TcpServer` over a round-robin pool of worker
//! Reactors. Follows the "one loop per thread + thread pool" pattern.
//!
//! ```no_run
//! use reactor_core::net::{Address, TcpServerConfig, TcpServer};
//! use std::net::Ipv4Addr;
//!
//! let addr = Address::new(Ipv4Addr::new(127, 0, 0, 1), 8881);
//! let server = TcpServer::new(TcpServerConfig::new(addr).worker_count(4)).unwrap();
//!
//! server.set_message_callback(|_reactor, conn, _recv_time| {
//!     let bytes = conn.in_buf().read_all();
//!     conn.send(_reactor, &bytes);
//! });
//!
//! server.run().unwrap();
//! # server.shutdown();
//! ```

pub mod error;
pub mod net;
pub mod poller;
pub mod reactor;
pub(crate) mod sys;

pub use error::{ReactorError, Result};
