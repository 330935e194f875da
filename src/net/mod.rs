//! Everything above the raw Reactor: sockets, addresses, the buffered
//! connection state machine, the listening Acceptor, and the `TcpServer`
//! composition that wires them together.

pub mod acceptor;
pub mod address;
pub mod buffer;
pub mod connection;
pub mod server;
pub mod socket;

pub use acceptor::Acceptor;
pub use address::Address;
pub use buffer::Buffer;
pub use connection::{ConnState, Connection, ConnectionId};
pub use server::{TcpServer, TcpServerConfig};
pub use socket::{Shutdown, Socket, SocketKind};
