//! Crate-wide error type. Syscall failures wrap `io::Error` directly;
//! internal invariant violations (a Channel touched from the wrong
//! Reactor, double-init, a bad state transition) get their own variant
//! instead of a debug-only abort.

use std::fmt;

#[derive(Debug)]
pub enum ReactorError {
    Io(std::io::Error),
    /// A Channel, Connection, or task meant for one Reactor was touched
    /// from a different thread than the one that owns it.
    WrongReactor,
    /// `Reactor::run_loop` was called a second time on the same Reactor.
    AlreadyRunning,
    /// An operation required a state the object was not in (e.g.
    /// `Connection::send` while `Closed`).
    InvalidState { expected: &'static str, actual: &'static str },
    /// `TcpServer::run` called more than once.
    AlreadyStarted,
}

impl fmt::Display for ReactorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReactorError::Io(e) => write!(f, "{e}"),
            ReactorError::WrongReactor => write!(f, "operation attempted from a non-owning thread"),
            ReactorError::AlreadyRunning => write!(f, "reactor is already running"),
            ReactorError::InvalidState { expected, actual } => {
                write!(f, "expected state {expected}, found {actual}")
            }
            ReactorError::AlreadyStarted => write!(f, "server already started"),
        }
    }
}

impl std::error::Error for ReactorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReactorError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ReactorError {
    fn from(e: std::io::Error) -> ReactorError {
        ReactorError::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, ReactorError>;
