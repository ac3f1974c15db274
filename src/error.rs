//! Error taxonomy and socket error classification.
//!
//! Setup failures (`Bind`, `Listen`, `Connect`, ...) abort startup and are
//! surfaced to the caller. Per-connection failures are classified with
//! [`classify`] and only ever terminate the connection they happened on.

use std::fmt;
use std::io;
use std::net::SocketAddrV4;
use std::os::fd::RawFd;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// What a failed socket operation means for the connection it happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Would block or interrupted; try again on the next readiness event.
    Retriable,
    /// The peer reset the connection.
    PeerReset,
    /// The connection was aborted locally or by the peer's stack.
    PeerAbort,
    /// The network dropped the connection (keep-alive failure, network down).
    NetworkReset,
    /// The operation timed out. No timeouts are armed today.
    Timeout,
    /// Anything else.
    Fatal,
}

impl ErrorClass {
    pub fn is_retriable(self) -> bool {
        self == ErrorClass::Retriable
    }

    /// Every class except [`ErrorClass::Retriable`] tears the connection down.
    pub fn is_terminal(self) -> bool {
        !self.is_retriable()
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorClass::Retriable => "retriable",
            ErrorClass::PeerReset => "peer reset",
            ErrorClass::PeerAbort => "peer abort",
            ErrorClass::NetworkReset => "network reset",
            ErrorClass::Timeout => "timeout",
            ErrorClass::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// Maps an I/O error onto an [`ErrorClass`].
///
/// Classification goes through [`io::ErrorKind`] so it reads the same on every
/// platform. `ENETRESET` has no stable kind and is matched by its OS code.
pub fn classify(error: &io::Error) -> ErrorClass {
    match error.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => ErrorClass::Retriable,
        io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe => ErrorClass::PeerReset,
        io::ErrorKind::ConnectionAborted => ErrorClass::PeerAbort,
        io::ErrorKind::NetworkDown => ErrorClass::NetworkReset,
        io::ErrorKind::TimedOut => ErrorClass::Timeout,
        _ if error.raw_os_error() == Some(libc::ENETRESET) => ErrorClass::NetworkReset,
        _ => ErrorClass::Fatal,
    }
}

/// Errors produced by the server, the client and the reactor.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to create socket: {0}")]
    Socket(#[source] io::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddrV4,
        #[source]
        source: io::Error,
    },

    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: SocketAddrV4,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddrV4,
        #[source]
        source: io::Error,
    },

    #[error("accept failed ({class}): {source}")]
    Accept {
        class: ErrorClass,
        #[source]
        source: io::Error,
    },

    #[error("read failed ({class}): {source}")]
    Read {
        class: ErrorClass,
        #[source]
        source: io::Error,
    },

    #[error("write failed ({class}): {source}")]
    Write {
        class: ErrorClass,
        #[source]
        source: io::Error,
    },

    #[error("waiting for readiness failed: {0}")]
    Poll(#[source] io::Error),

    #[error("descriptor {fd} is already registered")]
    AlreadyRegistered { fd: RawFd },

    #[error("descriptor {fd} is not registered")]
    NotRegistered { fd: RawFd },
}

impl Error {
    /// Wraps a failed `accept`, classifying it on the way.
    pub fn accept(source: io::Error) -> Self {
        Error::Accept {
            class: classify(&source),
            source,
        }
    }

    pub fn read(source: io::Error) -> Self {
        Error::Read {
            class: classify(&source),
            source,
        }
    }

    pub fn write(source: io::Error) -> Self {
        Error::Write {
            class: classify(&source),
            source,
        }
    }

    /// The classification of a per-connection error, if this is one.
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            Error::Accept { class, .. } | Error::Read { class, .. } | Error::Write { class, .. } => {
                Some(*class)
            }
            _ => None,
        }
    }
}
