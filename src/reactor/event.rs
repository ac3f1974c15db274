//! Interest flags and the `poll(2)` wait set.
//!
//! `poll` is level-triggered: a descriptor keeps being reported for as long
//! as the condition holds, which is the readiness model the reactor exposes.

use crate::error::{ErrorClass, classify};

use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT, c_int, nfds_t, pollfd};
use std::io;
use std::ops::BitOr;
use std::os::fd::RawFd;
use std::time::Duration;

/// The readiness conditions a registration wants to hear about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const NONE: Interest = Interest {
        readable: false,
        writable: false,
    };
    pub const READABLE: Interest = Interest {
        readable: true,
        writable: false,
    };
    pub const WRITABLE: Interest = Interest {
        readable: false,
        writable: true,
    };
    pub const BOTH: Interest = Interest {
        readable: true,
        writable: true,
    };

    /// # Arguments
    /// * `readable` - Report the descriptor when a read would not block
    /// * `writable` - Report the descriptor when a write would not block
    pub fn new(readable: bool, writable: bool) -> Self {
        Self { readable, writable }
    }

    pub fn is_none(self) -> bool {
        !self.readable && !self.writable
    }

    pub(crate) fn as_poll_events(self) -> i16 {
        let mut events = 0;
        if self.readable {
            events |= POLLIN;
        }
        if self.writable {
            events |= POLLOUT;
        }
        events
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest {
            readable: self.readable || rhs.readable,
            writable: self.writable || rhs.writable,
        }
    }
}

/// What `poll` reported for one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Readiness {
    pub(crate) readable: bool,
    pub(crate) writable: bool,
    pub(crate) error: bool,
    pub(crate) hangup: bool,
    pub(crate) invalid: bool,
}

impl Readiness {
    fn from_revents(revents: i16) -> Self {
        Self {
            readable: revents & POLLIN != 0,
            writable: revents & POLLOUT != 0,
            error: revents & POLLERR != 0,
            hangup: revents & POLLHUP != 0,
            invalid: revents & POLLNVAL != 0,
        }
    }
}

/// A reusable array of `pollfd` entries, each tagged with the registration
/// token it was built from.
pub(crate) struct PollSet {
    fds: Vec<pollfd>,
    tokens: Vec<u64>,
}

impl PollSet {
    pub(crate) fn new() -> Self {
        Self {
            fds: Vec::new(),
            tokens: Vec::new(),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.fds.clear();
        self.tokens.clear();
    }

    pub(crate) fn push(&mut self, fd: RawFd, interest: Interest, token: u64) {
        self.fds.push(pollfd {
            fd,
            events: interest.as_poll_events(),
            revents: 0,
        });
        self.tokens.push(token);
    }

    /// Blocks until at least one descriptor is ready or `timeout` expires.
    ///
    /// `None` waits indefinitely. An interrupted wait reports zero ready
    /// descriptors instead of failing, so the caller simply loops again.
    pub(crate) fn wait(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout_ms: c_int = match timeout {
            None => -1,
            Some(duration) => duration.as_millis().min(c_int::MAX as u128) as c_int,
        };

        let res = unsafe { libc::poll(self.fds.as_mut_ptr(), self.fds.len() as nfds_t, timeout_ms) };

        if res < 0 {
            let err = io::Error::last_os_error();
            if classify(&err) == ErrorClass::Retriable {
                return Ok(0);
            }
            return Err(err);
        }

        Ok(res as usize)
    }

    /// Iterates over the entries that reported something in the last wait.
    pub(crate) fn ready(&self) -> impl Iterator<Item = (RawFd, u64, Readiness)> + '_ {
        self.fds
            .iter()
            .zip(self.tokens.iter())
            .filter(|(entry, _)| entry.revents != 0)
            .map(|(entry, token)| (entry.fd, *token, Readiness::from_revents(entry.revents)))
    }
}

/// Reads and clears the pending `SO_ERROR` of a socket.
pub(crate) fn take_socket_error(fd: RawFd) -> io::Result<Option<io::Error>> {
    let mut code: c_int = 0;
    let mut len = std::mem::size_of::<c_int>() as libc::socklen_t;

    let res = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut code as *mut c_int as *mut libc::c_void,
            &mut len,
        )
    };

    if res < 0 {
        return Err(io::Error::last_os_error());
    }

    if code == 0 {
        Ok(None)
    } else {
        Ok(Some(io::Error::from_raw_os_error(code)))
    }
}
