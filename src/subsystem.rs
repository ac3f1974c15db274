//! Process-wide socket subsystem scope.
//!
//! Acquired once before a reactor starts and released after it stops. On Unix
//! the only process-wide state is the `SIGPIPE` disposition: it is set to
//! ignore on first acquisition so writes to a reset peer fail with
//! `BrokenPipe` instead of terminating the process.

use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

static HOLDERS: AtomicUsize = AtomicUsize::new(0);

/// Guard for the socket subsystem; released on drop.
#[derive(Debug)]
pub struct SocketSubsystem {
    _private: (),
}

impl SocketSubsystem {
    /// Takes a reference on the subsystem, initialising it for the first
    /// holder.
    pub fn acquire() -> Self {
        if HOLDERS.fetch_add(1, Ordering::SeqCst) == 0 {
            unsafe {
                libc::signal(libc::SIGPIPE, libc::SIG_IGN);
            }
            debug!("socket subsystem initialised");
        }

        Self { _private: () }
    }

    /// Number of live guards in the process.
    pub fn holders() -> usize {
        HOLDERS.load(Ordering::SeqCst)
    }
}

impl Drop for SocketSubsystem {
    fn drop(&mut self) {
        if HOLDERS.fetch_sub(1, Ordering::SeqCst) == 1 {
            debug!("socket subsystem released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_are_counted() {
        let first = SocketSubsystem::acquire();
        let second = SocketSubsystem::acquire();
        assert!(SocketSubsystem::holders() >= 2);
        drop(second);
        drop(first);
    }
}
