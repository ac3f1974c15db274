//! Server-side connection handler: transform every line and echo it back.

use crate::builder::ServerConfig;
use crate::error::Error;
use crate::metrics::ServerMetrics;
use crate::reactor::core::{Handler, Reactor};
use crate::reactor::event::Interest;
use crate::reactor::io::{ConnectionState, LineRoute, ReadOutcome, WriteOutcome};
use crate::transform::Transform;

use std::io;
use std::net::{SocketAddr, TcpStream};
use std::os::fd::RawFd;
use std::rc::Rc;
use tracing::{debug, info, trace, warn};

/// One accepted peer: its socket, its buffers and the interest currently
/// registered for it.
pub struct EchoConnection {
    stream: TcpStream,
    peer: SocketAddr,
    state: ConnectionState,
    transform: Rc<dyn Transform>,
    registered: Interest,
    metrics: ServerMetrics,
}

impl EchoConnection {
    /// Wraps an accepted, already non-blocking stream.
    ///
    /// The connection starts out registered for reads only; write interest is
    /// added once output is queued.
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        config: &ServerConfig,
        transform: Rc<dyn Transform>,
        metrics: ServerMetrics,
    ) -> Self {
        metrics.record_open();
        Self {
            stream,
            peer,
            state: ConnectionState::new(config.max_line, config.delimiter, config.read_chunk, LineRoute::Echo),
            transform,
            registered: Interest::READABLE,
            metrics,
        }
    }

    pub fn initial_interest(&self) -> Interest {
        self.registered
    }

    fn sync_interest(&mut self, fd: RawFd, reactor: &mut Reactor) {
        let wanted = self.state.interest();
        if wanted == self.registered {
            return;
        }

        match reactor.set_interest(fd, wanted) {
            Ok(()) => self.registered = wanted,
            Err(err) => warn!(fd, peer = %self.peer, %err, "failed to update interest"),
        }
    }

    fn flush(&mut self, fd: RawFd, reactor: &mut Reactor) {
        match self.state.write_to(&mut self.stream) {
            WriteOutcome::Idle => {}
            WriteOutcome::Drained(n) | WriteOutcome::Pending(n) => {
                trace!(fd, len = n, "wrote");
                self.metrics.record_write(n);
            }
            WriteOutcome::Failed(err) => {
                self.teardown(fd, reactor, Some(err));
                return;
            }
        }
        self.sync_interest(fd, reactor);
    }

    /// Drops the registration; the reactor releases the socket once this
    /// callback returns.
    fn teardown(&mut self, fd: RawFd, reactor: &mut Reactor, error: Option<Error>) {
        reactor.unregister(fd);
        self.metrics.record_close(error.is_none());

        match error {
            None => info!(fd, peer = %self.peer, "connection closed by peer"),
            Some(err) => info!(fd, peer = %self.peer, %err, "connection dropped"),
        }
    }
}

impl Drop for EchoConnection {
    fn drop(&mut self) {
        self.metrics.record_release();
    }
}

impl Handler for EchoConnection {
    fn on_readable(&mut self, fd: RawFd, reactor: &mut Reactor) {
        match self.state.read_from(&mut self.stream, &*self.transform) {
            ReadOutcome::Open(report) => {
                self.metrics.record_read(report);
                if report.forced_flushes > 0 {
                    debug!(fd, peer = %self.peer, count = report.forced_flushes, "line exceeded watermark");
                }
                self.sync_interest(fd, reactor);
            }
            ReadOutcome::Closed(report) => {
                self.metrics.record_read(report);
                // Best effort: whatever the socket does not take now is dropped.
                if let WriteOutcome::Drained(n) | WriteOutcome::Pending(n) = self.state.write_to(&mut self.stream) {
                    self.metrics.record_write(n);
                }
                self.teardown(fd, reactor, None);
            }
            ReadOutcome::Failed(err) => self.teardown(fd, reactor, Some(err)),
        }
    }

    fn on_writable(&mut self, fd: RawFd, reactor: &mut Reactor) {
        self.flush(fd, reactor);
    }

    fn on_error(&mut self, fd: RawFd, reactor: &mut Reactor, error: io::Error) {
        self.teardown(fd, reactor, Some(Error::read(error)));
    }
}
