//! The line-transform server: one reactor, one acceptor, many connections.

use crate::builder::ServerConfig;
use crate::error::Result;
use crate::metrics::ServerMetrics;
use crate::net::tcp_listener::Acceptor;
use crate::reactor::core::{Reactor, ShutdownHandle};
use crate::reactor::event::Interest;
use crate::subsystem::SocketSubsystem;
use crate::transform::Transform;

use std::net::SocketAddrV4;
use std::rc::Rc;
use std::time::Duration;
use tracing::info;

/// A bound server, ready to run on the current thread.
///
/// Built through [`ServerBuilder`](crate::ServerBuilder). Not `Send`: create
/// it on the thread that will call [`run`](Self::run) and use a
/// [`ShutdownHandle`] to stop it from elsewhere.
pub struct Server {
    reactor: Reactor,
    local_addr: SocketAddrV4,
    metrics: ServerMetrics,
    // Released after the reactor has dropped every socket.
    _subsystem: SocketSubsystem,
}

impl Server {
    pub(crate) fn bind(config: ServerConfig, transform: Rc<dyn Transform>, metrics: ServerMetrics) -> Result<Self> {
        let subsystem = SocketSubsystem::acquire();
        let mut reactor = Reactor::new()?;

        let acceptor = Acceptor::listen(Rc::new(config), transform, metrics.clone())?;
        let local_addr = acceptor.local_addr();
        reactor.register(acceptor.raw_fd(), Interest::READABLE, Box::new(acceptor))?;

        Ok(Self {
            reactor,
            local_addr,
            metrics,
            _subsystem: subsystem,
        })
    }

    /// The address actually bound, with the ephemeral port resolved.
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    /// Counters shared with every connection of this server.
    pub fn metrics(&self) -> &ServerMetrics {
        &self.metrics
    }

    /// # Returns
    /// A handle that makes [`run`](Self::run) return from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.reactor.shutdown_handle()
    }

    /// Live registrations, the listener included.
    pub fn registrations(&self) -> usize {
        self.reactor.len()
    }

    /// Serves until shut down through a [`ShutdownHandle`].
    ///
    /// # Errors
    /// Fails only if waiting for readiness fails; per-connection errors never
    /// reach the caller.
    pub fn run(&mut self) -> Result<()> {
        info!(local_addr = %self.local_addr, "server running");
        self.reactor.run()
    }

    /// Runs a single reactor turn; mostly useful in tests.
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<usize> {
        self.reactor.turn(timeout)
    }
}
