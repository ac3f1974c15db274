//! Accepts peers and hands each one to the reactor as an [`EchoConnection`].

use crate::builder::ServerConfig;
use crate::error::{Error, ErrorClass, Result, classify};
use crate::metrics::ServerMetrics;
use crate::net::tcp_stream::EchoConnection;
use crate::net::utils::{bind_listener, expect_v4};
use crate::reactor::core::{Handler, Reactor};
use crate::transform::Transform;

use std::io;
use std::net::{SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::rc::Rc;
use tracing::{debug, error, info, warn};

/// The listening socket and everything needed to build new connections.
pub struct Acceptor {
    listener: TcpListener,
    local_addr: SocketAddrV4,
    config: Rc<ServerConfig>,
    transform: Rc<dyn Transform>,
    metrics: ServerMetrics,
}

impl Acceptor {
    /// Binds and listens on the configured address.
    ///
    /// # Errors
    /// [`Error::Bind`] or [`Error::Listen`] when the listening socket cannot
    /// be set up; [`Error::Socket`] for failures creating or configuring it.
    pub fn listen(config: Rc<ServerConfig>, transform: Rc<dyn Transform>, metrics: ServerMetrics) -> Result<Self> {
        let requested = SocketAddrV4::new(config.address, config.port);
        let listener = bind_listener(requested, config.backlog)?;
        let local_addr = listener
            .local_addr()
            .and_then(expect_v4)
            .map_err(Error::Socket)?;

        info!(%local_addr, backlog = config.backlog, "listening");

        Ok(Self {
            listener,
            local_addr,
            config,
            transform,
            metrics,
        })
    }

    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    pub fn raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }

    fn admit(&self, stream: TcpStream, peer: SocketAddr, reactor: &mut Reactor) {
        if let Err(err) = stream.set_nonblocking(true) {
            warn!(%peer, %err, "failed to make accepted socket non-blocking");
            return;
        }

        let fd = stream.as_raw_fd();
        let connection = EchoConnection::new(
            stream,
            peer,
            &self.config,
            self.transform.clone(),
            self.metrics.clone(),
        );
        let interest = connection.initial_interest();

        match reactor.register(fd, interest, Box::new(connection)) {
            Ok(()) => {
                self.metrics.record_accept();
                info!(fd, %peer, "accepted connection");
            }
            Err(err) => error!(fd, %peer, %err, "failed to register accepted connection"),
        }
    }
}

impl Handler for Acceptor {
    /// Accepts until the listener would block.
    ///
    /// Peer-side failures (reset or aborted before we got to them) skip that
    /// peer and keep going. Anything else is logged and ends this round; the
    /// listener itself stays registered.
    fn on_readable(&mut self, _fd: RawFd, reactor: &mut Reactor) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer, reactor),
                Err(err) => match classify(&err) {
                    ErrorClass::Retriable => break,
                    ErrorClass::PeerReset | ErrorClass::PeerAbort | ErrorClass::NetworkReset => {
                        self.metrics.record_accept_error();
                        debug!(err = %Error::accept(err), "peer vanished before accept");
                    }
                    _ => {
                        self.metrics.record_accept_error();
                        error!(local_addr = %self.local_addr, err = %Error::accept(err), "accept failed");
                        break;
                    }
                },
            }
        }
    }

    fn on_writable(&mut self, _fd: RawFd, _reactor: &mut Reactor) {}

    fn on_error(&mut self, _fd: RawFd, _reactor: &mut Reactor, error: io::Error) {
        warn!(local_addr = %self.local_addr, %error, "error condition on listening socket");
    }
}
