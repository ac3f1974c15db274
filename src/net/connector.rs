//! Outbound side: one connection that sends request lines and collects the
//! replies, driven by the same reactor and [`ConnectionState`] as the server.

use crate::error::Error;
use crate::reactor::core::{Handler, Reactor};
use crate::reactor::event::{Interest, take_socket_error};
use crate::reactor::io::{ConnectionState, ReadOutcome, WriteOutcome};
use crate::transform::Transform;

use std::cell::RefCell;
use std::io;
use std::net::{SocketAddrV4, TcpStream};
use std::os::fd::RawFd;
use std::rc::Rc;
use tracing::{debug, info, trace};

/// Replies and the first failure, shared with whoever started the exchange.
#[derive(Default)]
pub struct Exchange {
    pub replies: Vec<Vec<u8>>,
    pub failure: Option<Error>,
}

/// Client-side handler for one outbound connection.
///
/// Stays write-interested until the non-blocking connect resolves, then
/// follows the interest of its [`ConnectionState`]. The registration is
/// dropped once `expected` replies arrived, the peer closed, or an error
/// was recorded in the shared [`Exchange`].
pub struct Connector {
    stream: TcpStream,
    peer: SocketAddrV4,
    connected: bool,
    state: ConnectionState,
    transform: Rc<dyn Transform>,
    expected: usize,
    registered: Interest,
    exchange: Rc<RefCell<Exchange>>,
}

impl Connector {
    /// # Arguments
    /// * `stream` - A non-blocking stream with a connect in flight (or done)
    /// * `connected` - Whether the connect already completed
    /// * `state` - Buffers with the request lines already queued
    /// * `expected` - Number of reply lines to wait for
    pub fn new(
        stream: TcpStream,
        peer: SocketAddrV4,
        connected: bool,
        state: ConnectionState,
        transform: Rc<dyn Transform>,
        expected: usize,
        exchange: Rc<RefCell<Exchange>>,
    ) -> Self {
        let mut connector = Self {
            stream,
            peer,
            connected,
            state,
            transform,
            expected,
            registered: Interest::NONE,
            exchange,
        };
        connector.registered = connector.wanted();
        connector
    }

    /// Interest to register with: writable while the connect is pending.
    pub fn initial_interest(&self) -> Interest {
        self.registered
    }

    fn wanted(&self) -> Interest {
        if self.connected {
            self.state.interest()
        } else {
            Interest::WRITABLE
        }
    }

    fn done(&self) -> bool {
        self.exchange.borrow().replies.len() >= self.expected
    }

    /// Resolves a pending connect. Returns false if the connection is gone.
    fn ensure_connected(&mut self, fd: RawFd, reactor: &mut Reactor) -> bool {
        if self.connected {
            return true;
        }

        match take_socket_error(fd) {
            Ok(None) => {
                self.connected = true;
                info!(fd, peer = %self.peer, "connected");
                true
            }
            Ok(Some(source)) | Err(source) => {
                self.fail(
                    fd,
                    reactor,
                    Error::Connect {
                        addr: self.peer,
                        source,
                    },
                );
                false
            }
        }
    }

    fn collect(&mut self) {
        let mut exchange = self.exchange.borrow_mut();
        for line in self.state.take_lines() {
            trace!(len = line.len(), "reply");
            exchange.replies.push(line);
        }
    }

    fn sync_interest(&mut self, fd: RawFd, reactor: &mut Reactor) {
        let wanted = self.wanted();
        if wanted != self.registered && reactor.set_interest(fd, wanted).is_ok() {
            self.registered = wanted;
        }
    }

    fn finish(&mut self, fd: RawFd, reactor: &mut Reactor) {
        debug!(fd, replies = self.exchange.borrow().replies.len(), "exchange finished");
        reactor.unregister(fd);
    }

    fn fail(&mut self, fd: RawFd, reactor: &mut Reactor, error: Error) {
        info!(fd, peer = %self.peer, %error, "connection failed");
        self.exchange.borrow_mut().failure.get_or_insert(error);
        reactor.unregister(fd);
    }
}

impl Handler for Connector {
    fn on_readable(&mut self, fd: RawFd, reactor: &mut Reactor) {
        if !self.ensure_connected(fd, reactor) {
            return;
        }

        match self.state.read_from(&mut self.stream, &*self.transform) {
            ReadOutcome::Open(_) => {
                self.collect();
                if self.done() {
                    self.finish(fd, reactor);
                    return;
                }
            }
            ReadOutcome::Closed(_) => {
                self.collect();
                self.finish(fd, reactor);
                return;
            }
            ReadOutcome::Failed(err) => {
                self.fail(fd, reactor, err);
                return;
            }
        }

        self.sync_interest(fd, reactor);
    }

    fn on_writable(&mut self, fd: RawFd, reactor: &mut Reactor) {
        if !self.ensure_connected(fd, reactor) {
            return;
        }

        if self.done() {
            self.finish(fd, reactor);
            return;
        }

        if let WriteOutcome::Failed(err) = self.state.write_to(&mut self.stream) {
            self.fail(fd, reactor, err);
            return;
        }

        self.sync_interest(fd, reactor);
    }

    fn on_error(&mut self, fd: RawFd, reactor: &mut Reactor, error: io::Error) {
        let error = if self.connected {
            Error::read(error)
        } else {
            Error::Connect {
                addr: self.peer,
                source: error,
            }
        };
        self.fail(fd, reactor, error);
    }
}
