use crate::error::{Error, Result, classify};
use crate::reactor::event::{Interest, PollSet, Readiness, take_socket_error};

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Callbacks invoked by the [`Reactor`] when a registered descriptor is ready.
///
/// Every callback runs on the reactor thread and receives the descriptor it
/// was registered under plus the reactor itself, so it can adjust its own
/// interest, unregister itself, or register new descriptors. Readiness is
/// level-triggered: a callback that neither drains the available work nor
/// drops the matching interest will be called again on the next turn.
pub trait Handler {
    fn on_readable(&mut self, fd: RawFd, reactor: &mut Reactor);

    fn on_writable(&mut self, fd: RawFd, reactor: &mut Reactor);

    /// Called when the OS reports an error condition on the descriptor.
    ///
    /// The default drops the registration, which closes the socket.
    fn on_error(&mut self, fd: RawFd, reactor: &mut Reactor, error: io::Error) {
        warn!(fd, %error, "dropping registration after socket error");
        reactor.unregister(fd);
    }
}

struct Entry {
    token: u64,
    interest: Interest,
    // `None` while the handler is being dispatched.
    handler: Option<Box<dyn Handler>>,
}

struct Shared {
    stop: AtomicBool,
    wake: UnixStream,
}

/// Stops a running [`Reactor`] from any thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    shared: Arc<Shared>,
}

impl ShutdownHandle {
    /// Asks the reactor to stop and wakes it if it is blocked waiting.
    ///
    /// Every registration is dropped when the reactor stops, closing all
    /// sockets it owns.
    pub fn shutdown(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        // A full socket buffer already holds a pending wake.
        let _ = (&self.shared.wake).write(&[1]);
    }

    /// Whether [`shutdown`](Self::shutdown) was called on any clone.
    pub fn is_shutdown(&self) -> bool {
        self.shared.stop.load(Ordering::SeqCst)
    }
}

const WAKE_TOKEN: u64 = 0;

/// A single-threaded, level-triggered readiness loop over `poll(2)`.
///
/// The reactor owns every registered [`Handler`]; dropping a registration
/// drops the handler and with it whatever socket it owns, so each
/// registration is torn down exactly once.
pub struct Reactor {
    registry: HashMap<RawFd, Entry>,
    poll_set: PollSet,
    ready: Vec<(RawFd, u64, Readiness)>,
    next_token: u64,
    stopped: bool,
    shared: Arc<Shared>,
    wake_rx: UnixStream,
}

impl Reactor {
    /// Creates a reactor with no registrations.
    ///
    /// # Errors
    /// Fails with [`Error::Socket`] if the internal wake-up socket pair cannot
    /// be created.
    pub fn new() -> Result<Self> {
        let (wake_rx, wake_tx) = UnixStream::pair().map_err(Error::Socket)?;
        wake_rx.set_nonblocking(true).map_err(Error::Socket)?;
        wake_tx.set_nonblocking(true).map_err(Error::Socket)?;

        Ok(Self {
            registry: HashMap::new(),
            poll_set: PollSet::new(),
            ready: Vec::new(),
            next_token: WAKE_TOKEN + 1,
            stopped: false,
            shared: Arc::new(Shared {
                stop: AtomicBool::new(false),
                wake: wake_tx,
            }),
            wake_rx,
        })
    }

    /// Registers `fd` with the given interest and callbacks.
    ///
    /// # Errors
    /// Fails with [`Error::AlreadyRegistered`] if `fd` already has a
    /// registration; the handler is dropped in that case.
    pub fn register(&mut self, fd: RawFd, interest: Interest, handler: Box<dyn Handler>) -> Result<()> {
        if self.registry.contains_key(&fd) {
            return Err(Error::AlreadyRegistered { fd });
        }

        let token = self.next_token;
        self.next_token += 1;

        trace!(fd, token, ?interest, "registered");
        self.registry.insert(
            fd,
            Entry {
                token,
                interest,
                handler: Some(handler),
            },
        );

        Ok(())
    }

    /// Replaces the interest of an existing registration.
    ///
    /// # Errors
    /// Fails with [`Error::NotRegistered`] if `fd` is unknown.
    pub fn set_interest(&mut self, fd: RawFd, interest: Interest) -> Result<()> {
        let entry = self.registry.get_mut(&fd).ok_or(Error::NotRegistered { fd })?;

        if entry.interest != interest {
            trace!(fd, ?interest, "interest changed");
            entry.interest = interest;
        }

        Ok(())
    }

    /// Current interest of `fd`, if registered.
    pub fn interest(&self, fd: RawFd) -> Option<Interest> {
        self.registry.get(&fd).map(|entry| entry.interest)
    }

    /// Removes the registration of `fd`.
    ///
    /// Returns the handler so the caller decides when it is dropped. A handler
    /// that unregisters itself from inside one of its callbacks gets `None`
    /// back; the reactor drops it as soon as the callback returns.
    pub fn unregister(&mut self, fd: RawFd) -> Option<Box<dyn Handler>> {
        let entry = self.registry.remove(&fd)?;
        trace!(fd, token = entry.token, "unregistered");
        entry.handler
    }

    /// Whether `fd` currently has a registration.
    ///
    /// # Arguments
    /// * `fd` - The descriptor to look up
    ///
    /// # Returns
    /// `true` while the registration exists, including while one of its own
    /// callbacks is running.
    pub fn contains(&self, fd: RawFd) -> bool {
        self.registry.contains_key(&fd)
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Makes [`run`](Self::run) return after the current turn.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Returns a `Send` handle that stops [`run`](Self::run) from any thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shared: self.shared.clone(),
        }
    }

    /// Drops every registration, closing the sockets the handlers own.
    pub fn clear(&mut self) {
        let count = self.registry.len();
        self.registry.clear();
        if count > 0 {
            debug!(count, "dropped all registrations");
        }
    }

    /// Dispatches readiness until stopped or nothing is registered.
    ///
    /// A stop requested through [`stop`](Self::stop) or a [`ShutdownHandle`]
    /// drops all remaining registrations before returning.
    ///
    /// # Errors
    /// Fails with [`Error::Poll`] if waiting for readiness fails for a reason
    /// other than an interrupted call.
    pub fn run(&mut self) -> Result<()> {
        self.stopped = false;
        info!(registrations = self.registry.len(), "reactor running");

        while !self.stopped && !self.shared.stop.load(Ordering::SeqCst) && !self.registry.is_empty() {
            self.turn(None)?;
        }

        if self.stopped || self.shared.stop.load(Ordering::SeqCst) {
            self.clear();
        }

        info!("reactor stopped");
        Ok(())
    }

    /// Waits once for readiness and dispatches every ready descriptor.
    ///
    /// Returns the number of descriptors that were ready; zero means the wait
    /// timed out, was interrupted, or only carried a wake-up.
    ///
    /// # Arguments
    /// * `timeout` - How long to wait; `None` blocks until something is ready
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<usize> {
        self.poll_set.clear();
        self.poll_set.push(self.wake_rx.as_raw_fd(), Interest::READABLE, WAKE_TOKEN);

        for (&fd, entry) in &self.registry {
            if !entry.interest.is_none() {
                self.poll_set.push(fd, entry.interest, entry.token);
            }
        }

        let n = self.poll_set.wait(timeout).map_err(Error::Poll)?;
        if n == 0 {
            return Ok(0);
        }

        let mut ready = std::mem::take(&mut self.ready);
        ready.clear();
        ready.extend(self.poll_set.ready());

        let mut dispatched = 0;
        for &(fd, token, readiness) in &ready {
            if token == WAKE_TOKEN {
                self.drain_wake();
                continue;
            }
            self.dispatch(fd, token, readiness);
            dispatched += 1;
        }

        self.ready = ready;
        Ok(dispatched)
    }

    fn drain_wake(&mut self) {
        let mut buf = [0u8; 64];
        loop {
            match self.wake_rx.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }

        if self.shared.stop.load(Ordering::SeqCst) {
            debug!("shutdown requested");
            self.stopped = true;
        }
    }

    fn dispatch(&mut self, fd: RawFd, token: u64, readiness: Readiness) {
        if readiness.invalid {
            if self.owns(fd, token) {
                warn!(fd, "descriptor is no longer valid");
                self.registry.remove(&fd);
            }
            return;
        }

        if readiness.error {
            let error = match take_socket_error(fd) {
                Ok(Some(error)) => Some(error),
                Ok(None) => None,
                Err(error) => Some(error),
            };

            if let Some(error) = error {
                trace!(fd, %error, class = %classify(&error), "error readiness");
                self.call(fd, token, |handler, fd, reactor| handler.on_error(fd, reactor, error));
                return;
            }
        }

        if readiness.readable || readiness.hangup || readiness.error {
            self.call(fd, token, |handler, fd, reactor| handler.on_readable(fd, reactor));
        }

        if readiness.writable && self.wants(fd, token, Interest::WRITABLE) {
            self.call(fd, token, |handler, fd, reactor| handler.on_writable(fd, reactor));
        }
    }

    fn owns(&self, fd: RawFd, token: u64) -> bool {
        matches!(self.registry.get(&fd), Some(entry) if entry.token == token)
    }

    fn wants(&self, fd: RawFd, token: u64, interest: Interest) -> bool {
        match self.registry.get(&fd) {
            Some(entry) if entry.token == token => {
                (interest.readable && entry.interest.readable)
                    || (interest.writable && entry.interest.writable)
            }
            _ => false,
        }
    }

    /// Takes the handler out of its slot, runs `f`, and puts it back unless
    /// the registration went away meanwhile.
    fn call<F>(&mut self, fd: RawFd, token: u64, f: F)
    where
        F: FnOnce(&mut dyn Handler, RawFd, &mut Reactor),
    {
        let mut handler = match self.registry.get_mut(&fd) {
            Some(entry) if entry.token == token => match entry.handler.take() {
                Some(handler) => handler,
                None => return,
            },
            _ => return,
        };

        f(handler.as_mut(), fd, self);

        match self.registry.get_mut(&fd) {
            Some(entry) if entry.token == token => entry.handler = Some(handler),
            _ => drop(handler),
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Log {
        reads: Vec<Vec<u8>>,
        writes: usize,
        errors: usize,
        dropped: bool,
    }

    struct Recorder {
        stream: UnixStream,
        log: Rc<RefCell<Log>>,
        close_on_read: bool,
    }

    impl Drop for Recorder {
        fn drop(&mut self) {
            self.log.borrow_mut().dropped = true;
        }
    }

    impl Handler for Recorder {
        fn on_readable(&mut self, fd: RawFd, reactor: &mut Reactor) {
            let mut buf = [0u8; 32];
            match self.stream.read(&mut buf) {
                Ok(n) => self.log.borrow_mut().reads.push(buf[..n].to_vec()),
                Err(err) if classify(&err).is_retriable() => return,
                Err(_) => {}
            }
            if self.close_on_read {
                reactor.unregister(fd);
            }
        }

        fn on_writable(&mut self, fd: RawFd, reactor: &mut Reactor) {
            self.log.borrow_mut().writes += 1;
            reactor.set_interest(fd, Interest::READABLE).unwrap();
        }

        fn on_error(&mut self, fd: RawFd, reactor: &mut Reactor, _error: io::Error) {
            self.log.borrow_mut().errors += 1;
            reactor.unregister(fd);
        }
    }

    fn recorder(close_on_read: bool) -> (RawFd, Box<Recorder>, UnixStream, Rc<RefCell<Log>>) {
        let (ours, theirs) = UnixStream::pair().unwrap();
        ours.set_nonblocking(true).unwrap();
        let log = Rc::new(RefCell::new(Log::default()));
        let fd = ours.as_raw_fd();
        let handler = Box::new(Recorder {
            stream: ours,
            log: log.clone(),
            close_on_read,
        });
        (fd, handler, theirs, log)
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut reactor = Reactor::new().unwrap();
        let (fd, handler, _peer, _log) = recorder(false);
        reactor.register(fd, Interest::READABLE, handler).unwrap();

        let (_, other, _peer2, other_log) = recorder(false);
        let err = reactor.register(fd, Interest::READABLE, other).unwrap_err();
        assert!(matches!(err, Error::AlreadyRegistered { .. }));
        assert!(other_log.borrow().dropped);
        assert_eq!(reactor.len(), 1);
    }

    #[test]
    fn readable_callback_fires_and_handler_can_unregister_itself() {
        let mut reactor = Reactor::new().unwrap();
        let (fd, handler, mut peer, log) = recorder(true);
        reactor.register(fd, Interest::READABLE, handler).unwrap();

        peer.write_all(b"ping").unwrap();
        reactor.run().unwrap();

        let log = log.borrow();
        assert_eq!(log.reads, vec![b"ping".to_vec()]);
        assert!(log.dropped);
        assert!(reactor.is_empty());
    }

    #[test]
    fn writable_fires_while_interest_is_set() {
        let mut reactor = Reactor::new().unwrap();
        let (fd, handler, _peer, log) = recorder(false);
        reactor.register(fd, Interest::BOTH, handler).unwrap();

        reactor.turn(Some(Duration::from_millis(100))).unwrap();
        assert_eq!(log.borrow().writes, 1);
        assert_eq!(reactor.interest(fd), Some(Interest::READABLE));

        assert_eq!(reactor.turn(Some(Duration::from_millis(20))).unwrap(), 0);
        assert_eq!(log.borrow().writes, 1);
    }

    #[test]
    fn level_triggered_readiness_repeats_until_drained() {
        struct Lazy {
            _stream: UnixStream,
            calls: Rc<RefCell<usize>>,
        }

        impl Handler for Lazy {
            fn on_readable(&mut self, _fd: RawFd, _reactor: &mut Reactor) {
                *self.calls.borrow_mut() += 1;
            }

            fn on_writable(&mut self, _fd: RawFd, _reactor: &mut Reactor) {}
        }

        let (ours, mut theirs) = UnixStream::pair().unwrap();
        let fd = ours.as_raw_fd();
        let calls = Rc::new(RefCell::new(0));
        let mut reactor = Reactor::new().unwrap();
        reactor
            .register(fd, Interest::READABLE, Box::new(Lazy { _stream: ours, calls: calls.clone() }))
            .unwrap();

        theirs.write_all(b"x").unwrap();
        for _ in 0..3 {
            reactor.turn(Some(Duration::from_millis(100))).unwrap();
        }
        assert_eq!(*calls.borrow(), 3);
    }

    #[test]
    fn shutdown_handle_stops_run_and_drops_handlers() {
        let mut reactor = Reactor::new().unwrap();
        let (fd, handler, _peer, log) = recorder(false);
        reactor.register(fd, Interest::READABLE, handler).unwrap();

        let handle = reactor.shutdown_handle();
        let waker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            handle.shutdown();
        });

        reactor.run().unwrap();
        waker.join().unwrap();

        assert!(log.borrow().dropped);
        assert!(reactor.is_empty());
    }

    #[test]
    fn interest_changes_require_a_registration() {
        let mut reactor = Reactor::new().unwrap();
        assert!(matches!(
            reactor.set_interest(1234, Interest::READABLE),
            Err(Error::NotRegistered { fd: 1234 })
        ));
        assert!(reactor.unregister(1234).is_none());
    }
}
