//! The client dual: a single outbound connection on its own reactor.

use crate::builder::ClientConfig;
use crate::error::Result;
use crate::net::connector::{Connector, Exchange};
use crate::net::utils::connect_nonblocking;
use crate::reactor::core::Reactor;
use crate::reactor::io::{ConnectionState, LineRoute};
use crate::subsystem::SocketSubsystem;
use crate::transform::Transform;

use std::cell::RefCell;
use std::net::SocketAddrV4;
use std::os::fd::AsRawFd;
use std::rc::Rc;
use tracing::debug;

/// Handle produced by [`ClientBuilder`](crate::ClientBuilder).
///
/// Holds no socket: every [`exchange`](Self::exchange) opens its own
/// connection and reactor and closes both before returning.
pub struct Client {
    config: ClientConfig,
    transform: Rc<dyn Transform>,
}

impl Client {
    pub(crate) fn new(config: ClientConfig, transform: Rc<dyn Transform>) -> Self {
        Self { config, transform }
    }

    /// Address every exchange connects to.
    pub fn server_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.config.address, self.config.port)
    }

    /// Sends every line and waits for the reply lines they produce.
    ///
    /// A missing trailing delimiter is appended to each line. Every delimiter
    /// in the request yields one reply, and so does every `max_line` bytes
    /// without one, assuming the server was configured with the same
    /// `max_line`. Replies keep their delimiter and pass through the client's
    /// transform. If the server closes early, the replies received so far are
    /// returned.
    ///
    /// # Errors
    /// [`Error::Connect`](crate::Error::Connect) if the connection cannot be
    /// established, or the read/write error that ended the exchange.
    ///
    /// # Example
    /// ```ignore
    /// let replies = ClientBuilder::new().port(40713).build().exchange(["Hello"])?;
    /// assert_eq!(replies, vec![b"Uryyb\n".to_vec()]);
    /// ```
    pub fn exchange<I, L>(&self, lines: I) -> Result<Vec<Vec<u8>>>
    where
        I: IntoIterator<Item = L>,
        L: AsRef<[u8]>,
    {
        let _subsystem = SocketSubsystem::acquire();
        let delimiter = self.config.delimiter;
        // Replies carry at most `max_line` bytes before their delimiter.
        let mut state = ConnectionState::new(
            self.config.max_line.saturating_add(1),
            delimiter,
            self.config.read_chunk,
            LineRoute::Collect,
        );

        let mut request = Vec::new();
        for line in lines {
            let line = line.as_ref();
            request.extend_from_slice(line);
            if line.last() != Some(&delimiter) {
                request.push(delimiter);
            }
        }

        let expected = expected_replies(&request, delimiter, self.config.max_line);
        if expected == 0 {
            return Ok(Vec::new());
        }

        state.queue(&request);

        let peer = self.server_addr();
        let (stream, connected) = connect_nonblocking(peer)?;
        debug!(%peer, connected, lines = expected, "starting exchange");

        let exchange = Rc::new(RefCell::new(Exchange::default()));
        let fd = stream.as_raw_fd();
        let connector = Connector::new(
            stream,
            peer,
            connected,
            state,
            self.transform.clone(),
            expected,
            exchange.clone(),
        );
        let interest = connector.initial_interest();

        let mut reactor = Reactor::new()?;
        reactor.register(fd, interest, Box::new(connector))?;
        reactor.run()?;

        let Exchange { replies, failure } = exchange.take();
        match failure {
            Some(error) => Err(error),
            None => Ok(replies),
        }
    }
}

/// Counts the lines a server sends back for `request`: one per delimiter and
/// one per forced flush at `max_line` bytes.
fn expected_replies(request: &[u8], delimiter: u8, max_line: usize) -> usize {
    let max_line = max_line.max(1);
    let mut replies = 0;
    let mut run = 0;

    for &byte in request {
        if byte == delimiter {
            replies += 1;
            run = 0;
            continue;
        }

        run += 1;
        if run >= max_line {
            replies += 1;
            run = 0;
        }
    }

    replies
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_reply_per_delimiter() {
        assert_eq!(expected_replies(b"", b'\n', 16), 0);
        assert_eq!(expected_replies(b"Hello\n", b'\n', 16), 1);
        assert_eq!(expected_replies(b"a\nb\n\n", b'\n', 16), 3);
    }

    #[test]
    fn long_lines_count_their_forced_flushes() {
        assert_eq!(expected_replies(b"abcdefghij\n", b'\n', 8), 2);
        // Exactly at the watermark: the flush, then an empty line.
        assert_eq!(expected_replies(b"abcdefgh\n", b'\n', 8), 2);
        assert_eq!(expected_replies(b"abcdefg\n", b'\n', 8), 1);
        assert_eq!(expected_replies(&[b'x'; 24], b'\n', 8), 3);
    }
}
