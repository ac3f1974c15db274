//! Configuration and fluent builders for [`Server`] and [`Client`].
//!
//! Every knob has the reference default, so `ServerBuilder::new().build()`
//! yields a server on `127.0.0.1:40713` that applies [`Rot13`].

use crate::client::Client;
use crate::error::Result;
use crate::metrics::ServerMetrics;
use crate::server::Server;
use crate::transform::{Identity, Rot13, Transform};

use std::net::Ipv4Addr;
use std::rc::Rc;

pub const DEFAULT_ADDRESS: Ipv4Addr = Ipv4Addr::LOCALHOST;
pub const DEFAULT_PORT: u16 = 40713;
pub const DEFAULT_BACKLOG: i32 = 16;
pub const DEFAULT_MAX_LINE: usize = 16384;
pub const DEFAULT_DELIMITER: u8 = b'\n';
pub const DEFAULT_READ_CHUNK: usize = 1024;

/// Settings injected into the server at construction time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub address: Ipv4Addr,
    /// Port to listen on; 0 picks an ephemeral port.
    pub port: u16,
    pub backlog: i32,
    /// High watermark: bytes buffered without a delimiter before a forced flush.
    pub max_line: usize,
    pub delimiter: u8,
    /// Size of the scratch buffer used per receive call.
    pub read_chunk: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            port: DEFAULT_PORT,
            backlog: DEFAULT_BACKLOG,
            max_line: DEFAULT_MAX_LINE,
            delimiter: DEFAULT_DELIMITER,
            read_chunk: DEFAULT_READ_CHUNK,
        }
    }
}

/// Settings for the outbound client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub address: Ipv4Addr,
    pub port: u16,
    pub max_line: usize,
    pub delimiter: u8,
    pub read_chunk: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            port: DEFAULT_PORT,
            max_line: DEFAULT_MAX_LINE,
            delimiter: DEFAULT_DELIMITER,
            read_chunk: DEFAULT_READ_CHUNK,
        }
    }
}

/// Builder for constructing a [`Server`] with a fluent API.
///
/// # Example
/// ```ignore
/// let mut server = ServerBuilder::new().port(0).max_line(64).build()?;
/// println!("listening on {}", server.local_addr());
/// server.run()?;
/// ```
pub struct ServerBuilder {
    config: ServerConfig,
    transform: Rc<dyn Transform>,
    metrics: ServerMetrics,
}

impl ServerBuilder {
    /// Creates a builder with the reference defaults and [`Rot13`].
    ///
    /// # Example
    /// ```ignore
    /// let server = ServerBuilder::new().port(0).build()?;
    /// ```
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            transform: Rc::new(Rot13),
            metrics: ServerMetrics::new(),
        }
    }

    /// Replaces the whole configuration at once.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn address(mut self, address: Ipv4Addr) -> Self {
        self.config.address = address;
        self
    }

    /// Port to listen on; `0` picks an ephemeral port, see
    /// [`Server::local_addr`].
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn backlog(mut self, backlog: i32) -> Self {
        self.config.backlog = backlog;
        self
    }

    /// Sets the high watermark. Values below 1 are raised to 1.
    pub fn max_line(mut self, max_line: usize) -> Self {
        self.config.max_line = max_line.max(1);
        self
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.config.delimiter = delimiter;
        self
    }

    pub fn read_chunk(mut self, read_chunk: usize) -> Self {
        self.config.read_chunk = read_chunk.max(1);
        self
    }

    /// Sets the byte transform applied to every received byte.
    pub fn transform<T: Transform + 'static>(mut self, transform: T) -> Self {
        self.transform = Rc::new(transform);
        self
    }

    /// Shares counters with the caller; keep a clone to observe the server.
    pub fn metrics(mut self, metrics: ServerMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Binds the listener and returns a server ready to [`run`](Server::run).
    ///
    /// # Errors
    /// Propagates [`Error::Bind`](crate::Error::Bind),
    /// [`Error::Listen`](crate::Error::Listen) and socket setup failures.
    pub fn build(self) -> Result<Server> {
        Server::bind(self.config, self.transform, self.metrics)
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for a [`Client`].
///
/// Replies pass through the client's transform, [`Identity`] unless set, so
/// `transform(Rot13)` turns the server's output back into the original text.
pub struct ClientBuilder {
    config: ClientConfig,
    transform: Rc<dyn Transform>,
}

impl ClientBuilder {
    /// Creates a builder aimed at the default server address.
    ///
    /// # Example
    /// ```ignore
    /// let client = ClientBuilder::new().port(40713).transform(Rot13).build();
    /// ```
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            transform: Rc::new(Identity),
        }
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn address(mut self, address: Ipv4Addr) -> Self {
        self.config.address = address;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// The server's high watermark. Used to predict how many reply lines a
    /// request produces, so it must match the server's setting.
    pub fn max_line(mut self, max_line: usize) -> Self {
        self.config.max_line = max_line.max(1);
        self
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.config.delimiter = delimiter;
        self
    }

    pub fn read_chunk(mut self, read_chunk: usize) -> Self {
        self.config.read_chunk = read_chunk.max(1);
        self
    }

    /// Sets the transform applied to every reply byte.
    pub fn transform<T: Transform + 'static>(mut self, transform: T) -> Self {
        self.transform = Rc::new(transform);
        self
    }

    /// # Returns
    /// A client handle; no connection is made until
    /// [`Client::exchange`] is called.
    pub fn build(self) -> Client {
        Client::new(self.config, self.transform)
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
