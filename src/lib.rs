//! `rotline` is a single-threaded, readiness-driven TCP server that transforms
//! every received line byte by byte and echoes it back, plus its client dual.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────────────────── Reactor (poll) ────────────────────────────┐
//!  │  fd → (interest, Box<dyn Handler>)                                     │
//!  │                                                                        │
//!  │   listener fd ──▶ Acceptor ──register──▶ EchoConnection (one per peer) │
//!  │                                              │                         │
//!  │                                              ▼                         │
//!  │                                       ConnectionState                  │
//!  │                                   input ─Transform─▶ output            │
//!  └────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - [`transform`]: the pure `u8 -> u8` mapping ([`Rot13`] by default)
//! - [`reactor`]: event loop, interest flags, per-connection buffers
//! - [`net`]: acceptor, server connection handler, outbound connector
//! - [`error`]: error taxonomy and the socket error classifier
//! - [`builder`]: configuration and fluent builders
//! - [`metrics`]: shared counters updated at component boundaries
//! - [`subsystem`]: process-wide socket subsystem scope
//!
//! # Example
//!
//! ```ignore
//! use rotline::{ClientBuilder, ServerBuilder};
//!
//! let mut server = ServerBuilder::new().port(0).build()?;
//! let port = server.local_addr().port();
//! let shutdown = server.shutdown_handle();
//! // run `server.run()` on this thread, then from another one:
//! let replies = ClientBuilder::new().port(port).build().exchange(["Hello"])?;
//! assert_eq!(replies[0], b"Uryyb\n");
//! shutdown.shutdown();
//! ```

pub mod builder;
pub mod client;
pub mod error;
pub mod metrics;
pub mod net;
pub mod reactor;
pub mod server;
pub mod subsystem;
pub mod transform;

pub use builder::{ClientBuilder, ClientConfig, ServerBuilder, ServerConfig};
pub use client::Client;
pub use error::{Error, ErrorClass, Result, classify};
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use reactor::core::{Handler, Reactor, ShutdownHandle};
pub use reactor::event::Interest;
pub use reactor::io::{ConnectionState, LineRoute};
pub use server::Server;
pub use transform::{Identity, Rot13, Transform};
