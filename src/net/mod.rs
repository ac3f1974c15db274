//! TCP networking on top of the reactor.
//!
//! Provides the listening [`tcp_listener::Acceptor`], the per-peer
//! [`tcp_stream::EchoConnection`] and the outbound [`connector::Connector`].

pub mod connector;
pub mod tcp_listener;
pub mod tcp_stream;
pub(crate) mod utils;
