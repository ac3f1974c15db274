//! Event-driven I/O reactor module.
//!
//! Provides the single-threaded readiness loop ([`core::Reactor`]), the
//! interest flags it registers ([`event::Interest`]) and the per-connection
//! buffer state driven from its callbacks ([`io::ConnectionState`]).

pub mod core;
pub mod event;
pub mod io;
