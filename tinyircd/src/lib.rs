//! A small single-process IRC relay server.
//!
//! - [`server`]: listener and event loop, generic over a [`server::Handler`]
//! - [`connection`]: the IRC protocol handler (registration, channels, messaging)
//! - [`state`]: session and channel registries
//! - [`irc`]: line framing, parsing and reply encoding

pub mod config;
pub mod connection;
pub mod error;
pub mod irc;
pub mod server;
pub mod state;
