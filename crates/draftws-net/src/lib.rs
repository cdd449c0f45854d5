//! draftws runtime library.
//!
//! Wires the pure codecs from `draftws-core` onto tokio streams:
//! per-connection read/write tasks, an outbound client, and a server that
//! tracks its live connections for broadcast. Consumed by the echo binary
//! (`main.rs`) and by integration tests.

pub mod client;
pub mod config;
pub mod connection;
pub mod echo;
pub mod handler;
pub mod server;
pub mod transport;

pub use client::Client;
pub use connection::{Connection, ConnectionBuilder, ConnectionId, ConnectionState};
pub use handler::{ChannelHandler, ConnectionEvent, ConnectionHandler};
pub use server::Server;
