//! Transport layer.
//!
//! - `factory`: how a byte stream is obtained (plain TCP by default; TLS or
//!   proxies plug in behind the same traits)
//! - `handshake`: reading and writing the opening handshake on that stream

pub mod factory;
pub mod handshake;

pub use factory::{AsyncStream, BoxedStream, PlainTcp, TransportAcceptor, TransportConnector};
