//! Top-level facade crate for draftws.
//!
//! Re-exports the protocol codecs and the tokio runtime so users can depend
//! on a single crate.

pub mod core {
    pub use draftws_core::*;
}

pub mod net {
    pub use draftws_net::*;
}

pub use draftws_core::{DraftWsError, ErrorKind, Result};
pub use draftws_net::{Client, Connection, ConnectionHandler, ConnectionState, Server};
