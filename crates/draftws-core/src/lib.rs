//! draftws core: transport-agnostic protocol primitives and the shared error type.
//!
//! This crate defines the draft-76 ("Hixie") wire contracts used by both
//! peers: the upgrade handshake and its MD5 proof, the `0x00 .. 0xFF` frame
//! wrapper, and the length-prefixed sub-protocol carried inside frames. It
//! carries no transport or runtime dependencies so the codecs can be driven
//! from any I/O layer (and tested without one).
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here.
//! All fallible paths surface as `DraftWsError`/`Result` so a hostile peer
//! cannot crash the process with malformed handshakes or frames.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{ErrorKind, Result, DraftWsError};
