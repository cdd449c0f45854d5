//! Protocol modules (handshake, frames, sub-protocol).
//!
//! - `handshake`: draft-76 upgrade request/response and the 16-byte MD5 proof.
//! - `frame`: `0x00 <utf-8> 0xFF` wrapping and the streaming decoder.
//! - `subproto`: `~m~<len>~m~<msg>` payloads and `~h~` heartbeats inside frames.
//!
//! All parsers are panic-free: malformed input is reported as `DraftWsError`
//! instead of panicking or indexing raw buffers.

pub mod frame;
pub mod handshake;
pub mod subproto;
