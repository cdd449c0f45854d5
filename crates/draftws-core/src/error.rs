//! Shared error type across draftws crates.

use thiserror::Error;

/// Stable error classification (used by hosts and test vectors).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed handshake request or response.
    HandshakeParse,
    /// Well-formed handshake that the peer must not accept.
    HandshakeRejected,
    /// Operation attempted before the handshake completed or after close.
    NotConnected,
    /// I/O failure on the underlying stream.
    Transport,
    /// Unexpected byte sequence in the framing layer.
    ProtocolDecode,
    /// Invalid configuration or URL.
    Config,
}

impl ErrorKind {
    /// String representation used in logs and test vectors.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::HandshakeParse => "HANDSHAKE_PARSE",
            ErrorKind::HandshakeRejected => "HANDSHAKE_REJECTED",
            ErrorKind::NotConnected => "NOT_CONNECTED",
            ErrorKind::Transport => "TRANSPORT",
            ErrorKind::ProtocolDecode => "PROTOCOL_DECODE",
            ErrorKind::Config => "CONFIG",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, DraftWsError>;

/// Unified error type used by core and net.
#[derive(Debug, Error)]
pub enum DraftWsError {
    #[error("handshake parse error: {0}")]
    HandshakeParse(String),
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),
    #[error("not connected")]
    NotConnected,
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("protocol decode error: {0}")]
    ProtocolDecode(String),
    #[error("config: {0}")]
    Config(String),
}

impl DraftWsError {
    /// Map the error to its stable kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DraftWsError::HandshakeParse(_) => ErrorKind::HandshakeParse,
            DraftWsError::HandshakeRejected(_) => ErrorKind::HandshakeRejected,
            DraftWsError::NotConnected => ErrorKind::NotConnected,
            DraftWsError::Transport(_) => ErrorKind::Transport,
            DraftWsError::ProtocolDecode(_) => ErrorKind::ProtocolDecode,
            DraftWsError::Config(_) => ErrorKind::Config,
        }
    }

    /// Build a `Transport` timeout error.
    pub fn timed_out(what: &str) -> Self {
        DraftWsError::Transport(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("{what} timed out"),
        ))
    }
}
