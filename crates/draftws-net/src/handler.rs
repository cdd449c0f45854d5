//! Observer callbacks for connection events.

use async_trait::async_trait;
use tokio::sync::mpsc;

use draftws_core::error::{DraftWsError, ErrorKind};

use crate::connection::{Connection, ConnectionId};

/// Receives events from one or more connections.
///
/// Callbacks for a given connection run on its read task, one at a time and
/// in arrival order. A slow callback delays that connection's reads, never
/// its writes or other connections.
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Handshake done, state is `Open`.
    async fn on_open(&self, conn: &Connection) {
        let _ = conn;
    }

    /// One decoded text message.
    async fn on_message(&self, conn: &Connection, text: String);

    /// Decode or transport failure.
    async fn on_error(&self, conn: &Connection, err: &DraftWsError) {
        let _ = (conn, err);
    }

    /// Called exactly once, after the stream is released.
    async fn on_closed(&self, conn: &Connection) {
        let _ = conn;
    }
}

/// Event as seen through a [`ChannelHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Open(ConnectionId),
    Message(ConnectionId, String),
    Error {
        id: ConnectionId,
        kind: ErrorKind,
        detail: String,
    },
    Closed(ConnectionId),
}

/// Forwards every callback into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ChannelHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ConnectionHandler for ChannelHandler {
    async fn on_open(&self, conn: &Connection) {
        let _ = self.tx.send(ConnectionEvent::Open(conn.id()));
    }

    async fn on_message(&self, conn: &Connection, text: String) {
        let _ = self.tx.send(ConnectionEvent::Message(conn.id(), text));
    }

    async fn on_error(&self, conn: &Connection, err: &DraftWsError) {
        let _ = self.tx.send(ConnectionEvent::Error {
            id: conn.id(),
            kind: err.kind(),
            detail: err.to_string(),
        });
    }

    async fn on_closed(&self, conn: &Connection) {
        let _ = self.tx.send(ConnectionEvent::Closed(conn.id()));
    }
}
