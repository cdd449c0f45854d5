use async_trait::async_trait;

use crate::connection::Connection;
use crate::handler::ConnectionHandler;

/// Prefix the echo server puts in front of every reply.
pub const ECHO_PREFIX: &str = "Echo - ";

/// Replies `"Echo - <text>"` to every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

#[async_trait]
impl ConnectionHandler for EchoHandler {
    async fn on_open(&self, conn: &Connection) {
        tracing::info!(conn_id = conn.id(), peer = ?conn.peer(), "echo client joined");
    }

    async fn on_message(&self, conn: &Connection, text: String) {
        if let Err(e) = conn.send(format!("{ECHO_PREFIX}{text}")) {
            tracing::debug!(conn_id = conn.id(), error = %e, "echo dropped");
        }
    }
}
