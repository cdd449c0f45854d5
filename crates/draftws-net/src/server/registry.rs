use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use draftws_core::error::DraftWsError;

use crate::connection::{Connection, ConnectionId};
use crate::handler::ConnectionHandler;

/// Live connections of one server: `ConnectionId -> Connection`.
///
/// Membership changes only when a handshake completes (insert) and when a
/// connection reports closed (remove). Iteration order is unspecified.
#[derive(Debug, Default)]
pub struct LiveSet {
    conns: DashMap<ConnectionId, Connection>,
}

impl LiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, conn: Connection) {
        self.conns.insert(conn.id(), conn);
    }

    /// Idempotent.
    pub fn remove(&self, id: ConnectionId) -> Option<Connection> {
        self.conns.remove(&id).map(|(_, conn)| conn)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.conns.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// Point-in-time copy; no shard lock is held afterwards.
    pub fn snapshot(&self) -> Vec<Connection> {
        self.conns.iter().map(|r| r.value().clone()).collect()
    }

    /// Queue `data` on every live connection. Returns how many accepted it.
    pub fn send_to_all(&self, data: &str) -> usize {
        self.broadcast(data, None)
    }

    /// Like [`LiveSet::send_to_all`], skipping `excluded`.
    pub fn send_to_all_except(&self, data: &str, excluded: ConnectionId) -> usize {
        self.broadcast(data, Some(excluded))
    }

    fn broadcast(&self, data: &str, excluded: Option<ConnectionId>) -> usize {
        let mut queued = 0;
        for conn in self.snapshot() {
            if Some(conn.id()) == excluded {
                continue;
            }
            match conn.send(data) {
                Ok(()) => queued += 1,
                Err(e) => {
                    tracing::warn!(conn_id = conn.id(), error = %e, "broadcast target skipped");
                }
            }
        }
        queued
    }
}

/// Keeps a [`LiveSet`] in sync with connection lifecycles, then defers to
/// the user's handler.
pub(crate) struct Tracked {
    pub(crate) live: Arc<LiveSet>,
    pub(crate) inner: Arc<dyn ConnectionHandler>,
}

#[async_trait]
impl ConnectionHandler for Tracked {
    async fn on_open(&self, conn: &Connection) {
        self.inner.on_open(conn).await;
    }

    async fn on_message(&self, conn: &Connection, text: String) {
        self.inner.on_message(conn, text).await;
    }

    async fn on_error(&self, conn: &Connection, err: &DraftWsError) {
        self.inner.on_error(conn, err).await;
    }

    async fn on_closed(&self, conn: &Connection) {
        self.live.remove(conn.id());
        self.inner.on_closed(conn).await;
    }
}
