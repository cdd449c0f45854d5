//! Server registry.
//!
//! One accept task hands every socket to its own handshake task, so a slow
//! or hostile client never stalls the listener. Only a completed handshake
//! produces a [`Connection`], which joins the live set until it closes.

pub mod registry;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use draftws_core::error::{DraftWsError, Result};
use draftws_core::protocol::subproto::Role;

use crate::config::{ConnectionConfig, DraftWsConfig, ServerSection};
use crate::connection::{Connection, ConnectionBuilder, ConnectionState};
use crate::handler::ConnectionHandler;
use crate::transport::handshake::accept_handshake;
use crate::transport::{PlainTcp, TransportAcceptor};

pub use registry::LiveSet;

use registry::Tracked;

const ACCEPT_RETRY: Duration = Duration::from_millis(50);

struct Shared {
    server: ServerSection,
    connection: ConnectionConfig,
    live: Arc<LiveSet>,
    handler: Arc<dyn ConnectionHandler>,
    acceptor: Arc<dyn TransportAcceptor>,
    shutdown: watch::Sender<bool>,
}

/// Running server. Dropping it stops the accept loop but leaves live
/// connections running; call [`Server::stop`] to close them too.
pub struct Server {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// Bind `server.listen` and start accepting plain TCP.
    pub async fn start(cfg: &DraftWsConfig, handler: Arc<dyn ConnectionHandler>) -> Result<Self> {
        Self::start_with_acceptor(cfg, handler, Arc::new(PlainTcp)).await
    }

    pub async fn start_with_acceptor(
        cfg: &DraftWsConfig,
        handler: Arc<dyn ConnectionHandler>,
        acceptor: Arc<dyn TransportAcceptor>,
    ) -> Result<Self> {
        cfg.validate()?;

        let listener = TcpListener::bind(&cfg.server.listen).await?;
        let local_addr = listener.local_addr()?;

        let live = Arc::new(LiveSet::new());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            server: cfg.server.clone(),
            connection: cfg.connection.clone(),
            handler: Arc::new(Tracked {
                live: live.clone(),
                inner: handler,
            }),
            live,
            acceptor,
            shutdown,
        });

        tracing::info!(%local_addr, "draftws server listening");
        let accept_task = tokio::spawn(accept_loop(listener, shared.clone(), shutdown_rx));

        Ok(Self {
            local_addr,
            shared,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, close every live connection and wait for them.
    pub async fn stop(&self) {
        self.shared.shutdown.send_replace(true);
        if let Some(task) = self.accept_task.lock().await.take() {
            if task.await.is_err() {
                tracing::warn!("accept task ended abnormally");
            }
        }

        let conns = self.shared.live.snapshot();
        for conn in &conns {
            conn.close();
        }
        futures_util::future::join_all(conns.iter().map(|c| c.closed())).await;
        tracing::info!(closed = conns.len(), "draftws server stopped");
    }

    /// Queue `data` on every live connection; returns how many accepted it.
    pub fn send_to_all(&self, data: &str) -> usize {
        self.shared.live.send_to_all(data)
    }

    /// Queue `data` on every live connection except `excluded`.
    pub fn send_to_all_except(&self, data: &str, excluded: &Connection) -> usize {
        self.shared.live.send_to_all_except(data, excluded.id())
    }

    pub fn len(&self) -> usize {
        self.shared.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.live.is_empty()
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.shared.live.snapshot()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shared.shutdown.send_replace(true);
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => break,

            res = listener.accept() => match res {
                Ok((tcp, peer)) => {
                    tracing::debug!(%peer, "accepted");
                    tokio::spawn(handle_accept(shared.clone(), tcp, peer));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_RETRY).await;
                }
            },
        }
    }
    tracing::debug!("accept loop finished");
}

async fn handle_accept(shared: Arc<Shared>, tcp: TcpStream, peer: SocketAddr) {
    let deadline = Duration::from_millis(shared.server.handshake_timeout_ms);
    let attempt = async {
        let mut stream = shared.acceptor.accept(tcp, peer).await?;
        let (req, leftover) = accept_handshake(&mut stream, &shared.server).await?;
        Ok::<_, DraftWsError>((stream, req, leftover))
    };

    let (stream, req, leftover) = match tokio::time::timeout(deadline, attempt).await {
        Ok(Ok(done)) => done,
        Ok(Err(e)) => {
            tracing::warn!(%peer, code = e.kind().as_str(), error = %e, "handshake failed");
            return;
        }
        Err(_) => {
            tracing::warn!(%peer, "handshake timed out");
            return;
        }
    };

    let conn = ConnectionBuilder::new(Role::Server)
        .config(shared.connection.clone())
        .peer(peer)
        .leftover(leftover)
        .spawn(stream, shared.handler.clone());
    shared.live.insert(conn.clone());

    // on_closed may have run before the insert landed
    if conn.state() == ConnectionState::Closed {
        shared.live.remove(conn.id());
    }
    if *shared.shutdown.borrow() {
        conn.close();
    }
    tracing::debug!(conn_id = conn.id(), %peer, path = %req.resource_path, "registered");
}
