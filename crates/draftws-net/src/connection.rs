//! One established connection.
//!
//! Each connection runs two tasks on disjoint halves of its stream:
//! - read task: bytes -> `FrameDecoder` -> (sub-protocol) -> handler callbacks
//! - write task: the only consumer of the outbound queue; one frame at a time,
//!   flushed before the next, so sends hit the wire in call order
//!
//! Lifecycle is a `watch` channel: `Open -> Closing -> Closed`. Whoever moves
//! the state out of `Open` wins; both tasks observe `Closing` and wind down.
//! The write task owns teardown (close frame, joining the reader, `on_closed`).

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use draftws_core::error::{DraftWsError, Result};
use draftws_core::protocol::frame::{encode_frame, Decoded, FrameDecoder, CLOSE_FRAME};
use draftws_core::protocol::subproto::{
    encode_message, generate_session_key, heartbeat_payload, Inbound, Role, SubProtocolDecoder,
};

use crate::config::{ConnectionConfig, DecodeErrorPolicy, FrameMode};
use crate::handler::ConnectionHandler;

pub type ConnectionId = u64;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// Handshake in progress (client only; a `Connection` starts `Open`).
    Connecting,
    Open,
    /// Close requested or failure seen; tasks are winding down.
    Closing,
    /// Stream released. Terminal.
    Closed,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        self == ConnectionState::Open
    }

    /// `Closing` or `Closed`.
    pub fn is_closing(self) -> bool {
        self >= ConnectionState::Closing
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        })
    }
}

#[derive(Debug)]
enum Outbound {
    /// User text; wrapped as `~m~<len>~m~` in sub-protocol mode.
    Text(String),
    /// Payload written as-is (heartbeat replies).
    Raw(String),
}

struct Inner {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    role: Role,
    config: ConnectionConfig,
    state: watch::Sender<ConnectionState>,
    /// Flips once `on_closed` has returned.
    released: watch::Sender<bool>,
    outbound: mpsc::UnboundedSender<Outbound>,
    handler: Arc<dyn ConnectionHandler>,
    session_key: OnceLock<String>,
}

/// Cheap, cloneable handle to a running connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .field("role", &self.inner.role)
            .field("state", &self.state())
            .finish()
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Connection {}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.inner.peer
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Sub-protocol session key: generated by a server, received by a client.
    pub fn session_key(&self) -> Option<&str> {
        self.inner.session_key.get().map(String::as_str)
    }

    /// Queue a text message. Never waits on the network.
    pub fn send(&self, text: impl Into<String>) -> Result<()> {
        if !self.state().is_open() {
            return Err(DraftWsError::NotConnected);
        }
        self.inner
            .outbound
            .send(Outbound::Text(text.into()))
            .map_err(|_| DraftWsError::NotConnected)
    }

    /// Request close. Idempotent and non-blocking; queued sends are dropped.
    ///
    /// Use [`Connection::closed`] to wait for teardown.
    pub fn close(&self) {
        if self.begin_close() {
            tracing::debug!(conn_id = self.id(), "close requested");
        }
    }

    /// Resolves once the stream is released and `on_closed` has returned.
    ///
    /// Do not await this from this connection's own handler callbacks: teardown
    /// waits for the read task, which is the one running them.
    pub async fn closed(&self) {
        let mut rx = self.inner.released.subscribe();
        loop {
            let done = *rx.borrow_and_update();
            if done || rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// `Open -> Closing`. True for the caller that made the transition.
    fn begin_close(&self) -> bool {
        self.inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Open {
                *state = ConnectionState::Closing;
                true
            } else {
                false
            }
        })
    }

    /// Close with an error; only the call that wins the transition reports it.
    async fn fail(&self, err: DraftWsError) {
        if self.begin_close() {
            tracing::warn!(conn_id = self.id(), code = err.kind().as_str(), error = %err, "connection failed");
            self.inner.handler.on_error(self, &err).await;
        }
    }

    async fn finish(&self) {
        self.inner.state.send_replace(ConnectionState::Closed);
        tracing::info!(conn_id = self.id(), peer = ?self.peer(), "connection closed");
        self.inner.handler.on_closed(self).await;
        self.inner.released.send_replace(true);
    }

    /// Surface every complete frame held by the decoder.
    /// Returns false once the read loop should stop.
    async fn drain(&self, input: &mut InboundState) -> bool {
        loop {
            if self.state().is_closing() {
                return false;
            }
            match input.decoder.next_frame() {
                Ok(None) => return true,
                Ok(Some(Decoded::Close)) => {
                    tracing::debug!(conn_id = self.id(), "peer sent close frame");
                    self.begin_close();
                    return false;
                }
                Ok(Some(Decoded::Message(payload))) => {
                    input.in_bad_region = false;
                    self.dispatch(payload, &mut input.sub).await;
                }
                Err(err) => match self.inner.config.on_decode_error {
                    DecodeErrorPolicy::Close => {
                        self.fail(err).await;
                        return false;
                    }
                    // one report per run of undecodable frames
                    DecodeErrorPolicy::Skip if input.in_bad_region => {
                        tracing::debug!(conn_id = self.id(), error = %err, "still skipping");
                    }
                    DecodeErrorPolicy::Skip => {
                        input.in_bad_region = true;
                        tracing::warn!(conn_id = self.id(), error = %err, "skipping undecodable input");
                        self.inner.handler.on_error(self, &err).await;
                    }
                },
            }
        }
    }

    async fn dispatch(&self, payload: String, sub: &mut Option<SubProtocolDecoder>) {
        let Some(sub) = sub.as_mut() else {
            self.inner.handler.on_message(self, payload).await;
            return;
        };
        match sub.classify(&payload) {
            Inbound::SessionKey(key) => {
                tracing::debug!(conn_id = self.id(), "session key received");
                let _ = self.inner.session_key.set(key);
            }
            Inbound::Heartbeat { token } => match self.inner.role {
                Role::Client => {
                    tracing::trace!(conn_id = self.id(), %token, "heartbeat, replying");
                    let _ = self.inner.outbound.send(Outbound::Raw(heartbeat_payload(&token)));
                }
                Role::Server => {
                    tracing::trace!(conn_id = self.id(), %token, "heartbeat echo");
                }
            },
            Inbound::Message(text) => self.inner.handler.on_message(self, text).await,
        }
    }
}

/// Starts a [`Connection`] on a stream whose handshake is already done.
#[derive(Debug)]
pub struct ConnectionBuilder {
    role: Role,
    config: ConnectionConfig,
    peer: Option<SocketAddr>,
    leftover: Bytes,
}

impl ConnectionBuilder {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            config: ConnectionConfig::default(),
            peer: None,
            leftover: Bytes::new(),
        }
    }

    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Bytes read past the handshake; decoded before anything else.
    pub fn leftover(mut self, leftover: Bytes) -> Self {
        self.leftover = leftover;
        self
    }

    /// Spawn the read and write tasks. Must run inside a tokio runtime.
    pub fn spawn<S>(self, stream: S, handler: Arc<dyn ConnectionHandler>) -> Connection
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Open);
        let (released, _) = watch::channel(false);

        let conn = Connection {
            inner: Arc::new(Inner {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                peer: self.peer,
                role: self.role,
                config: self.config,
                state,
                released,
                outbound: out_tx,
                handler,
                session_key: OnceLock::new(),
            }),
        };

        let inner = &conn.inner;
        if inner.role == Role::Server && inner.config.mode == FrameMode::SubProtocol {
            let key = generate_session_key();
            let _ = inner.outbound.send(Outbound::Text(key.clone()));
            let _ = inner.session_key.set(key);
        }

        tracing::info!(conn_id = conn.id(), peer = ?conn.peer(), role = ?conn.role(), "connection open");

        let (reader, writer) = tokio::io::split(stream);
        let read_task = tokio::spawn(read_loop(conn.clone(), reader, self.leftover));
        tokio::spawn(write_loop(conn.clone(), writer, out_rx, read_task));
        conn
    }
}

/// Read-task decoding state; never shared.
struct InboundState {
    decoder: FrameDecoder,
    sub: Option<SubProtocolDecoder>,
    /// Last frame failed to decode (skip policy).
    in_bad_region: bool,
}

/// Resolves once the state leaves `Open`.
async fn closing(rx: &mut watch::Receiver<ConnectionState>) {
    loop {
        let closing = rx.borrow_and_update().is_closing();
        if closing || rx.changed().await.is_err() {
            return;
        }
    }
}

async fn read_loop<R>(conn: Connection, mut reader: R, leftover: Bytes)
where
    R: AsyncRead + Unpin,
{
    let cfg = &conn.inner.config;
    let mut state_rx = conn.inner.state.subscribe();
    let mut input = InboundState {
        decoder: FrameDecoder::new(cfg.max_frame_bytes),
        sub: (cfg.mode == FrameMode::SubProtocol).then(|| SubProtocolDecoder::new(conn.role())),
        in_bad_region: false,
    };
    let mut buf = vec![0u8; cfg.buffer_size];

    conn.inner.handler.on_open(&conn).await;

    if !leftover.is_empty() {
        input.decoder.extend(&leftover);
        if !conn.drain(&mut input).await {
            return;
        }
    }

    loop {
        tokio::select! {
            biased;

            _ = closing(&mut state_rx) => break,

            res = reader.read(&mut buf) => match res {
                Ok(0) => {
                    tracing::debug!(conn_id = conn.id(), "peer closed the stream");
                    conn.begin_close();
                    break;
                }
                Ok(n) => {
                    tracing::trace!(conn_id = conn.id(), bytes = n, "read");
                    input.decoder.extend(&buf[..n]);
                    if !conn.drain(&mut input).await {
                        break;
                    }
                }
                Err(e) => {
                    conn.fail(e.into()).await;
                    break;
                }
            },
        }
    }
}

async fn write_loop<W>(
    conn: Connection,
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    read_task: JoinHandle<()>,
) where
    W: AsyncWrite + Unpin,
{
    let cfg = conn.inner.config.clone();
    let sub_mode = cfg.mode == FrameMode::SubProtocol;
    let mut state_rx = conn.inner.state.subscribe();

    let mut heartbeat = (conn.role() == Role::Server && sub_mode && cfg.heartbeat_interval_ms > 0)
        .then(|| {
            let period = Duration::from_millis(cfg.heartbeat_interval_ms);
            let mut t = tokio::time::interval_at(Instant::now() + period, period);
            t.set_missed_tick_behavior(MissedTickBehavior::Delay);
            t
        });
    let mut beats: u64 = 0;

    loop {
        let payload = tokio::select! {
            biased;

            _ = closing(&mut state_rx) => break,

            msg = rx.recv() => match msg {
                Some(Outbound::Text(text)) if sub_mode => encode_message(&text),
                Some(Outbound::Text(text)) | Some(Outbound::Raw(text)) => text,
                None => break,
            },

            _ = tick(heartbeat.as_mut()) => {
                beats += 1;
                encode_message(&heartbeat_payload(&beats.to_string()))
            }
        };

        tracing::trace!(conn_id = conn.id(), bytes = payload.len() + 2, "write frame");
        if let Err(e) = write_frame(&mut writer, &payload).await {
            conn.fail(e.into()).await;
            break;
        }
    }

    // ---- teardown: best-effort close frame, never fails
    let grace = Duration::from_millis(cfg.close_timeout_ms);
    let sent = tokio::time::timeout(grace, async {
        writer.write_all(&CLOSE_FRAME).await?;
        writer.flush().await?;
        writer.shutdown().await
    })
    .await;
    if !matches!(sent, Ok(Ok(()))) {
        tracing::debug!(conn_id = conn.id(), "close frame not delivered");
    }

    drop(rx);
    if read_task.await.is_err() {
        tracing::warn!(conn_id = conn.id(), "read task ended abnormally");
    }
    drop(writer);
    conn.finish().await;
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn write_frame<W>(writer: &mut W, payload: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_frame(payload)).await?;
    writer.flush().await
}
