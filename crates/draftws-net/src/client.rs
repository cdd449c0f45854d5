//! Outbound connections.
//!
//! `connect` opens a transport through the injected [`TransportConnector`],
//! runs the client handshake under `handshake_timeout_ms`, verifies the
//! server's proof and only then starts a [`Connection`]. On any failure the
//! stream is dropped before the error is returned.

use std::sync::Arc;
use std::time::Duration;

use url::{Host, Url};

use draftws_core::error::{DraftWsError, Result};
use draftws_core::protocol::handshake::{ClientHandshake, Cookies, ServerHandshake};
use draftws_core::protocol::subproto::Role;

use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionBuilder, ConnectionState};
use crate::handler::ConnectionHandler;
use crate::transport::handshake::client_handshake;
use crate::transport::{PlainTcp, TransportConnector};

/// Where a `ws://` / `wss://` URL points.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    /// Host to dial (IPv6 without brackets).
    connect_host: String,
    port: u16,
    secure: bool,
    /// `Host` header value.
    host_header: String,
    origin: String,
    resource: String,
}

impl Target {
    fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw)
            .map_err(|e| DraftWsError::Config(format!("invalid url {raw:?}: {e}")))?;

        let secure = match url.scheme() {
            "ws" => false,
            "wss" => true,
            other => {
                return Err(DraftWsError::Config(format!(
                    "unsupported scheme {other:?}, expected ws or wss"
                )))
            }
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| DraftWsError::Config(format!("url {raw:?} has no host")))?;
        let connect_host = match url.host() {
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => host.to_string(),
        };

        let default_port = if secure { 443 } else { 80 };
        let port = url.port_or_known_default().unwrap_or(default_port);
        let host_header = if port == default_port {
            host.to_string()
        } else {
            format!("{host}:{port}")
        };

        let mut resource = match url.path() {
            "" => "/".to_string(),
            path => path.to_string(),
        };
        if let Some(query) = url.query() {
            resource.push('?');
            resource.push_str(query);
        }

        Ok(Self {
            connect_host,
            port,
            secure,
            host_header,
            origin: format!("http://{host}"),
            resource,
        })
    }
}

/// Draft-76 client.
pub struct Client {
    url: String,
    target: Target,
    config: ClientConfig,
    connector: Arc<dyn TransportConnector>,
    conn: Option<Connection>,
    response: Option<ServerHandshake>,
}

impl Client {
    pub fn new(url: &str) -> Result<Self> {
        Self::with_config(url, ClientConfig::default())
    }

    pub fn with_config(url: &str, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            url: url.to_string(),
            target: Target::parse(url)?,
            config,
            connector: Arc::new(PlainTcp),
            conn: None,
            response: None,
        })
    }

    /// Replace the transport (e.g. with a TLS connector for `wss://`).
    pub fn with_connector(mut self, connector: Arc<dyn TransportConnector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Dial, handshake and start the connection.
    pub async fn connect(&mut self, handler: Arc<dyn ConnectionHandler>) -> Result<Connection> {
        if self.conn.as_ref().is_some_and(|c| !c.state().is_closing()) {
            return Err(DraftWsError::Config("client is already connected".into()));
        }

        let req = self.build_request();
        let target = &self.target;
        let connector = &self.connector;
        let max_bytes = self.config.max_handshake_bytes;
        let deadline = Duration::from_millis(self.config.handshake_timeout_ms);

        tracing::info!(url = %self.url, "connecting");
        let handshake = async {
            let mut stream = connector
                .connect(&target.connect_host, target.port, target.secure)
                .await?;
            let (response, leftover) = client_handshake(&mut stream, &req, max_bytes).await?;
            Ok::<_, DraftWsError>((stream, response, leftover))
        };
        let (stream, response, leftover) = match tokio::time::timeout(deadline, handshake).await {
            Ok(Ok(done)) => done,
            Ok(Err(e)) => {
                tracing::warn!(url = %self.url, error = %e, "connect failed");
                return Err(e);
            }
            Err(_) => {
                tracing::warn!(url = %self.url, "connect timed out");
                return Err(DraftWsError::timed_out("client handshake"));
            }
        };

        let conn = ConnectionBuilder::new(Role::Client)
            .config(self.config.connection.clone())
            .leftover(leftover)
            .spawn(stream, handler);
        self.conn = Some(conn.clone());
        self.response = Some(response);
        Ok(conn)
    }

    /// Queue a message on the open connection.
    pub fn send(&self, text: impl Into<String>) -> Result<()> {
        self.conn
            .as_ref()
            .ok_or(DraftWsError::NotConnected)?
            .send(text)
    }

    /// Close and wait for teardown. A no-op when never connected.
    pub async fn close(&self) {
        if let Some(conn) = &self.conn {
            conn.close();
            conn.closed().await;
        }
    }

    /// `Closed` before the first successful connect.
    pub fn state(&self) -> ConnectionState {
        self.conn
            .as_ref()
            .map_or(ConnectionState::Closed, Connection::state)
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.conn.as_ref()
    }

    /// Server's handshake response from the last successful connect.
    pub fn server_handshake(&self) -> Option<&ServerHandshake> {
        self.response.as_ref()
    }

    fn build_request(&self) -> ClientHandshake {
        let t = &self.target;
        let mut req = ClientHandshake::generate(&t.host_header, &t.origin, &t.resource);
        req.subprotocol = self.config.subprotocol.clone();
        for h in &self.config.headers {
            req.headers.insert(&h.name, &h.value);
        }
        if !self.config.cookies.is_empty() {
            let mut cookies = Cookies::new();
            for c in &self.config.cookies {
                cookies.insert(&c.name, &c.value);
            }
            req.cookies = Some(cookies);
        }
        req
    }
}
