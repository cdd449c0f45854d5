use serde::Deserialize;

use draftws_core::error::{DraftWsError, Result};
use draftws_core::protocol::frame::DEFAULT_MAX_FRAME_BYTES;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DraftWsConfig {
    pub version: u32,

    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub connection: ConnectionConfig,
}

impl DraftWsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(DraftWsError::Config(format!(
                "unsupported config version {}",
                self.version
            )));
        }
        self.server.validate()?;
        self.connection.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Advertise `wss://` in the location header (TLS comes from the acceptor).
    #[serde(default)]
    pub secure: bool,

    /// Empty means any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    #[serde(default = "default_max_handshake_bytes")]
    pub max_handshake_bytes: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            secure: false,
            allowed_origins: Vec::new(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            max_handshake_bytes: default_max_handshake_bytes(),
        }
    }
}

impl ServerSection {
    pub fn validate(&self) -> Result<()> {
        if self.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(DraftWsError::Config(format!(
                "server.listen must be a socket address, got {:?}",
                self.listen
            )));
        }
        validate_handshake_limits(
            "server",
            self.handshake_timeout_ms,
            self.max_handshake_bytes,
        )
    }

    /// Whether `origin` passes the allow-list.
    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|o| o == origin)
    }
}

/// Payload encoding inside frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameMode {
    /// Raw UTF-8 text per frame.
    #[default]
    Plain,
    /// `~m~<len>~m~<msg>` payloads with `~h~` heartbeats.
    SubProtocol,
}

/// What a connection does when the frame decoder rejects input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeErrorPolicy {
    /// Report the error and close the connection.
    #[default]
    Close,
    /// Report the error and keep reading.
    Skip,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Bytes requested per read.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    #[serde(default)]
    pub mode: FrameMode,

    #[serde(default)]
    pub on_decode_error: DecodeErrorPolicy,

    /// Upper bound for writing the close frame.
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,

    /// Server-side sub-protocol heartbeat period; 0 disables.
    #[serde(default)]
    pub heartbeat_interval_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            max_frame_bytes: default_max_frame_bytes(),
            mode: FrameMode::default(),
            on_decode_error: DecodeErrorPolicy::default(),
            close_timeout_ms: default_close_timeout_ms(),
            heartbeat_interval_ms: 0,
        }
    }
}

impl ConnectionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=65536).contains(&self.buffer_size) {
            return Err(DraftWsError::Config(
                "connection.buffer_size must be between 1 and 65536".into(),
            ));
        }
        if self.max_frame_bytes == 0 {
            return Err(DraftWsError::Config(
                "connection.max_frame_bytes must be at least 1".into(),
            ));
        }
        if !(1..=30000).contains(&self.close_timeout_ms) {
            return Err(DraftWsError::Config(
                "connection.close_timeout_ms must be between 1 and 30000".into(),
            ));
        }
        if self.heartbeat_interval_ms != 0 && self.heartbeat_interval_ms < 1000 {
            return Err(DraftWsError::Config(
                "connection.heartbeat_interval_ms must be 0 or at least 1000".into(),
            ));
        }
        Ok(())
    }
}

/// Name/value pair for client headers and cookies.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NameValue {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    #[serde(default = "default_max_handshake_bytes")]
    pub max_handshake_bytes: usize,

    #[serde(default)]
    pub subprotocol: Option<String>,

    /// Extra request headers, sent in order.
    #[serde(default)]
    pub headers: Vec<NameValue>,

    #[serde(default)]
    pub cookies: Vec<NameValue>,

    #[serde(default)]
    pub connection: ConnectionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: default_handshake_timeout_ms(),
            max_handshake_bytes: default_max_handshake_bytes(),
            subprotocol: None,
            headers: Vec::new(),
            cookies: Vec::new(),
            connection: ConnectionConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        validate_handshake_limits("client", self.handshake_timeout_ms, self.max_handshake_bytes)?;
        self.connection.validate()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(NameValue {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push(NameValue {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn subprotocol(mut self, name: impl Into<String>) -> Self {
        self.subprotocol = Some(name.into());
        self
    }

    pub fn connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    pub fn handshake_timeout_ms(mut self, ms: u64) -> Self {
        self.handshake_timeout_ms = ms;
        self
    }
}

fn validate_handshake_limits(section: &str, timeout_ms: u64, max_bytes: usize) -> Result<()> {
    if !(100..=60000).contains(&timeout_ms) {
        return Err(DraftWsError::Config(format!(
            "{section}.handshake_timeout_ms must be between 100 and 60000"
        )));
    }
    if !(256..=65536).contains(&max_bytes) {
        return Err(DraftWsError::Config(format!(
            "{section}.max_handshake_bytes must be between 256 and 65536"
        )));
    }
    Ok(())
}

fn default_listen() -> String {
    "127.0.0.1:8080".into()
}
fn default_handshake_timeout_ms() -> u64 {
    5000
}
fn default_max_handshake_bytes() -> usize {
    8192
}
fn default_buffer_size() -> usize {
    255
}
fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}
fn default_close_timeout_ms() -> u64 {
    1000
}
