//! Length-prefixed sub-protocol carried inside frame payloads.
//!
//! - Message: `~m~<decimal char length>~m~<message>`
//! - Heartbeat: any payload containing `~h~`; the token is whatever follows the last `~`.
//! - Session key: the first frame a client receives, consumed without being surfaced.
//!
//! Only the text layer lives here; framing is [`crate::protocol::frame`].

use rand::Rng;

/// Message length marker.
pub const MESSAGE_MARKER: &str = "~m~";
/// Heartbeat marker.
pub const HEARTBEAT_MARKER: &str = "~h~";

/// Which side of the connection is decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Receives a session key first and answers heartbeats.
    Client,
    /// Sends the session key and heartbeats; never answers heartbeat echoes.
    Server,
}

/// Classified frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    SessionKey(String),
    Heartbeat { token: String },
    Message(String),
}

/// `~m~<len>~m~<msg>`, where `len` counts characters.
pub fn encode_message(msg: &str) -> String {
    format!("{MESSAGE_MARKER}{}{MESSAGE_MARKER}{msg}", msg.chars().count())
}

/// Payload a client sends back for a heartbeat token.
pub fn heartbeat_payload(token: &str) -> String {
    format!("{HEARTBEAT_MARKER}{token}")
}

/// Random numeric session key a server announces as its first frame.
pub fn generate_session_key() -> String {
    rand::rng()
        .random_range(1_000_000_000_000_000u64..10_000_000_000_000_000)
        .to_string()
}

/// Strip a well-formed `~m~<digits>~m~` prefix, otherwise keep what follows
/// the last `~`.
pub fn strip_message_prefix(payload: &str) -> &str {
    if let Some((len, body)) = payload
        .strip_prefix(MESSAGE_MARKER)
        .and_then(|rest| rest.split_once(MESSAGE_MARKER))
    {
        if !len.is_empty() && len.bytes().all(|b| b.is_ascii_digit()) {
            return body;
        }
    }
    after_last_tilde(payload)
}

fn after_last_tilde(payload: &str) -> &str {
    payload.rsplit('~').next().unwrap_or(payload)
}

/// Per-connection sub-protocol state.
#[derive(Debug)]
pub struct SubProtocolDecoder {
    role: Role,
    session_key: Option<String>,
}

impl SubProtocolDecoder {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            session_key: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Session key received from the server (client role only).
    pub fn session_key(&self) -> Option<&str> {
        self.session_key.as_deref()
    }

    /// Classify one completed frame payload.
    pub fn classify(&mut self, payload: &str) -> Inbound {
        if self.role == Role::Client && self.session_key.is_none() {
            let key = strip_message_prefix(payload).to_string();
            self.session_key = Some(key.clone());
            return Inbound::SessionKey(key);
        }
        if payload.contains(HEARTBEAT_MARKER) {
            return Inbound::Heartbeat {
                token: after_last_tilde(payload).to_string(),
            };
        }
        Inbound::Message(strip_message_prefix(payload).to_string())
    }
}
