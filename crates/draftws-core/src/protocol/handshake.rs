//! Draft-76 upgrade handshake (pure codec, no I/O).
//!
//! Wire shapes:
//! - Request: `GET <path> HTTP/1.1` + header lines + blank line + 8 raw challenge bytes.
//! - Response: fixed status/upgrade/connection lines + header lines + blank line
//!   + 16 raw proof bytes.
//!
//! The proof is `MD5(be32(digits(key1) / spaces(key1)) || be32(digits(key2) / spaces(key2)) || challenge)`.
//! Both peers compute it with [`compute_proof`], so the client's expectation and
//! the server's answer agree bit for bit.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use md5::{Digest, Md5};
use rand::Rng;

use crate::error::{DraftWsError, Result};

/// Raw challenge bytes trailing the request head.
pub const CHALLENGE_LEN: usize = 8;
/// Raw proof bytes trailing the response head.
pub const PROOF_LEN: usize = 16;
/// Blank line closing a handshake head.
pub const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Mandatory response lines, checked verbatim and in order by the client.
pub const STATUS_LINE: &str = "HTTP/1.1 101 WebSocket Protocol Handshake";
pub const UPGRADE_LINE: &str = "Upgrade: WebSocket";
pub const CONNECTION_LINE: &str = "Connection: Upgrade";

/// Ordered header map with case-insensitive lookup.
///
/// Names keep the case they were inserted with; re-inserting a name that
/// matches case-insensitively replaces the value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. Returns the previous value, if any.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            Some((_, v)) => Some(std::mem::replace(v, value)),
            None => {
                self.entries.push((name, value));
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let idx = self
            .entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))?;
        Some(self.entries.remove(idx).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order, original-case names.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// Cookie pairs carried by the request's `Cookie` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cookies {
    pairs: Vec<(String, String)>,
}

impl Cookies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `Cookie` header value: `;`-separated items, each split on the
    /// first `=`. Leading whitespace is trimmed from names.
    pub fn parse(value: &str) -> Result<Self> {
        let mut cookies = Cookies::new();
        for item in value.split(';') {
            let (name, val) = item.split_once('=').ok_or_else(|| {
                DraftWsError::HandshakeParse(format!("cookie item without '=': {item:?}"))
            })?;
            cookies.insert(name.trim_start(), val);
        }
        Ok(cookies)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.pairs.iter_mut().find(|(n, _)| *n == name) {
            Some((_, v)) => *v = value,
            None => self.pairs.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

impl fmt::Display for Cookies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.pairs.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

/// Client upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHandshake {
    pub origin: String,
    pub host: String,
    pub resource_path: String,
    pub key1: String,
    pub key2: String,
    pub challenge: [u8; CHALLENGE_LEN],
    pub subprotocol: Option<String>,
    /// Headers without a dedicated field, original-case names.
    pub headers: Headers,
    pub cookies: Option<Cookies>,
}

impl ClientHandshake {
    /// New request with freshly generated keys and challenge.
    pub fn generate(
        host: impl Into<String>,
        origin: impl Into<String>,
        resource_path: impl Into<String>,
    ) -> Self {
        let mut rng = rand::rng();
        let mut challenge = [0u8; CHALLENGE_LEN];
        rng.fill(&mut challenge);

        Self {
            origin: origin.into(),
            host: host.into(),
            resource_path: resource_path.into(),
            key1: generate_key(&mut rng),
            key2: generate_key(&mut rng),
            challenge,
            subprotocol: None,
            headers: Headers::new(),
            cookies: None,
        }
    }

    /// Proof the server must answer with.
    pub fn expected_proof(&self) -> Result<[u8; PROOF_LEN]> {
        compute_proof(&self.key1, &self.key2, &self.challenge)
    }

    /// Serialize head + challenge.
    pub fn to_bytes(&self) -> Bytes {
        let mut head = format!(
            "GET {} HTTP/1.1\r\n\
             Upgrade: WebSocket\r\n\
             Connection: Upgrade\r\n\
             Origin: {}\r\n\
             Host: {}\r\n\
             Sec-WebSocket-Key1: {}\r\n\
             Sec-WebSocket-Key2: {}\r\n",
            self.resource_path, self.origin, self.host, self.key1, self.key2
        );
        if let Some(cookies) = self.cookies.as_ref().filter(|c| !c.is_empty()) {
            head.push_str(&format!("Cookie: {cookies}\r\n"));
        }
        if let Some(proto) = &self.subprotocol {
            head.push_str(&format!("Sec-WebSocket-Protocol: {proto}\r\n"));
        }
        for (name, value) in self.headers.iter() {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str("\r\n");

        let mut out = BytesMut::with_capacity(head.len() + CHALLENGE_LEN);
        out.put_slice(head.as_bytes());
        out.put_slice(&self.challenge);
        out.freeze()
    }
}

/// Build a client request with random keys and challenge.
///
/// Returns the wire bytes together with the handshake, which holds the
/// challenge and both keys needed to check the server's proof.
pub fn build_client_request(
    host: &str,
    origin: &str,
    path: &str,
    headers: Headers,
) -> (Bytes, ClientHandshake) {
    let mut hs = ClientHandshake::generate(host, origin, path);
    hs.headers = headers;
    (hs.to_bytes(), hs)
}

/// Parse a full client request: head, blank line, then exactly 8 challenge bytes.
pub fn parse_client_request(raw: &[u8]) -> Result<ClientHandshake> {
    let split = raw.len().checked_sub(CHALLENGE_LEN).ok_or_else(|| {
        DraftWsError::HandshakeParse("request shorter than the 8-byte challenge".into())
    })?;
    let (head, tail) = raw.split_at(split);
    let mut challenge = [0u8; CHALLENGE_LEN];
    challenge.copy_from_slice(tail);

    let head = std::str::from_utf8(head)
        .map_err(|e| DraftWsError::HandshakeParse(format!("request head is not utf-8: {e}")))?;
    let head = head
        .strip_suffix("\r\n\r\n")
        .ok_or_else(|| DraftWsError::HandshakeParse("unterminated request headers".into()))?;

    let mut lines = head.split("\r\n");
    let resource_path = parse_request_line(lines.next().unwrap_or_default())?;

    let mut origin = None;
    let mut host = None;
    let mut key1 = None;
    let mut key2 = None;
    let mut subprotocol = None;
    let mut cookies = None;
    let mut headers = Headers::new();
    let mut fields = 0usize;

    for line in lines {
        let (name, value) = parse_header_line(line)?;
        fields += 1;
        match name.to_ascii_lowercase().as_str() {
            "sec-websocket-key1" => key1 = Some(value.to_string()),
            "sec-websocket-key2" => key2 = Some(value.to_string()),
            "sec-websocket-protocol" => subprotocol = Some(value.to_string()),
            "origin" => origin = Some(value.to_string()),
            "host" => host = Some(value.to_string()),
            "cookie" => cookies = Some(Cookies::parse(value)?),
            _ => {
                headers.insert(name, value);
            }
        }
    }

    if fields == 0 {
        return Err(DraftWsError::HandshakeParse("request has no header fields".into()));
    }

    let key1 = key1.ok_or_else(|| missing("Sec-WebSocket-Key1"))?;
    let key2 = key2.ok_or_else(|| missing("Sec-WebSocket-Key2"))?;
    key_number(&key1)?;
    key_number(&key2)?;

    let hs = ClientHandshake {
        origin: origin.ok_or_else(|| missing("Origin"))?,
        host: host.ok_or_else(|| missing("Host"))?,
        resource_path,
        key1,
        key2,
        challenge,
        subprotocol,
        headers,
        cookies,
    };
    tracing::trace!(path = %hs.resource_path, fields, "parsed client handshake");
    Ok(hs)
}

/// Server upgrade response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHandshake {
    pub origin: String,
    pub location: String,
    pub subprotocol: Option<String>,
    pub headers: Headers,
    pub proof: [u8; PROOF_LEN],
}

impl ServerHandshake {
    /// Answer `req`: echo origin and sub-protocol, derive location and proof.
    pub fn for_request(req: &ClientHandshake, secure: bool) -> Result<Self> {
        let scheme = if secure { "wss" } else { "ws" };
        Ok(Self {
            origin: req.origin.clone(),
            location: format!("{scheme}://{}{}", req.host, req.resource_path),
            subprotocol: req.subprotocol.clone(),
            headers: Headers::new(),
            proof: compute_proof(&req.key1, &req.key2, &req.challenge)?,
        })
    }

    /// Serialize head + raw proof.
    pub fn to_bytes(&self) -> Bytes {
        let mut head = format!(
            "{STATUS_LINE}\r\n\
             {UPGRADE_LINE}\r\n\
             {CONNECTION_LINE}\r\n\
             Sec-WebSocket-Origin: {}\r\n\
             Sec-WebSocket-Location: {}\r\n",
            self.origin, self.location
        );
        if let Some(proto) = &self.subprotocol {
            head.push_str(&format!("Sec-WebSocket-Protocol: {proto}\r\n"));
        }
        for (name, value) in self.headers.iter() {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str("\r\n");

        let mut out = BytesMut::with_capacity(head.len() + PROOF_LEN);
        out.put_slice(head.as_bytes());
        out.put_slice(&self.proof);
        out.freeze()
    }
}

/// Build the server's response bytes for a parsed request.
pub fn build_server_response(req: &ClientHandshake, secure: bool) -> Result<Bytes> {
    Ok(ServerHandshake::for_request(req, secure)?.to_bytes())
}

/// Parse a full server response: mandatory lines, optional headers, blank
/// line, then exactly 16 proof bytes.
///
/// A mismatch on any mandatory line is `HandshakeRejected`; framing problems
/// are `HandshakeParse`. Unrecognized or malformed trailing header lines are
/// skipped.
pub fn parse_server_response(raw: &[u8]) -> Result<ServerHandshake> {
    let split = raw.len().checked_sub(PROOF_LEN).ok_or_else(|| {
        DraftWsError::HandshakeParse("response shorter than the 16-byte proof".into())
    })?;
    let (head, tail) = raw.split_at(split);
    let mut proof = [0u8; PROOF_LEN];
    proof.copy_from_slice(tail);

    let head = std::str::from_utf8(head)
        .map_err(|e| DraftWsError::HandshakeParse(format!("response head is not utf-8: {e}")))?;
    let head = head
        .strip_suffix("\r\n\r\n")
        .ok_or_else(|| DraftWsError::HandshakeParse("unterminated response headers".into()))?;

    let mut lines = head.split("\r\n");
    for expected in [STATUS_LINE, UPGRADE_LINE, CONNECTION_LINE] {
        match lines.next() {
            Some(line) if line == expected => {}
            Some(line) => {
                return Err(DraftWsError::HandshakeRejected(format!(
                    "expected {expected:?}, got {line:?}"
                )))
            }
            None => {
                return Err(DraftWsError::HandshakeRejected(format!("missing {expected:?}")))
            }
        }
    }

    let mut hs = ServerHandshake {
        origin: String::new(),
        location: String::new(),
        subprotocol: None,
        headers: Headers::new(),
        proof,
    };
    for line in lines {
        let Ok((name, value)) = parse_header_line(line) else {
            tracing::trace!(line, "skipping malformed response header");
            continue;
        };
        match name.to_ascii_lowercase().as_str() {
            "sec-websocket-origin" => hs.origin = value.to_string(),
            "sec-websocket-location" => hs.location = value.to_string(),
            "sec-websocket-protocol" => hs.subprotocol = Some(value.to_string()),
            _ => {
                hs.headers.insert(name, value);
            }
        }
    }
    Ok(hs)
}

/// Check a server response against the proof the client expects.
pub fn validate_server_response(
    raw: &[u8],
    expected_proof: &[u8; PROOF_LEN],
) -> Result<ServerHandshake> {
    let hs = parse_server_response(raw)?;
    if &hs.proof != expected_proof {
        return Err(DraftWsError::HandshakeRejected("challenge proof mismatch".into()));
    }
    Ok(hs)
}

/// Derive the 16-byte proof from both keys and the challenge.
pub fn compute_proof(
    key1: &str,
    key2: &str,
    challenge: &[u8; CHALLENGE_LEN],
) -> Result<[u8; PROOF_LEN]> {
    let mut input = [0u8; 16];
    input[..4].copy_from_slice(&key_number(key1)?.to_be_bytes());
    input[4..8].copy_from_slice(&key_number(key2)?.to_be_bytes());
    input[8..].copy_from_slice(challenge);

    let digest = Md5::digest(input);
    let mut proof = [0u8; PROOF_LEN];
    proof.copy_from_slice(&digest);
    Ok(proof)
}

/// Offset just past the head's blank line, if the buffer holds one.
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEAD_TERMINATOR.len())
        .position(|w| w == HEAD_TERMINATOR)
        .map(|i| i + HEAD_TERMINATOR.len())
}

/// `digits(key) / spaces(key)`, truncated to 32 bits.
fn key_number(key: &str) -> Result<u32> {
    let digits: String = key.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err(DraftWsError::HandshakeParse(format!("key has no digits: {key:?}")));
    }
    let spaces = key.chars().filter(|c| *c == ' ').count() as u64;
    if spaces == 0 {
        return Err(DraftWsError::HandshakeParse(format!("key has no spaces: {key:?}")));
    }
    let n: u64 = digits
        .parse()
        .map_err(|_| DraftWsError::HandshakeParse(format!("key number overflows u64: {key:?}")))?;
    Ok((n / spaces) as u32)
}

fn generate_key<R: Rng + ?Sized>(rng: &mut R) -> String {
    let spaces: u32 = rng.random_range(1..=12);
    let number: u32 = rng.random_range(0..=u32::MAX / spaces);
    let product = u64::from(number) * u64::from(spaces);

    let mut key: Vec<char> = product.to_string().chars().collect();
    for _ in 0..rng.random_range(1..=12) {
        // printable, neither digit nor space: 0x21..=0x2F and 0x3A..=0x7E
        let r: u8 = rng.random_range(0..84);
        let c = if r < 15 { 0x21 + r } else { 0x3A + (r - 15) };
        let at = rng.random_range(0..=key.len());
        key.insert(at, char::from(c));
    }
    // never first or last
    for _ in 0..spaces {
        let at = rng.random_range(1..key.len());
        key.insert(at, ' ');
    }
    key.into_iter().collect()
}

fn parse_request_line(line: &str) -> Result<String> {
    let mut parts = line.split(' ');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(path), Some(version), None)
            if method.eq_ignore_ascii_case("GET")
                && !path.is_empty()
                && version.eq_ignore_ascii_case("HTTP/1.1") =>
        {
            Ok(path.to_string())
        }
        _ => Err(DraftWsError::HandshakeParse(format!("malformed request line: {line:?}"))),
    }
}

/// `Name: Value` with a non-empty name and value and one whitespace after the colon.
fn parse_header_line(line: &str) -> Result<(&str, &str)> {
    let malformed = || DraftWsError::HandshakeParse(format!("malformed header line: {line:?}"));
    let (name, rest) = line.split_once(':').ok_or_else(malformed)?;
    let value = rest
        .strip_prefix(' ')
        .or_else(|| rest.strip_prefix('\t'))
        .ok_or_else(malformed)?;
    if name.is_empty() || value.is_empty() {
        return Err(malformed());
    }
    Ok((name, value))
}

fn missing(header: &str) -> DraftWsError {
    DraftWsError::HandshakeParse(format!("missing {header} header"))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn generated_keys_are_well_formed() {
        let mut rng = rand::rng();
        for _ in 0..500 {
            let key = generate_key(&mut rng);
            assert!(!key.starts_with(' ') && !key.ends_with(' '), "key={key:?}");
            assert!(key.chars().any(|c| c.is_ascii_digit()), "key={key:?}");
            let spaces = key.chars().filter(|c| *c == ' ').count() as u64;
            let digits: u64 = key
                .chars()
                .filter(char::is_ascii_digit)
                .collect::<String>()
                .parse()
                .unwrap();
            assert!(spaces >= 1);
            assert_eq!(digits % spaces, 0, "key={key:?}");
            assert!(digits / spaces <= u64::from(u32::MAX));
        }
    }

    #[test]
    fn header_line_needs_space_after_colon() {
        assert!(parse_header_line("Host:example.com").is_err());
        assert!(parse_header_line(": value").is_err());
        assert!(parse_header_line("Host: ").is_err());
        assert_eq!(parse_header_line("X-A: b: c").unwrap(), ("X-A", "b: c"));
    }

    #[test]
    fn headers_replace_case_insensitively_in_place() {
        let mut h = Headers::new();
        h.insert("X-One", "1");
        h.insert("X-Two", "2");
        assert_eq!(h.insert("x-one", "uno"), Some("1".to_string()));
        let all: Vec<_> = h.iter().collect();
        assert_eq!(all, vec![("X-One", "uno"), ("X-Two", "2")]);
        assert_eq!(h.get("X-TWO"), Some("2"));
        assert_eq!(h.remove("x-two"), Some("2".to_string()));
        assert_eq!(h.len(), 1);
    }
}
