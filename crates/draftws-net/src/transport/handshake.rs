//! Opening handshake over a live stream.
//!
//! Both sides read a header block up to its blank line plus a fixed-size
//! trailer (8 challenge bytes from the client, 16 proof bytes from the
//! server). Anything read past the trailer already belongs to the framed
//! stream and is handed back as leftover.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use draftws_core::error::{DraftWsError, Result};
use draftws_core::protocol::handshake::{
    find_head_end, parse_client_request, validate_server_response, ClientHandshake,
    ServerHandshake, CHALLENGE_LEN, PROOF_LEN,
};

use crate::config::ServerSection;

/// Header block plus trailer, and whatever followed it.
#[derive(Debug)]
pub struct HeadRead {
    pub raw: Bytes,
    pub leftover: Bytes,
}

/// Read a head terminated by a blank line followed by `trailer_len` bytes.
///
/// Fails with `HandshakeParse` if the stream ends early or the head grows
/// past `max_bytes`.
pub async fn read_head<S>(stream: &mut S, trailer_len: usize, max_bytes: usize) -> Result<HeadRead>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);
    let mut head_end: Option<usize> = None;

    loop {
        if head_end.is_none() {
            head_end = find_head_end(&buf);
        }
        if let Some(end) = head_end {
            if buf.len() >= end + trailer_len {
                let raw = buf.split_to(end + trailer_len).freeze();
                return Ok(HeadRead {
                    raw,
                    leftover: buf.freeze(),
                });
            }
        } else if buf.len() > max_bytes {
            return Err(DraftWsError::HandshakeParse(format!(
                "handshake head exceeds {max_bytes} bytes"
            )));
        }

        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(DraftWsError::HandshakeParse(format!(
                "stream ended after {} handshake bytes",
                buf.len()
            )));
        }
    }
}

/// Server side: read and validate the request, then answer it.
///
/// Returns the parsed request and any framed bytes that arrived with it.
pub async fn accept_handshake<S>(
    stream: &mut S,
    cfg: &ServerSection,
) -> Result<(ClientHandshake, Bytes)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let head = read_head(stream, CHALLENGE_LEN, cfg.max_handshake_bytes).await?;
    let req = parse_client_request(&head.raw)?;

    if !cfg.origin_allowed(&req.origin) {
        return Err(DraftWsError::HandshakeRejected(format!(
            "origin {:?} is not allowed",
            req.origin
        )));
    }

    let response = ServerHandshake::for_request(&req, cfg.secure)?;
    stream.write_all(&response.to_bytes()).await?;
    stream.flush().await?;

    tracing::debug!(
        path = %req.resource_path,
        origin = %req.origin,
        "handshake accepted"
    );
    Ok((req, head.leftover))
}

/// Client side: send the request and check the server's proof.
pub async fn client_handshake<S>(
    stream: &mut S,
    req: &ClientHandshake,
    max_bytes: usize,
) -> Result<(ServerHandshake, Bytes)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let expected = req.expected_proof()?;
    stream.write_all(&req.to_bytes()).await?;
    stream.flush().await?;

    let head = read_head(stream, PROOF_LEN, max_bytes).await?;
    let response = validate_server_response(&head.raw, &expected)?;

    tracing::debug!(location = %response.location, "handshake completed");
    Ok((response, head.leftover))
}
