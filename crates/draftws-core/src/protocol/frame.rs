//! Byte-stream framing: `0x00 <utf-8 payload> 0xFF`.
//!
//! Decoding rules:
//! - `0x00` is a start marker and never payload. Every other byte except
//!   `0xFF` is payload, even when no start marker preceded it.
//! - `0xFF` completes the frame. An empty frame yields an empty message.
//! - Between frames, `0xFF 0x00` is the close signal; a lone `0xFF` there
//!   completes an empty frame.
//! - A completed payload must be valid UTF-8 and no longer than the configured limit.
//!
//! The decoder never panics. After an error it resynchronizes at the next frame
//! boundary, so a caller may choose to keep feeding it.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{DraftWsError, Result};

/// Frame start marker.
pub const FRAME_START: u8 = 0x00;
/// Frame end marker.
pub const FRAME_END: u8 = 0xFF;
/// Close signal.
pub const CLOSE_FRAME: [u8; 2] = [0xFF, 0x00];

/// Default payload limit (1 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Wrap a text payload in a frame.
pub fn encode_frame(payload: &str) -> Bytes {
    let mut out = BytesMut::with_capacity(payload.len() + 2);
    out.put_u8(FRAME_START);
    out.put_slice(payload.as_bytes());
    out.put_u8(FRAME_END);
    out.freeze()
}

/// One decoded unit from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete text frame.
    Message(String),
    /// The peer sent `0xFF 0x00`.
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    InFrame,
    /// Saw `0xFF` between frames: close signal if `0x00` follows,
    /// otherwise an empty frame.
    CloseStarted,
    /// Rest of an oversized frame is dropped up to its `0xFF`.
    Discarding,
    /// Close signal seen; further input is ignored.
    Closed,
}

/// Streaming frame decoder.
///
/// Feed raw reads with [`FrameDecoder::extend`], then drain complete frames
/// with [`FrameDecoder::next_frame`] until it returns `Ok(None)`.
#[derive(Debug)]
pub struct FrameDecoder {
    pending: BytesMut,
    payload: BytesMut,
    state: State,
    max_frame_bytes: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl FrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            pending: BytesMut::new(),
            payload: BytesMut::new(),
            state: State::Idle,
            max_frame_bytes: max_frame_bytes.max(1),
        }
    }

    /// Append raw bytes read from the stream.
    pub fn extend(&mut self, data: &[u8]) {
        if self.state != State::Closed {
            self.pending.extend_from_slice(data);
        }
    }

    /// True once the close signal has been decoded.
    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    /// Bytes of the frame currently being accumulated.
    pub fn partial_len(&self) -> usize {
        self.payload.len()
    }

    /// Next complete unit, `Ok(None)` when more input is needed.
    pub fn next_frame(&mut self) -> Result<Option<Decoded>> {
        while self.pending.has_remaining() {
            match self.state {
                State::Idle => match self.pending[0] {
                    FRAME_START => {
                        self.pending.advance(1);
                        self.state = State::InFrame;
                    }
                    FRAME_END => {
                        self.pending.advance(1);
                        self.state = State::CloseStarted;
                    }
                    // payload without a start marker; InFrame takes it as is
                    _ => self.state = State::InFrame,
                },
                State::CloseStarted => {
                    if self.pending[0] == FRAME_START {
                        self.state = State::Closed;
                        self.pending.clear();
                        return Ok(Some(Decoded::Close));
                    }
                    // byte stays pending for the next frame
                    self.state = State::Idle;
                    return Ok(Some(Decoded::Message(String::new())));
                }
                State::InFrame => {
                    let end = self.pending.iter().position(|b| *b == FRAME_END);
                    let chunk = self.pending.split_to(end.unwrap_or(self.pending.len()));
                    self.append_payload(&chunk)?;
                    if end.is_some() {
                        self.pending.advance(1);
                        self.state = State::Idle;
                        return self.finish_frame().map(Some);
                    }
                }
                State::Discarding => match self.pending.iter().position(|b| *b == FRAME_END) {
                    Some(end) => {
                        self.pending.advance(end + 1);
                        self.state = State::Idle;
                    }
                    None => self.pending.clear(),
                },
                State::Closed => {
                    self.pending.clear();
                }
            }
        }
        Ok(None)
    }

    fn append_payload(&mut self, chunk: &[u8]) -> Result<()> {
        let data = chunk.iter().filter(|b| **b != FRAME_START);
        let added = data.clone().count();
        if self.payload.len() + added > self.max_frame_bytes {
            self.payload.clear();
            self.state = State::Discarding;
            return Err(DraftWsError::ProtocolDecode(format!(
                "frame exceeds {} bytes",
                self.max_frame_bytes
            )));
        }
        self.payload.extend(data);
        Ok(())
    }

    fn finish_frame(&mut self) -> Result<Decoded> {
        let text = String::from_utf8(self.payload.split().to_vec())
            .map_err(|e| DraftWsError::ProtocolDecode(format!("frame is not utf-8: {e}")))?;
        Ok(Decoded::Message(text))
    }
}
