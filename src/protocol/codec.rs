//! Binary frame codec for the presence IPC channel.
//!
//! Every frame is an 8-byte header followed by a UTF-8 JSON payload:
//!
//! ```text
//! +----------------------+----------------------+-----------------+
//! | opcode (u32, LE)     | length (u32, LE)     | payload bytes   |
//! +----------------------+----------------------+-----------------+
//! ```
//!
//! `length` counts payload *bytes*, so it is always taken after the JSON
//! text has been encoded. No maximum frame size is enforced.
//!
//! # Usage
//!
//! Use [`FrameCodec`] with [`tokio_util::codec::FramedRead`] on the read
//! half; the write path encodes with [`Frame::encode`] and writes the bytes
//! under the client's write lock.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::{AppError, Result};

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 8;

/// Wire opcodes understood by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    /// Client hello; first frame on a new connection.
    Handshake = 0,
    /// JSON command, response or event.
    Message = 1,
    /// Orderly shutdown, from either side.
    Close = 2,
}

impl Opcode {
    /// Numeric wire value.
    #[must_use]
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Map a wire value to a known opcode.
    #[must_use]
    pub fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Handshake),
            1 => Some(Self::Message),
            2 => Some(Self::Close),
            _ => None,
        }
    }
}

/// One opcode-tagged, length-prefixed unit on the wire.
///
/// `opcode` is kept as the raw `u32` so frames with opcodes this client does
/// not speak (ping/pong) still decode and can be skipped by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw opcode.
    pub opcode: u32,
    /// Raw payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Frame with an arbitrary payload.
    #[must_use]
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: opcode.as_u32(),
            payload: payload.into(),
        }
    }

    /// Frame carrying `value` serialized as compact JSON.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] if serialization fails.
    pub fn json<T: Serialize>(opcode: Opcode, value: &T) -> Result<Self> {
        Ok(Self::new(opcode, serde_json::to_vec(value)?))
    }

    /// Known opcode, if any.
    #[must_use]
    pub fn kind(&self) -> Option<Opcode> {
        Opcode::from_u32(self.opcode)
    }

    /// Header followed by payload, ready for a single `write_all`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ArgumentError`] if the payload is longer than
    /// `u32::MAX` bytes.
    pub fn encode(&self) -> Result<BytesMut> {
        let mut dst = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        FrameCodec.encode(self.clone(), &mut dst)?;
        Ok(dst)
    }

    /// Parse the payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] if the payload is not valid JSON for `T`.
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Length-prefixed frame codec.
///
/// # Decoder
///
/// Buffers until the 8-byte header and the declared payload length are both
/// available. At EOF, a partially received frame yields
/// [`AppError::TruncatedFrame`].
///
/// # Encoder
///
/// Writes header and payload contiguously into `dst`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a new codec.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < HEADER_LEN {
            src.reserve(HEADER_LEN - src.len());
            return Ok(None);
        }

        let mut header = &src[..HEADER_LEN];
        let opcode = header.get_u32_le();
        let length = header.get_u32_le() as usize;

        let total = HEADER_LEN + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(length).freeze();
        Ok(Some(Frame { opcode, payload }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(AppError::TruncatedFrame(describe_partial(src))),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = AppError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        let length = u32::try_from(item.payload.len()).map_err(|_| {
            AppError::ArgumentError(format!(
                "payload of {} bytes exceeds frame length field",
                item.payload.len()
            ))
        })?;

        dst.reserve(HEADER_LEN + item.payload.len());
        dst.put_u32_le(item.opcode);
        dst.put_u32_le(length);
        dst.extend_from_slice(&item.payload);
        Ok(())
    }
}

/// Encode `payload` under `opcode` into a standalone byte vector.
///
/// # Errors
///
/// Returns [`AppError::ArgumentError`] if the payload is longer than
/// `u32::MAX` bytes.
pub fn encode(opcode: u32, payload: &[u8]) -> Result<Vec<u8>> {
    let mut dst = BytesMut::new();
    FrameCodec.encode(
        Frame {
            opcode,
            payload: Bytes::copy_from_slice(payload),
        },
        &mut dst,
    )?;
    Ok(dst.to_vec())
}

/// Encode `frame` and write it to `writer` as one contiguous unit, then flush.
///
/// Callers sharing a writer must hold the write lock across this call so
/// that no other frame's bytes interleave.
///
/// # Errors
///
/// Returns [`AppError::ArgumentError`] for an oversized payload and
/// [`AppError::ConnectionClosed`] if the write fails.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let bytes = frame.encode()?;
    writer
        .write_all(&bytes)
        .await
        .map_err(|e| AppError::ConnectionClosed(format!("write failed: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| AppError::ConnectionClosed(format!("flush failed: {e}")))
}

// ── Private helper ────────────────────────────────────────────────────────────

fn describe_partial(src: &BytesMut) -> String {
    if src.len() < HEADER_LEN {
        return format!(
            "stream ended after {} of {HEADER_LEN} header bytes",
            src.len()
        );
    }
    let mut header = &src[..HEADER_LEN];
    let _opcode = header.get_u32_le();
    let declared = header.get_u32_le();
    format!(
        "stream ended after {} of {declared} payload bytes",
        src.len() - HEADER_LEN
    )
}
