//! Length-prefixed framing for the data phase
//!
//! This module holds the length helpers and the `FrameCodec` used on both
//! halves of a connected socket.
//!
//! ## Frame Format
//!
//! ```text
//! +-----------+----------------+------------------+
//! | Tag (1B)  | Length (4B BE) | Payload (N bytes)|
//! +-----------+----------------+------------------+
//! ```
//!
//! `N` must be in `1..=max_size`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{LinkError, Result};
use crate::protocol::{FRAME_HEADER_LEN, MAX_PAYLOAD_SIZE};

/// Encode a payload length into its 4-byte wire form
pub fn encode_length(n: u32) -> [u8; 4] {
    n.to_be_bytes()
}

/// Decode a payload length from the first 4 bytes of `bytes`
pub fn decode_length(bytes: &[u8]) -> Result<u32> {
    let prefix: [u8; 4] = bytes
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or(LinkError::MalformedLength(bytes.len()))?;
    Ok(u32::from_be_bytes(prefix))
}

/// Reject zero-length and oversized payloads
pub fn validate_length(n: u32, max: u32) -> Result<()> {
    if n == 0 || n > max {
        return Err(LinkError::InvalidFrameSize { size: n, max });
    }
    Ok(())
}

/// Frame type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameTag {
    /// Opaque binary payload
    Bytes = 0x01,
    /// UTF-8 text payload
    Text = 0x02,
}

impl TryFrom<u8> for FrameTag {
    type Error = LinkError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(FrameTag::Bytes),
            0x02 => Ok(FrameTag::Text),
            other => Err(LinkError::UnknownTag(other)),
        }
    }
}

/// Outbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Bytes(Bytes),
    Text(String),
}

impl Frame {
    pub fn tag(&self) -> FrameTag {
        match self {
            Frame::Bytes(_) => FrameTag::Bytes,
            Frame::Text(_) => FrameTag::Text,
        }
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            Frame::Bytes(b) => b,
            Frame::Text(s) => s.as_bytes(),
        }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload().len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload().is_empty()
    }
}

/// Inbound frame, before text payloads are decoded
///
/// UTF-8 validation is left to the receiver so that a bad text payload is
/// reported as an application error rather than a framing error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub tag: FrameTag,
    pub payload: Bytes,
}

/// Codec for pairlink data frames
///
/// This codec handles:
/// - Tag validation
/// - Length-prefix framing and size limits
///
/// The header is checked as soon as it is buffered, so an unknown tag or an
/// invalid length is rejected without waiting for the declared payload.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Maximum allowed payload size
    max_size: u32,
}

impl FrameCodec {
    /// Create a new codec with the global payload ceiling
    pub fn new() -> Self {
        Self {
            max_size: MAX_PAYLOAD_SIZE,
        }
    }

    /// Create a codec with a lower payload ceiling
    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size.min(MAX_PAYLOAD_SIZE);
        self
    }

    pub fn max_size(&self) -> u32 {
        self.max_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = RawFrame;
    type Error = LinkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.is_empty() {
            return Ok(None);
        }

        // The tag is checked before anything else arrives
        let tag = FrameTag::try_from(src[0])?;

        if src.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        // Peek at the length (don't consume yet)
        let length = decode_length(&src[1..FRAME_HEADER_LEN])?;
        validate_length(length, self.max_size)?;

        let total_size = FRAME_HEADER_LEN + length as usize;
        if src.len() < total_size {
            src.reserve(total_size - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_LEN);
        let payload = src.split_to(length as usize).freeze();

        Ok(Some(RawFrame { tag, payload }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = LinkError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        let payload = item.payload();
        let length = u32::try_from(payload.len()).map_err(|_| LinkError::InvalidFrameSize {
            size: u32::MAX,
            max: self.max_size,
        })?;
        validate_length(length, self.max_size)?;

        dst.reserve(FRAME_HEADER_LEN + payload.len());
        dst.put_u8(item.tag() as u8);
        dst.put_slice(&encode_length(length));
        dst.put_slice(payload);

        Ok(())
    }
}
