//! Header-prefixed framing for the client byte stream.
//!
//! Every message on the wire is a fixed-size header followed by the body:
//!
//! ```text
//! +-------------+-----------------+------------------+------------------+----------------+
//! | message id  | body length     | player id (high) | player id (low)  |   body         |
//! | u16 BE      | u32 BE          | u64 BE           | u64 BE           | (length bytes) |
//! +-------------+-----------------+------------------+------------------+----------------+
//! ```
//!
//! The body length does **not** include the 22 header bytes. A message id of
//! 0 is never valid and marks the stream as corrupt.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::PlayerId;

/// Size of the encoded [`FrameHeader`] in bytes.
pub const HEADER_SIZE: usize = 22;

/// Configuration for the framing layer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum allowed body size in bytes. Default: 1 MB.
    pub max_body_size: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_body_size: 1_048_576,
        }
    }
}

/// Fixed-size header in front of every frame body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameHeader {
    /// Application message type; must be non-zero.
    pub message_id: u16,
    /// Number of body bytes following the header.
    pub body_length: u32,
    /// Originator correlation id.
    pub player_id: PlayerId,
}

impl FrameHeader {
    /// Header for an outgoing message; the length is filled in by [`encode_frame`].
    pub fn new(message_id: u16, player_id: PlayerId) -> Self {
        Self {
            message_id,
            body_length: 0,
            player_id,
        }
    }

    fn write_to(&self, dst: &mut BytesMut) {
        dst.put_u16(self.message_id);
        dst.put_u32(self.body_length);
        dst.put_u64(self.player_id.high());
        dst.put_u64(self.player_id.low());
    }

    fn read_from(mut src: &[u8]) -> Self {
        let message_id = src.get_u16();
        let body_length = src.get_u32();
        let high = src.get_u64();
        let low = src.get_u64();
        Self {
            message_id,
            body_length,
            player_id: PlayerId::from_parts(high, low),
        }
    }
}

/// Outcomes of [`decode_frame`] that do not yield a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Fewer than [`HEADER_SIZE`] bytes are buffered.
    #[error("need more bytes for a frame header")]
    NeedMore,

    /// The header is valid but the body is not fully buffered yet.
    #[error("incomplete body: need {needed} bytes, have {available}")]
    Incomplete {
        /// Body bytes declared by the header.
        needed: usize,
        /// Body bytes currently buffered.
        available: usize,
    },

    /// The header cannot be a valid frame; the stream cannot be resynced.
    #[error("corrupt frame header: {0}")]
    Corrupt(&'static str),
}

impl FrameError {
    /// Whether the caller should simply wait for more bytes.
    pub fn is_pending(&self) -> bool {
        matches!(self, FrameError::NeedMore | FrameError::Incomplete { .. })
    }
}

/// Encode `header` and `body` into wire bytes.
///
/// `header.body_length` is overwritten with the actual body size. Callers
/// bound the body against [`FrameConfig::max_body_size`] beforehand; a body
/// longer than `u32::MAX` bytes cannot be framed.
pub fn encode_frame(mut header: FrameHeader, body: &[u8]) -> Bytes {
    header.body_length = wire_body_length(body.len());
    let mut out = BytesMut::with_capacity(HEADER_SIZE + body.len());
    header.write_to(&mut out);
    out.put_slice(body);
    out.freeze()
}

fn wire_body_length(len: usize) -> u32 {
    debug_assert!(
        len <= u32::MAX as usize,
        "frame body of {len} bytes does not fit the length field"
    );
    len as u32
}

/// Decode the frame at the start of `buf`.
///
/// On success returns the body length and header; the frame occupies
/// `HEADER_SIZE + body_length` bytes of `buf`. Nothing is consumed.
pub fn decode_frame(buf: &[u8], config: &FrameConfig) -> Result<(usize, FrameHeader), FrameError> {
    if buf.len() < HEADER_SIZE {
        return Err(FrameError::NeedMore);
    }

    let header = FrameHeader::read_from(&buf[..HEADER_SIZE]);

    if header.message_id == 0 {
        return Err(FrameError::Corrupt("message id 0"));
    }
    if header.body_length > config.max_body_size {
        return Err(FrameError::Corrupt("body length exceeds maximum"));
    }

    let body_length = header.body_length as usize;
    let available = buf.len() - HEADER_SIZE;
    if body_length > available {
        return Err(FrameError::Incomplete {
            needed: body_length,
            available,
        });
    }

    Ok((body_length, header))
}
