//! Per-connection receive buffer and the frame decode loop.

use bytes::{Buf, BytesMut};

use crate::framing::{FrameConfig, FrameError, FrameHeader, HEADER_SIZE, decode_frame};

/// Append-only byte accumulator for one connection.
///
/// After every [`drain_frames`](Self::drain_frames) pass the buffer holds
/// exactly the prefix of a frame that has not fully arrived yet.
#[derive(Debug)]
pub struct ConnectionBuffer {
    buffer: BytesMut,
}

impl ConnectionBuffer {
    /// Create a buffer with the given initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Append freshly received bytes.
    pub fn append(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of buffered, not yet decoded bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Decode every complete frame at the front of the buffer.
    ///
    /// Each decoded frame is handed to `on_frame` and removed from the
    /// buffer. Returns the number of frames emitted, or the
    /// [`FrameError::Corrupt`] that stopped the loop. Pending outcomes leave
    /// the remaining bytes in place for the next delivery.
    pub fn drain_frames(
        &mut self,
        config: &FrameConfig,
        mut on_frame: impl FnMut(FrameHeader, bytes::Bytes),
    ) -> Result<usize, FrameError> {
        let mut emitted = 0;
        while self.buffer.len() >= HEADER_SIZE {
            match decode_frame(&self.buffer, config) {
                Ok((body_length, header)) => {
                    self.buffer.advance(HEADER_SIZE);
                    let body = self.buffer.split_to(body_length).freeze();
                    on_frame(header, body);
                    emitted += 1;
                }
                Err(e) if e.is_pending() => {
                    if let FrameError::Incomplete { needed, available } = e {
                        self.buffer.reserve(needed - available);
                    }
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(emitted)
    }
}
