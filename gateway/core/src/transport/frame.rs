//! Frame Codec
//!
//! Wire format for gateway frames: length-prefixed JSON with a CRC32
//! checksum.
//!
//! ```text
//! +----------------+----------------+------------------------------------------+
//! | Length (4)     | Checksum (4)   | JSON Payload (variable)                  |
//! | big-endian u32 | CRC32, BE      | ClientFrame or ServerFrame               |
//! +----------------+----------------+------------------------------------------+
//! ```
//!
//! Length counts the payload only. The length is checked against
//! [`MAX_FRAME_SIZE`] before any payload is buffered for decoding.

use serde::{de::DeserializeOwned, Serialize};

use super::TransportError;

/// Largest accepted payload (10 MiB)
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

const MIN_BUFFER_CAPACITY: usize = 4096;

/// Length + checksum
const HEADER_SIZE: usize = 8;

fn read_u32(bytes: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[..4]);
    u32::from_be_bytes(word)
}

/// Encode one frame
///
/// # Errors
///
/// `SerializationError` if the value cannot be serialized or the payload
/// exceeds [`MAX_FRAME_SIZE`].
pub fn encode<T: Serialize>(frame: &T) -> Result<Vec<u8>, TransportError> {
    let json =
        serde_json::to_vec(frame).map_err(|e| TransportError::SerializationError(e.to_string()))?;

    let len = u32::try_from(json.len())
        .ok()
        .filter(|_| json.len() <= MAX_FRAME_SIZE)
        .ok_or_else(|| {
            TransportError::SerializationError(format!(
                "Frame too large: {} bytes (max: {MAX_FRAME_SIZE})",
                json.len()
            ))
        })?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + json.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&crc32fast::hash(&json).to_be_bytes());
    buf.extend_from_slice(&json);
    Ok(buf)
}

/// Incremental frame decoder
///
/// Bytes are pushed as they are read from the socket; [`decode`](Self::decode)
/// yields each frame once it is complete.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    read_pos: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            read_pos: 0,
        }
    }

    /// Append received bytes
    pub fn push(&mut self, data: &[u8]) {
        // Compact once more than half the buffer has been consumed
        if self.read_pos > self.buffer.len() / 2 && self.read_pos > MIN_BUFFER_CAPACITY {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet decoded
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Decode the next complete frame
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    ///
    /// # Errors
    ///
    /// `ChecksumMismatch` on corruption, `SerializationError` on an
    /// oversized length or a payload that is not a valid frame. The stream
    /// cannot be resynchronized after an error.
    pub fn decode<T: DeserializeOwned>(&mut self) -> Result<Option<T>, TransportError> {
        let available = self.available();
        if available < HEADER_SIZE {
            return Ok(None);
        }

        let header = &self.buffer[self.read_pos..self.read_pos + HEADER_SIZE];
        let len = read_u32(header) as usize;
        let expected = read_u32(&header[4..]);

        if len > MAX_FRAME_SIZE {
            return Err(TransportError::SerializationError(format!(
                "Frame size {len} exceeds maximum {MAX_FRAME_SIZE}"
            )));
        }
        if available < HEADER_SIZE + len {
            return Ok(None);
        }

        let start = self.read_pos + HEADER_SIZE;
        let end = start + len;
        let payload = &self.buffer[start..end];

        let actual = crc32fast::hash(payload);
        if actual != expected {
            return Err(TransportError::ChecksumMismatch { expected, actual });
        }

        let frame = serde_json::from_slice(payload)
            .map_err(|e| TransportError::SerializationError(e.to_string()))?;
        self.read_pos = end;

        Ok(Some(frame))
    }
}
