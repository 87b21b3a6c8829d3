//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForLength`: Need the 2-byte length prefix
//! - `WaitingForFrame`: Length known, need the rest of the frame
//!
//! # Example
//!
//! ```ignore
//! use pesit_engine::protocol::{codec, FrameBuffer};
//!
//! let mut buffer = FrameBuffer::new();
//!
//! // Data arrives in chunks from socket
//! for frame in buffer.push(&chunk)? {
//!     let fpdu = codec::decode(&frame)?;
//! }
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{peek_length, HEADER_SIZE, MAX_FRAME_SIZE};
use crate::error::{FormatError, Result};

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for the length prefix.
    WaitingForLength,
    /// Length parsed, waiting until the whole frame is buffered.
    WaitingForFrame { length: usize },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
///
/// Frames are returned whole (length prefix included) so they can be handed
/// straight to [`codec::decode`](super::codec::decode).
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed frame size.
    max_frame_size: usize,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max frame: 65535 bytes.
    pub fn new() -> Self {
        Self::with_max_frame(MAX_FRAME_SIZE)
    }

    /// Create a new frame buffer with a lower frame size ceiling.
    pub fn with_max_frame(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForLength,
            max_frame_size: max_frame_size.min(MAX_FRAME_SIZE),
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Partial data is buffered internally for the next push.
    ///
    /// # Errors
    ///
    /// Returns error if a length prefix is below the header size or above
    /// the configured maximum. The buffer cannot recover from this; the
    /// connection should be dropped.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Try to extract a single frame from the buffer.
    fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        match self.state {
            State::WaitingForLength => {
                let Some(length) = peek_length(&self.buffer) else {
                    return Ok(None);
                };

                if length < HEADER_SIZE {
                    return Err(FormatError::LengthMismatch {
                        declared: length,
                        actual: HEADER_SIZE,
                    }
                    .into());
                }
                if length > self.max_frame_size {
                    return Err(FormatError::FrameTooLarge(length).into());
                }

                self.state = State::WaitingForFrame { length };
                self.try_extract_one()
            }

            State::WaitingForFrame { length } => {
                if self.buffer.len() < length {
                    return Ok(None);
                }

                let frame = self.buffer.split_to(length).freeze();
                self.state = State::WaitingForLength;
                Ok(Some(frame))
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForLength;
    }

    /// Bytes still needed before the next frame completes, if known.
    pub fn pending_frame_len(&self) -> Option<usize> {
        match self.state {
            State::WaitingForLength => None,
            State::WaitingForFrame { length } => Some(length.saturating_sub(self.buffer.len())),
        }
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::WaitingForLength => "WaitingForLength",
            State::WaitingForFrame { .. } => "WaitingForFrame",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FpduKind;
    use crate::protocol::{codec, Fpdu};

    fn data_frame(payload: &[u8]) -> Vec<u8> {
        codec::encode(&Fpdu::data_frame(FpduKind::Dtf, payload.to_vec()))
            .unwrap()
            .to_vec()
    }

    #[test]
    fn test_single_complete_frame() {
        let mut buffer = FrameBuffer::new();
        let bytes = data_frame(b"hello");

        let frames = buffer.push(&bytes).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], &bytes[..]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut buffer = FrameBuffer::new();
        let mut combined = data_frame(b"first");
        combined.extend(data_frame(b"second"));
        combined.extend(data_frame(b"third"));

        let frames = buffer.push(&combined).unwrap();

        assert_eq!(frames.len(), 3);
        let payloads: Vec<_> = frames
            .iter()
            .map(|f| codec::decode(f).unwrap().data().clone())
            .collect();
        assert_eq!(payloads[0], &b"first"[..]);
        assert_eq!(payloads[1], &b"second"[..]);
        assert_eq!(payloads[2], &b"third"[..]);
    }

    #[test]
    fn test_fragmented_length_prefix() {
        let mut buffer = FrameBuffer::new();
        let bytes = data_frame(b"abc");

        assert!(buffer.push(&bytes[..1]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "WaitingForLength");

        assert!(buffer.push(&bytes[1..4]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "WaitingForFrame");
        assert_eq!(buffer.pending_frame_len(), Some(bytes.len() - 4));

        let frames = buffer.push(&bytes[4..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(buffer.state_name(), "WaitingForLength");
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = FrameBuffer::new();
        let bytes = data_frame(b"drip");
        let mut frames = Vec::new();
        for b in &bytes {
            frames.extend(buffer.push(std::slice::from_ref(b)).unwrap());
        }
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], &bytes[..]);
    }

    #[test]
    fn test_frame_followed_by_partial() {
        let mut buffer = FrameBuffer::new();
        let mut bytes = data_frame(b"one");
        let second = data_frame(b"two");
        bytes.extend_from_slice(&second[..3]);

        let frames = buffer.push(&bytes).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(buffer.len(), 3);

        let frames = buffer.push(&second[3..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_length_below_header_rejected() {
        let mut buffer = FrameBuffer::new();
        let result = buffer.push(&[0, 3, 0xC0]);
        assert!(result.is_err());
    }

    #[test]
    fn test_max_frame_enforced() {
        let mut buffer = FrameBuffer::with_max_frame(64);
        let result = buffer.push(&[0, 65]);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("65 bytes is too large"));
    }

    #[test]
    fn test_clear_resets_state() {
        let mut buffer = FrameBuffer::new();
        buffer.push(&[0, 20, 0xC0]).unwrap();
        assert_eq!(buffer.state_name(), "WaitingForFrame");
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.state_name(), "WaitingForLength");
    }
}
