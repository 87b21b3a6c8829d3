//! Wire format encoding and decoding.
//!
//! Implements the 6-byte FPDU header:
//! ```text
//! ┌──────────┬───────┬───────┬─────────┬────────┐
//! │ Length   │ Phase │ Type  │ Dest ID │ Src ID │
//! │ 2 bytes  │ 1 byte│ 1 byte│ 1 byte  │ 1 byte │
//! │ uint16 BE│       │       │         │        │
//! └──────────┴───────┴───────┴─────────┴────────┘
//! ```
//!
//! The length counts the whole frame, its own two bytes included, so it is
//! never below `HEADER_SIZE`.

use crate::catalog::FpduKind;
use crate::error::FormatError;

/// Header size in bytes (fixed, exactly 6).
pub const HEADER_SIZE: usize = 6;

/// Size of the leading length field.
pub const LENGTH_SIZE: usize = 2;

/// Largest frame the length field can describe.
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Total frame length, self-inclusive.
    pub length: u16,
    /// Phase byte (see [`crate::catalog::phase`]).
    pub phase: u8,
    /// Type byte within the phase.
    pub code: u8,
    /// Destination connection id.
    pub dst: u8,
    /// Source connection id.
    pub src: u8,
}

impl Header {
    /// Create a new header.
    pub fn new(length: u16, phase: u8, code: u8, dst: u8, src: u8) -> Self {
        Self {
            length,
            phase,
            code,
            dst,
            src,
        }
    }

    /// Header for `kind` with a body of `body_len` bytes.
    ///
    /// Returns `FrameTooLarge` if the total does not fit the length field.
    pub fn for_kind(
        kind: FpduKind,
        dst: u8,
        src: u8,
        body_len: usize,
    ) -> Result<Self, FormatError> {
        let total = HEADER_SIZE + body_len;
        if total > MAX_FRAME_SIZE {
            return Err(FormatError::FrameTooLarge(total));
        }
        Ok(Self::new(total as u16, kind.phase(), kind.code(), dst, src))
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use pesit_engine::protocol::Header;
    ///
    /// let header = Header::new(6, 0xC0, 0x02, 1, 0);
    /// assert_eq!(header.encode(), [0, 6, 0xC0, 0x02, 1, 0]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (6 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..2].copy_from_slice(&self.length.to_be_bytes());
        buf[2] = self.phase;
        buf[3] = self.code;
        buf[4] = self.dst;
        buf[5] = self.src;
    }

    /// Decode header from bytes.
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            length: u16::from_be_bytes([buf[0], buf[1]]),
            phase: buf[2],
            code: buf[3],
            dst: buf[4],
            src: buf[5],
        })
    }

    /// Validate the header and resolve its type.
    ///
    /// Checks:
    /// - Length covers at least the header
    /// - (phase, type) is in the catalog
    pub fn validate(&self) -> Result<FpduKind, FormatError> {
        if (self.length as usize) < HEADER_SIZE {
            return Err(FormatError::LengthMismatch {
                declared: self.length as usize,
                actual: HEADER_SIZE,
            });
        }
        self.kind().ok_or(FormatError::UnknownType {
            phase: self.phase,
            kind: self.code,
        })
    }

    /// Catalog type, if known.
    #[inline]
    pub fn kind(&self) -> Option<FpduKind> {
        FpduKind::from_code(self.phase, self.code)
    }

    /// Number of body bytes announced by the length field.
    #[inline]
    pub fn body_len(&self) -> usize {
        (self.length as usize).saturating_sub(HEADER_SIZE)
    }
}

/// Read the length field without decoding the rest.
#[inline]
pub fn peek_length(buf: &[u8]) -> Option<usize> {
    if buf.len() < LENGTH_SIZE {
        return None;
    }
    Some(u16::from_be_bytes([buf[0], buf[1]]) as usize)
}

/// Encode a header to bytes (standalone function).
#[inline]
pub fn encode_header(header: &Header) -> [u8; HEADER_SIZE] {
    header.encode()
}

/// Decode a header from bytes (standalone function).
#[inline]
pub fn decode_header(buf: &[u8]) -> Option<Header> {
    Header::decode(buf)
}
