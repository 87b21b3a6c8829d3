//! Tag-length-value primitives.
//!
//! ```text
//! short form (value < 255 bytes):
//! ┌─────┬────────┬───────────┐
//! │ Tag │ Length │ Value ... │
//! └─────┴────────┴───────────┘
//! long form (value >= 255 bytes):
//! ┌─────┬──────┬───────────┬───────────┐
//! │ Tag │ 0xFF │ uint16 BE │ Value ... │
//! └─────┴──────┴───────────┴───────────┘
//! ```

use bytes::{BufMut, BytesMut};

use crate::error::FormatError;

/// Length byte announcing a 2-byte length.
pub const ESCAPE: u8 = 0xFF;

/// Largest value the long form can describe.
pub const MAX_VALUE_LEN: usize = u16::MAX as usize;

/// Bytes a TLV with a `value_len`-byte value occupies.
#[inline]
pub fn encoded_len(value_len: usize) -> usize {
    if value_len < ESCAPE as usize {
        2 + value_len
    } else {
        4 + value_len
    }
}

/// Append one TLV to `buf`.
pub fn put(buf: &mut BytesMut, tag: u8, value: &[u8]) -> Result<(), FormatError> {
    if value.len() > MAX_VALUE_LEN {
        return Err(FormatError::FrameTooLarge(value.len()));
    }
    buf.reserve(encoded_len(value.len()));
    buf.put_u8(tag);
    if value.len() < ESCAPE as usize {
        buf.put_u8(value.len() as u8);
    } else {
        buf.put_u8(ESCAPE);
        buf.put_u16(value.len() as u16);
    }
    buf.put_slice(value);
    Ok(())
}

/// Iterator over the TLVs of a body.
///
/// Yields `(tag, value)` pairs borrowed from the input. Stops after the
/// first error.
pub struct TlvReader<'a> {
    buf: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> TlvReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            failed: false,
        }
    }

    fn read_one(&mut self) -> Result<(u8, &'a [u8]), FormatError> {
        let rest = &self.buf[self.pos..];
        if rest.len() < 2 {
            return Err(FormatError::Truncated {
                what: "parameter header",
                needed: 2,
                available: rest.len(),
            });
        }
        let tag = rest[0];
        let (len, header_len) = if rest[1] == ESCAPE {
            if rest.len() < 4 {
                return Err(FormatError::Truncated {
                    what: "escaped length",
                    needed: 4,
                    available: rest.len(),
                });
            }
            (u16::from_be_bytes([rest[2], rest[3]]) as usize, 4)
        } else {
            (rest[1] as usize, 2)
        };
        let available = rest.len() - header_len;
        if available < len {
            return Err(FormatError::Truncated {
                what: "parameter value",
                needed: len,
                available,
            });
        }
        let value = &rest[header_len..header_len + len];
        self.pos += header_len + len;
        Ok((tag, value))
    }
}

impl<'a> Iterator for TlvReader<'a> {
    type Item = Result<(u8, &'a [u8]), FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.buf.len() {
            return None;
        }
        let item = self.read_one();
        self.failed = item.is_err();
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_one(tag: u8, value: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        put(&mut buf, tag, value).unwrap();
        buf
    }

    #[test]
    fn test_254_bytes_uses_short_form() {
        let value = vec![0xAB; 254];
        let buf = encode_one(99, &value);
        assert_eq!(buf.len(), 2 + 254);
        assert_eq!(buf[0], 99);
        assert_eq!(buf[1], 254);

        let (tag, decoded) = TlvReader::new(&buf).next().unwrap().unwrap();
        assert_eq!(tag, 99);
        assert_eq!(decoded, &value[..]);
    }

    #[test]
    fn test_255_bytes_uses_escape() {
        let value = vec![0x5A; 255];
        let buf = encode_one(91, &value);
        assert_eq!(buf.len(), 4 + 255);
        assert_eq!(buf[1], ESCAPE);
        assert_eq!(&buf[2..4], &[0x00, 0xFF]);

        let (tag, decoded) = TlvReader::new(&buf).next().unwrap().unwrap();
        assert_eq!(tag, 91);
        assert_eq!(decoded, &value[..]);
    }

    #[test]
    fn test_large_value_uses_two_byte_length() {
        let value = vec![1u8; 4096];
        let buf = encode_one(91, &value);
        assert_eq!(&buf[1..4], &[ESCAPE, 0x10, 0x00]);
        assert_eq!(encoded_len(4096), buf.len());
    }

    #[test]
    fn test_empty_value() {
        let buf = encode_one(20, &[]);
        assert_eq!(&buf[..], &[20, 0]);
        let (tag, value) = TlvReader::new(&buf).next().unwrap().unwrap();
        assert_eq!(tag, 20);
        assert!(value.is_empty());
    }

    #[test]
    fn test_sequence() {
        let mut buf = BytesMut::new();
        put(&mut buf, 3, b"LOOP").unwrap();
        put(&mut buf, 6, &[0, 2]).unwrap();
        let items: Vec<_> = TlvReader::new(&buf).collect::<Result<_, _>>().unwrap();
        assert_eq!(items, vec![(3, &b"LOOP"[..]), (6, &[0u8, 2][..])]);
    }

    #[test]
    fn test_truncated_value() {
        let buf = [12u8, 5, b'a', b'b'];
        let mut reader = TlvReader::new(&buf);
        let err = reader.next().unwrap().unwrap_err();
        assert_eq!(
            err,
            FormatError::Truncated {
                what: "parameter value",
                needed: 5,
                available: 2
            }
        );
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_truncated_escape() {
        let buf = [91u8, ESCAPE, 0x01];
        let err = TlvReader::new(&buf).next().unwrap().unwrap_err();
        assert!(matches!(err, FormatError::Truncated { what: "escaped length", .. }));
    }

    #[test]
    fn test_lone_tag() {
        let buf = [12u8];
        let err = TlvReader::new(&buf).next().unwrap().unwrap_err();
        assert!(matches!(err, FormatError::Truncated { what: "parameter header", .. }));
    }
}
