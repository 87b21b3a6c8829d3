//! Protocol module - wire format, framing, and FPDU types.
//!
//! This module implements the binary protocol:
//! - 6-byte header encoding/decoding
//! - TLV primitives with the 0xFF long-length escape
//! - [`Fpdu`] value model and the codec between it and wire frames
//! - Frame buffer for accumulating partial reads
//! - Builders for the requests a requester sends most

mod builder;
pub mod codec;
mod fpdu;
mod frame_buffer;
pub mod tlv;
mod wire_format;

pub use builder::{AccessType, ConnectBuilder, CreateBuilder, RecordFormat, SelectBuilder};
pub use fpdu::{Fpdu, Group, Leaf, ParameterValue, DATE_FORMAT};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    decode_header, encode_header, peek_length, Header, HEADER_SIZE, LENGTH_SIZE, MAX_FRAME_SIZE,
};
