//! FPDU codec.
//!
//! Converts between [`Fpdu`] and the byte-exact wire frame: header, then
//! either the raw payload (data-frame family) or a TLV sequence in which a
//! PGI tag wraps the TLVs of its member PIs.

use bytes::{BufMut, Bytes, BytesMut};

use super::fpdu::{Fpdu, Group, Leaf, ParameterValue};
use super::tlv::{self, TlvReader};
use super::wire_format::{Header, HEADER_SIZE};
use crate::catalog;
use crate::error::FormatError;

/// Encode a well-formed FPDU into a complete frame.
///
/// # Example
///
/// ```
/// use pesit_engine::catalog::FpduKind;
/// use pesit_engine::protocol::{codec, Fpdu};
///
/// let frame = codec::encode(&Fpdu::new(FpduKind::Write).with_ids(1, 0)).unwrap();
/// assert_eq!(&frame[..], &[0, 6, 0xC0, 0x02, 1, 0]);
/// ```
pub fn encode(fpdu: &Fpdu) -> Result<Bytes, FormatError> {
    let (header, body) = encode_parts(fpdu)?;
    let mut frame = BytesMut::with_capacity(HEADER_SIZE + body.len());
    frame.put_slice(&header);
    frame.put_slice(&body);
    Ok(frame.freeze())
}

/// Encode into header bytes and body, for scatter/gather writes.
pub fn encode_parts(fpdu: &Fpdu) -> Result<([u8; HEADER_SIZE], Bytes), FormatError> {
    fpdu.check_well_formed()?;
    let body = if fpdu.kind().is_data() {
        fpdu.data().clone()
    } else {
        encode_params(fpdu.params())?
    };
    let header = Header::for_kind(fpdu.kind(), fpdu.dst(), fpdu.src(), body.len())?;
    Ok((header.encode(), body))
}

fn encode_params(params: &[ParameterValue]) -> Result<Bytes, FormatError> {
    let mut body = BytesMut::new();
    for param in params {
        match param {
            ParameterValue::Leaf(leaf) => tlv::put(&mut body, leaf.id(), leaf.value())?,
            ParameterValue::Group(group) => {
                let mut inner = BytesMut::new();
                for leaf in group.members() {
                    tlv::put(&mut inner, leaf.id(), leaf.value())?;
                }
                tlv::put(&mut body, group.id(), &inner)?;
            }
        }
    }
    Ok(body.freeze())
}

/// Decode one complete frame.
///
/// The buffer must hold exactly the frame: its length must equal the
/// header's length field.
pub fn decode(frame: &[u8]) -> Result<Fpdu, FormatError> {
    let header = Header::decode(frame).ok_or(FormatError::Truncated {
        what: "header",
        needed: HEADER_SIZE,
        available: frame.len(),
    })?;
    if header.length as usize != frame.len() {
        return Err(FormatError::LengthMismatch {
            declared: header.length as usize,
            actual: frame.len(),
        });
    }
    let kind = header.validate()?;
    let body = &frame[HEADER_SIZE..];

    if kind.is_data() {
        return Ok(Fpdu::from_parts(
            kind,
            header.dst,
            header.src,
            Vec::new(),
            Bytes::copy_from_slice(body),
        ));
    }

    let mut params = Vec::new();
    for item in TlvReader::new(body) {
        let (tag, value) = item?;
        if catalog::parameter(tag).is_some() {
            params.push(ParameterValue::Leaf(Leaf::new(
                tag,
                Bytes::copy_from_slice(value),
            )));
        } else if let Some(def) = catalog::group(tag) {
            let mut group = Group::new(tag);
            for member in TlvReader::new(value) {
                let (id, member_value) = member?;
                if catalog::group(id).is_some() {
                    return Err(FormatError::NestedGroup(id));
                }
                if catalog::parameter(id).is_none() {
                    return Err(FormatError::UnknownParameter(id));
                }
                if !def.contains(id) {
                    return Err(FormatError::NotInGroup { group: tag, id });
                }
                group.push(Leaf::new(id, Bytes::copy_from_slice(member_value)));
            }
            params.push(ParameterValue::Group(group));
        } else {
            return Err(FormatError::UnknownParameter(tag));
        }
    }

    Ok(Fpdu::from_parts(
        kind,
        header.dst,
        header.src,
        params,
        Bytes::new(),
    ))
}
