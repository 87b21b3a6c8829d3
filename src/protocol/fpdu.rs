//! FPDU value model.
//!
//! An [`Fpdu`] is one message: its catalog type, the two connection ids, and
//! either an ordered parameter list or, for the data-frame family, a raw
//! payload. Parameters form a two-level structure: a [`Group`] holds
//! [`Leaf`] values only.

use bytes::Bytes;
use chrono::NaiveDateTime;

use crate::catalog::{self, FpduKind, ValueKind, Width};
use crate::diagnostic::Diagnostic;
use crate::error::FormatError;

/// Wire layout of date parameters.
pub const DATE_FORMAT: &str = "%y%m%d%H%M%S";

/// A single PI value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leaf {
    id: u8,
    value: Bytes,
}

impl Leaf {
    /// Raw bytes, taken as-is.
    pub fn new(id: u8, value: impl Into<Bytes>) -> Self {
        Self {
            id,
            value: value.into(),
        }
    }

    /// Big-endian integer in the PI's nominal width.
    ///
    /// Values wider than the field keep their low-order bytes.
    pub fn numeric(id: u8, value: u64) -> Self {
        let width = match catalog::parameter(id).map(|p| p.width) {
            Some(Width::Fixed(n)) => n.min(8),
            _ => minimal_width(value),
        };
        let bytes = value.to_be_bytes();
        Self::new(id, Bytes::copy_from_slice(&bytes[8 - width..]))
    }

    /// Single-octet value.
    pub fn flag(id: u8, value: u8) -> Self {
        Self::new(id, Bytes::copy_from_slice(&[value]))
    }

    /// Text, truncated to the nominal width and space-padded when fixed.
    pub fn text(id: u8, value: &str) -> Self {
        let mut bytes = value.as_bytes().to_vec();
        match catalog::parameter(id).map(|p| p.width) {
            Some(Width::Fixed(n)) => bytes.resize(n, b' '),
            Some(Width::UpTo(n)) => bytes.truncate(n),
            _ => {}
        }
        Self::new(id, bytes)
    }

    /// Date/time as `yyMMddHHmmss`.
    pub fn date(id: u8, value: NaiveDateTime) -> Self {
        Self::new(id, value.format(DATE_FORMAT).to_string().into_bytes())
    }

    /// The 3-byte diagnostic value (PI 2).
    pub fn diagnostic(diag: Diagnostic) -> Self {
        Self::new(catalog::pi::DIAGNOSTIC, Bytes::copy_from_slice(&diag.encode()))
    }

    #[inline]
    pub fn id(&self) -> u8 {
        self.id
    }

    #[inline]
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Interpret as a big-endian unsigned integer (at most 8 bytes).
    pub fn as_u64(&self) -> Option<u64> {
        if self.value.is_empty() || self.value.len() > 8 {
            return None;
        }
        Some(self.value.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
    }

    /// Interpret as text, trailing padding removed.
    pub fn as_text(&self) -> String {
        String::from_utf8_lossy(&self.value)
            .trim_end_matches([' ', '\0'])
            .to_string()
    }

    /// Interpret as a `yyMMddHHmmss` date.
    pub fn as_date(&self) -> Option<NaiveDateTime> {
        let text = std::str::from_utf8(&self.value).ok()?;
        NaiveDateTime::parse_from_str(text, DATE_FORMAT).ok()
    }

    /// Check the value against the catalog entry.
    pub(crate) fn check_width(&self) -> Result<(), FormatError> {
        let def = catalog::parameter(self.id).ok_or(FormatError::UnknownParameter(self.id))?;
        if let Some(max) = def.width.max() {
            if self.value.len() > max {
                return Err(FormatError::ValueTooLong {
                    id: self.id,
                    len: self.value.len(),
                    max,
                });
            }
        }
        if def.kind == ValueKind::Numeric && self.value.len() > 8 {
            return Err(FormatError::ValueTooLong {
                id: self.id,
                len: self.value.len(),
                max: 8,
            });
        }
        Ok(())
    }
}

fn minimal_width(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(8).max(1)
}

/// A PGI with its member values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    id: u8,
    members: Vec<Leaf>,
}

impl Group {
    pub fn new(id: u8) -> Self {
        Self {
            id,
            members: Vec::new(),
        }
    }

    /// Builder-style member append.
    pub fn with(mut self, leaf: Leaf) -> Self {
        self.members.push(leaf);
        self
    }

    pub fn push(&mut self, leaf: Leaf) {
        self.members.push(leaf);
    }

    #[inline]
    pub fn id(&self) -> u8 {
        self.id
    }

    #[inline]
    pub fn members(&self) -> &[Leaf] {
        &self.members
    }

    pub fn member(&self, id: u8) -> Option<&Leaf> {
        self.members.iter().find(|leaf| leaf.id == id)
    }
}

/// One entry of an FPDU's parameter list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterValue {
    Leaf(Leaf),
    Group(Group),
}

impl ParameterValue {
    #[inline]
    pub fn id(&self) -> u8 {
        match self {
            ParameterValue::Leaf(leaf) => leaf.id,
            ParameterValue::Group(group) => group.id,
        }
    }
}

impl From<Leaf> for ParameterValue {
    fn from(leaf: Leaf) -> Self {
        ParameterValue::Leaf(leaf)
    }
}

impl From<Group> for ParameterValue {
    fn from(group: Group) -> Self {
        ParameterValue::Group(group)
    }
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fpdu {
    kind: FpduKind,
    dst: u8,
    src: u8,
    params: Vec<ParameterValue>,
    data: Bytes,
}

impl Fpdu {
    /// Empty message of `kind` with both ids zero.
    pub fn new(kind: FpduKind) -> Self {
        Self {
            kind,
            dst: 0,
            src: 0,
            params: Vec::new(),
            data: Bytes::new(),
        }
    }

    /// Data-frame family message carrying `payload`.
    pub fn data_frame(kind: FpduKind, payload: impl Into<Bytes>) -> Self {
        debug_assert!(kind.is_data());
        Self {
            data: payload.into(),
            ..Self::new(kind)
        }
    }

    /// Set destination and source connection ids.
    pub fn with_ids(mut self, dst: u8, src: u8) -> Self {
        self.dst = dst;
        self.src = src;
        self
    }

    /// Append a parameter.
    pub fn with(mut self, param: impl Into<ParameterValue>) -> Self {
        self.params.push(param.into());
        self
    }

    /// Append a PI 2 diagnostic.
    pub fn with_diagnostic(self, diag: Diagnostic) -> Self {
        self.with(Leaf::diagnostic(diag))
    }

    pub(crate) fn from_parts(
        kind: FpduKind,
        dst: u8,
        src: u8,
        params: Vec<ParameterValue>,
        data: Bytes,
    ) -> Self {
        Self {
            kind,
            dst,
            src,
            params,
            data,
        }
    }

    #[inline]
    pub fn kind(&self) -> FpduKind {
        self.kind
    }

    #[inline]
    pub fn dst(&self) -> u8 {
        self.dst
    }

    #[inline]
    pub fn src(&self) -> u8 {
        self.src
    }

    #[inline]
    pub fn params(&self) -> &[ParameterValue] {
        &self.params
    }

    /// Raw payload (empty outside the data-frame family).
    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Find a PI, at top level or inside any group.
    pub fn leaf(&self, id: u8) -> Option<&Leaf> {
        self.params.iter().find_map(|param| match param {
            ParameterValue::Leaf(leaf) if leaf.id == id => Some(leaf),
            ParameterValue::Group(group) => group.member(id),
            _ => None,
        })
    }

    /// Find a top-level PGI.
    pub fn group(&self, id: u8) -> Option<&Group> {
        self.params.iter().find_map(|param| match param {
            ParameterValue::Group(group) if group.id == id => Some(group),
            _ => None,
        })
    }

    #[inline]
    pub fn has(&self, id: u8) -> bool {
        self.leaf(id).is_some() || self.group(id).is_some()
    }

    /// Numeric value of a PI.
    pub fn number(&self, id: u8) -> Option<u64> {
        self.leaf(id).and_then(Leaf::as_u64)
    }

    /// Text value of a PI.
    pub fn text(&self, id: u8) -> Option<String> {
        self.leaf(id).map(Leaf::as_text)
    }

    /// First byte of a PI.
    pub fn flag(&self, id: u8) -> Option<u8> {
        self.leaf(id).and_then(|leaf| leaf.value.first().copied())
    }

    /// Decoded PI 2, if present and well-formed.
    pub fn diagnostic(&self) -> Option<Diagnostic> {
        self.leaf(catalog::pi::DIAGNOSTIC)
            .and_then(|leaf| Diagnostic::decode(&leaf.value).ok())
    }

    /// First mandatory parameter missing for this message's type.
    ///
    /// A present group is searched for its own mandatory members.
    pub fn missing_mandatory(&self) -> Option<u8> {
        for req in self.kind.requirements().iter().filter(|r| r.mandatory) {
            match catalog::group(req.id) {
                Some(def) => {
                    let Some(group) = self.group(req.id) else {
                        return Some(req.id);
                    };
                    if let Some(member) = def
                        .members
                        .iter()
                        .find(|m| m.mandatory && group.member(m.id).is_none())
                    {
                        return Some(member.id);
                    }
                }
                None => {
                    if self.leaf(req.id).is_none() {
                        return Some(req.id);
                    }
                }
            }
        }
        None
    }

    /// First PI whose value is longer than its catalog width.
    pub fn oversized_parameter(&self) -> Option<u8> {
        self.params
            .iter()
            .flat_map(|param| match param {
                ParameterValue::Leaf(leaf) => std::slice::from_ref(leaf),
                ParameterValue::Group(group) => &group.members[..],
            })
            .find(|leaf| leaf.check_width().is_err())
            .map(Leaf::id)
    }

    /// Check that this message may be encoded as-is.
    pub fn check_well_formed(&self) -> Result<(), FormatError> {
        let name = self.kind.name();
        if !self.kind.is_data() && !self.data.is_empty() {
            return Err(FormatError::UnexpectedPayload(name));
        }
        for param in &self.params {
            if !self.kind.permits(param.id()) {
                return Err(FormatError::NotPermitted {
                    fpdu: name,
                    id: param.id(),
                });
            }
            match param {
                ParameterValue::Leaf(leaf) => leaf.check_width()?,
                ParameterValue::Group(group) => {
                    let def = catalog::group(group.id)
                        .ok_or(FormatError::UnknownParameter(group.id))?;
                    for leaf in &group.members {
                        if !def.contains(leaf.id) {
                            return Err(FormatError::NotInGroup {
                                group: group.id,
                                id: leaf.id,
                            });
                        }
                        leaf.check_width()?;
                    }
                }
            }
        }
        match self.missing_mandatory() {
            Some(id) => Err(FormatError::MissingMandatory { fpdu: name, id }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{pgi, pi};

    #[test]
    fn test_numeric_uses_nominal_width() {
        assert_eq!(&Leaf::numeric(pi::TRANSFER_ID, 1).value()[..], &[0, 0, 1]);
        assert_eq!(&Leaf::numeric(pi::MAX_ENTITY_SIZE, 4096).value()[..], &[0x10, 0x00]);
        assert_eq!(Leaf::numeric(pi::BYTE_COUNT, 51).value().len(), 8);
        assert_eq!(Leaf::numeric(pi::BYTE_COUNT, 51).as_u64(), Some(51));
    }

    #[test]
    fn test_numeric_accepts_short_values() {
        let leaf = Leaf::new(pi::VERSION, vec![2u8]);
        assert_eq!(leaf.as_u64(), Some(2));
    }

    #[test]
    fn test_text_truncated_to_width() {
        let long = "A".repeat(40);
        let leaf = Leaf::text(pi::FILENAME, &long);
        assert_eq!(leaf.value().len(), 24);
        assert_eq!(Leaf::text(pi::REQUESTOR, "LOOP").as_text(), "LOOP");
    }

    #[test]
    fn test_date_format() {
        let when = chrono::NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(14, 5, 30)
            .unwrap();
        let leaf = Leaf::date(pi::CREATION_DATE, when);
        assert_eq!(&leaf.value()[..], b"240309140530");
        assert_eq!(leaf.as_date(), Some(when));
    }

    #[test]
    fn test_leaf_lookup_sees_into_groups() {
        let fpdu = Fpdu::new(FpduKind::Create).with(
            Group::new(pgi::FILE_ID)
                .with(Leaf::numeric(pi::FILE_TYPE, 0))
                .with(Leaf::text(pi::FILENAME, "FILE")),
        );
        assert_eq!(fpdu.text(pi::FILENAME).as_deref(), Some("FILE"));
        assert!(fpdu.group(pgi::FILE_ID).is_some());
        assert!(fpdu.group(pi::FILENAME).is_none());
    }

    #[test]
    fn test_missing_mandatory_group_member() {
        let fpdu = Fpdu::new(FpduKind::Create)
            .with(Group::new(pgi::FILE_ID).with(Leaf::numeric(pi::FILE_TYPE, 0)));
        assert_eq!(fpdu.missing_mandatory(), Some(pi::FILENAME));
    }

    #[test]
    fn test_missing_mandatory_top_level() {
        let fpdu = Fpdu::new(FpduKind::Syn);
        assert_eq!(fpdu.missing_mandatory(), Some(pi::SYNC_NUMBER));
        let fpdu = fpdu.with(Leaf::numeric(pi::SYNC_NUMBER, 1));
        assert_eq!(fpdu.missing_mandatory(), None);
    }

    #[test]
    fn test_not_permitted() {
        let fpdu = Fpdu::new(FpduKind::Write).with(Leaf::numeric(pi::SYNC_NUMBER, 1));
        assert_eq!(
            fpdu.check_well_formed(),
            Err(FormatError::NotPermitted {
                fpdu: "WRITE",
                id: pi::SYNC_NUMBER
            })
        );
    }

    #[test]
    fn test_foreign_group_member() {
        let fpdu = Fpdu::new(FpduKind::AckSelect).with(
            Group::new(pgi::PHYSICAL_ATTRIBUTES).with(Leaf::text(pi::FILENAME, "X")),
        );
        assert!(matches!(
            fpdu.check_well_formed(),
            Err(FormatError::NotInGroup { group: 40, id: 12 })
        ));
    }

    #[test]
    fn test_payload_on_control_frame() {
        let mut fpdu = Fpdu::new(FpduKind::Write);
        fpdu.data = Bytes::from_static(b"x");
        assert_eq!(
            fpdu.check_well_formed(),
            Err(FormatError::UnexpectedPayload("WRITE"))
        );
    }

    #[test]
    fn test_diagnostic_accessor() {
        let fpdu = Fpdu::new(FpduKind::Abort).with_diagnostic(Diagnostic::D2_220);
        assert_eq!(fpdu.diagnostic(), Some(Diagnostic::D2_220));
        assert!(fpdu.check_well_formed().is_ok());
    }

    #[test]
    fn test_oversized_parameter() {
        let fine = Fpdu::new(FpduKind::Syn).with(Leaf::numeric(pi::SYNC_NUMBER, 9));
        assert_eq!(fine.oversized_parameter(), None);

        let wide = Fpdu::new(FpduKind::Syn).with(Leaf::new(pi::SYNC_NUMBER, vec![1u8, 0, 0, 0, 1]));
        assert_eq!(wide.oversized_parameter(), Some(pi::SYNC_NUMBER));

        let nested = Fpdu::new(FpduKind::Msg).with(
            Group::new(pgi::FILE_ID)
                .with(Leaf::numeric(pi::FILE_TYPE, 0))
                .with(Leaf::new(pi::FILENAME, vec![b'F'; 30])),
        );
        assert_eq!(nested.oversized_parameter(), Some(pi::FILENAME));
    }
}
