//! Parameter Identifier (PI) table.

/// How a PI value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Big-endian unsigned integer.
    Numeric,
    /// Character string.
    Text,
    /// Opaque octets (bit masks, seals, the diagnostic triple).
    Binary,
    /// `yyMMddHHmmss` digit string.
    Date,
    /// Single-octet symbolic value.
    Flag,
}

/// Nominal length of a PI value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    /// Exactly this many bytes when we encode.
    Fixed(usize),
    /// At most this many bytes.
    UpTo(usize),
    /// No limit beyond the TLV length field.
    Unbounded,
}

impl Width {
    /// Largest value accepted, if bounded.
    pub fn max(&self) -> Option<usize> {
        match *self {
            Width::Fixed(n) | Width::UpTo(n) => Some(n),
            Width::Unbounded => None,
        }
    }
}

/// Immutable PI catalog entry.
#[derive(Debug, PartialEq, Eq)]
pub struct ParameterDef {
    pub id: u8,
    pub name: &'static str,
    pub kind: ValueKind,
    pub width: Width,
}

/// PI id constants.
pub mod pi {
    pub const CRC: u8 = 1;
    pub const DIAGNOSTIC: u8 = 2;
    pub const REQUESTOR: u8 = 3;
    pub const SERVER: u8 = 4;
    pub const ACCESS_CONTROL: u8 = 5;
    pub const VERSION: u8 = 6;
    pub const SYNC_POINTS: u8 = 7;
    pub const FILE_TYPE: u8 = 11;
    pub const FILENAME: u8 = 12;
    pub const TRANSFER_ID: u8 = 13;
    pub const REQUESTED_ATTRIBUTES: u8 = 14;
    pub const RESTARTED: u8 = 15;
    pub const DATA_CODE: u8 = 16;
    pub const PRIORITY: u8 = 17;
    pub const RESTART_POINT: u8 = 18;
    pub const END_CODE: u8 = 19;
    pub const SYNC_NUMBER: u8 = 20;
    pub const COMPRESSION: u8 = 21;
    pub const ACCESS_TYPE: u8 = 22;
    pub const RESYNC: u8 = 23;
    pub const MAX_ENTITY_SIZE: u8 = 25;
    pub const TIMEOUT: u8 = 26;
    pub const BYTE_COUNT: u8 = 27;
    pub const ARTICLE_COUNT: u8 = 28;
    pub const DIAGNOSTIC_COMPLEMENT: u8 = 29;
    pub const ARTICLE_FORMAT: u8 = 31;
    pub const ARTICLE_LENGTH: u8 = 32;
    pub const ORGANIZATION: u8 = 33;
    pub const SIGNATURE_HANDLING: u8 = 34;
    pub const SIT_SEAL: u8 = 36;
    pub const LABEL: u8 = 37;
    pub const KEY_LENGTH: u8 = 38;
    pub const KEY_OFFSET: u8 = 39;
    pub const RESERVATION_UNIT: u8 = 41;
    pub const MAX_RESERVATION: u8 = 42;
    pub const CREATION_DATE: u8 = 51;
    pub const EXTRACTION_DATE: u8 = 52;
    pub const CLIENT_ID: u8 = 61;
    pub const BANK_ID: u8 = 62;
    pub const FILE_ACCESS_CONTROL: u8 = 63;
    pub const SERVER_DATE: u8 = 64;
    pub const AUTH_TYPE: u8 = 71;
    pub const AUTH_ELEMENTS: u8 = 72;
    pub const SEAL_TYPE: u8 = 73;
    pub const SEAL_ELEMENTS: u8 = 74;
    pub const CIPHER_TYPE: u8 = 75;
    pub const CIPHER_ELEMENTS: u8 = 76;
    pub const SIGNATURE_TYPE: u8 = 77;
    pub const SEAL: u8 = 78;
    pub const SIGNATURE: u8 = 79;
    pub const ACCREDITATION: u8 = 80;
    pub const SIGNATURE_RECEIPT: u8 = 81;
    pub const SECOND_SIGNATURE: u8 = 82;
    pub const SECOND_ACCREDITATION: u8 = 83;
    pub const MESSAGE: u8 = 91;
    pub const FREE_MESSAGE: u8 = 99;
}

const fn def(id: u8, name: &'static str, kind: ValueKind, width: Width) -> ParameterDef {
    ParameterDef {
        id,
        name,
        kind,
        width,
    }
}

use ValueKind::{Binary, Date, Flag, Numeric, Text};
use Width::{Fixed, Unbounded, UpTo};

// Sorted by id; lookups binary-search this slice.
static PARAMETERS: &[ParameterDef] = &[
    def(pi::CRC, "CRC usage", Flag, Fixed(1)),
    def(pi::DIAGNOSTIC, "Diagnostic", Binary, Fixed(3)),
    def(pi::REQUESTOR, "Requestor identification", Text, UpTo(24)),
    def(pi::SERVER, "Server identification", Text, UpTo(24)),
    def(pi::ACCESS_CONTROL, "Access control", Text, UpTo(16)),
    def(pi::VERSION, "Version number", Numeric, Fixed(2)),
    def(pi::SYNC_POINTS, "Sync points option", Binary, Fixed(3)),
    def(pi::FILE_TYPE, "File type", Numeric, Fixed(2)),
    def(pi::FILENAME, "Filename", Text, UpTo(24)),
    def(pi::TRANSFER_ID, "Transfer identifier", Numeric, Fixed(3)),
    def(pi::REQUESTED_ATTRIBUTES, "Requested attributes", Binary, Fixed(1)),
    def(pi::RESTARTED, "Transfer restarted", Flag, Fixed(1)),
    def(pi::DATA_CODE, "Data code", Flag, Fixed(1)),
    def(pi::PRIORITY, "Transfer priority", Flag, Fixed(1)),
    def(pi::RESTART_POINT, "Restart point", Numeric, Fixed(3)),
    def(pi::END_CODE, "End of transfer code", Flag, Fixed(1)),
    def(pi::SYNC_NUMBER, "Sync point number", Numeric, Fixed(3)),
    def(pi::COMPRESSION, "Compression", Binary, Fixed(2)),
    def(pi::ACCESS_TYPE, "Access type", Flag, Fixed(1)),
    def(pi::RESYNC, "Resynchronization", Flag, Fixed(1)),
    def(pi::MAX_ENTITY_SIZE, "Max data entity size", Numeric, Fixed(2)),
    def(pi::TIMEOUT, "Timeout", Numeric, Fixed(2)),
    def(pi::BYTE_COUNT, "Data byte count", Numeric, Fixed(8)),
    def(pi::ARTICLE_COUNT, "Article count", Numeric, Fixed(4)),
    def(pi::DIAGNOSTIC_COMPLEMENT, "Diagnostic complement", Binary, UpTo(254)),
    def(pi::ARTICLE_FORMAT, "Article format", Binary, Fixed(1)),
    def(pi::ARTICLE_LENGTH, "Article length", Numeric, Fixed(2)),
    def(pi::ORGANIZATION, "File organization", Flag, Fixed(1)),
    def(pi::SIGNATURE_HANDLING, "Signature handling", Numeric, Fixed(2)),
    def(pi::SIT_SEAL, "SIT seal", Binary, UpTo(64)),
    def(pi::LABEL, "File label", Text, UpTo(80)),
    def(pi::KEY_LENGTH, "Key length", Numeric, Fixed(2)),
    def(pi::KEY_OFFSET, "Key offset in record", Numeric, Fixed(2)),
    def(pi::RESERVATION_UNIT, "Reservation unit", Flag, Fixed(1)),
    def(pi::MAX_RESERVATION, "Max space reservation", Numeric, Fixed(4)),
    def(pi::CREATION_DATE, "Creation date", Date, Fixed(12)),
    def(pi::EXTRACTION_DATE, "Last extraction date", Date, Fixed(12)),
    def(pi::CLIENT_ID, "Client identifier", Text, UpTo(24)),
    def(pi::BANK_ID, "Bank identifier", Text, UpTo(24)),
    def(pi::FILE_ACCESS_CONTROL, "File access control", Text, UpTo(16)),
    def(pi::SERVER_DATE, "Server date", Date, Fixed(12)),
    def(pi::AUTH_TYPE, "Authentication type", Binary, Fixed(3)),
    def(pi::AUTH_ELEMENTS, "Authentication elements", Binary, Unbounded),
    def(pi::SEAL_TYPE, "Sealing type", Binary, Fixed(4)),
    def(pi::SEAL_ELEMENTS, "Sealing elements", Binary, Unbounded),
    def(pi::CIPHER_TYPE, "Encryption type", Binary, Fixed(4)),
    def(pi::CIPHER_ELEMENTS, "Encryption elements", Binary, Unbounded),
    def(pi::SIGNATURE_TYPE, "Signature type", Binary, Fixed(4)),
    def(pi::SEAL, "Seal", Binary, UpTo(4)),
    def(pi::SIGNATURE, "Signature", Binary, UpTo(4)),
    def(pi::ACCREDITATION, "Accreditation", Binary, UpTo(168)),
    def(pi::SIGNATURE_RECEIPT, "Signature receipt", Binary, UpTo(64)),
    def(pi::SECOND_SIGNATURE, "Second signature", Binary, UpTo(64)),
    def(pi::SECOND_ACCREDITATION, "Second accreditation", Binary, UpTo(168)),
    def(pi::MESSAGE, "Message", Text, UpTo(4096)),
    def(pi::FREE_MESSAGE, "Free message", Text, UpTo(254)),
];

/// Look up a PI by id.
pub fn parameter(id: u8) -> Option<&'static ParameterDef> {
    PARAMETERS
        .binary_search_by_key(&id, |p| p.id)
        .ok()
        .map(|idx| &PARAMETERS[idx])
}

/// The whole PI table, ordered by id.
pub fn parameters() -> &'static [ParameterDef] {
    PARAMETERS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_sorted_and_unique() {
        for pair in PARAMETERS.windows(2) {
            assert!(pair[0].id < pair[1].id, "{} before {}", pair[0].id, pair[1].id);
        }
    }

    #[test]
    fn test_lookup() {
        let filename = parameter(pi::FILENAME).unwrap();
        assert_eq!(filename.kind, ValueKind::Text);
        assert_eq!(filename.width, Width::UpTo(24));

        let count = parameter(pi::BYTE_COUNT).unwrap();
        assert_eq!(count.width.max(), Some(8));

        assert!(parameter(0).is_none());
        assert!(parameter(24).is_none());
        assert!(parameter(100).is_none());
    }

    #[test]
    fn test_numeric_widths_fit_u64() {
        for p in parameters().iter().filter(|p| p.kind == ValueKind::Numeric) {
            assert!(matches!(p.width, Width::Fixed(n) if n <= 8), "PI {}", p.id);
        }
    }
}
