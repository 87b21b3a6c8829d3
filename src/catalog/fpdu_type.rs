//! Message type (FPDU type) table.
//!
//! Each type carries its wire code, its parameter contract and the type of
//! the acknowledgment it calls for. Contracts list PGIs and PIs side by side;
//! [`FpduKind::permits`] and [`FpduKind::is_mandatory`] see through groups.

use super::group::{group, pgi};
use super::parameter::pi;
use super::Requirement;

/// Phase byte values.
pub mod phase {
    /// Data-frame family (raw payload, no TLV).
    pub const DATA: u8 = 0x00;
    /// Session-level control: connect, release, abort.
    pub const SESSION: u8 = 0x40;
    /// File and transfer level.
    pub const FILE: u8 = 0xC0;
}

/// Every FPDU type of the direct TCP/IP profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FpduKind {
    Connect,
    Aconnect,
    Rconnect,
    Release,
    Relconf,
    Abort,
    Create,
    AckCreate,
    Select,
    AckSelect,
    Deselect,
    AckDeselect,
    Open,
    AckOpen,
    Close,
    AckClose,
    Read,
    AckRead,
    Write,
    AckWrite,
    TransEnd,
    AckTransEnd,
    DtfEnd,
    Syn,
    AckSyn,
    Resyn,
    AckResyn,
    Idt,
    AckIdt,
    Msg,
    MsgDm,
    MsgMm,
    MsgFm,
    AckMsg,
    Dtf,
    DtfDa,
    DtfMa,
    DtfFa,
}

/// Immutable FPDU type catalog entry.
#[derive(Debug)]
pub struct FpduTypeDef {
    pub kind: FpduKind,
    pub phase: u8,
    pub code: u8,
    pub name: &'static str,
    pub requirements: &'static [Requirement],
    pub ack: Option<FpduKind>,
}

const fn m(id: u8) -> Requirement {
    Requirement::mandatory(id)
}

const fn o(id: u8) -> Requirement {
    Requirement::optional(id)
}

const fn entry(
    kind: FpduKind,
    phase: u8,
    code: u8,
    name: &'static str,
    requirements: &'static [Requirement],
    ack: Option<FpduKind>,
) -> FpduTypeDef {
    FpduTypeDef {
        kind,
        phase,
        code,
        name,
        requirements,
        ack,
    }
}

const SECURITY: [Requirement; 10] = [
    o(pi::CLIENT_ID),
    o(pi::BANK_ID),
    o(pi::FILE_ACCESS_CONTROL),
    o(pi::AUTH_TYPE),
    o(pi::AUTH_ELEMENTS),
    o(pi::SEAL_TYPE),
    o(pi::CIPHER_TYPE),
    o(pi::SIGNATURE_TYPE),
    o(pi::ACCREDITATION),
    o(pi::FREE_MESSAGE),
];

const MESSAGE: &[Requirement] = &[
    m(pgi::FILE_ID),
    m(pi::TRANSFER_ID),
    o(pi::REQUESTED_ATTRIBUTES),
    o(pi::DATA_CODE),
    o(pgi::HISTORICAL_ATTRIBUTES),
    o(pi::CLIENT_ID),
    o(pi::BANK_ID),
    o(pi::MESSAGE),
];

use self::phase::{DATA, FILE, SESSION};
use FpduKind::*;

// Indexed by `FpduKind as usize`; keep in declaration order.
static TYPES: &[FpduTypeDef] = &[
    entry(
        Connect,
        SESSION,
        0x20,
        "CONNECT",
        &[
            o(pi::CRC),
            m(pi::REQUESTOR),
            m(pi::SERVER),
            o(pi::ACCESS_CONTROL),
            m(pi::VERSION),
            o(pi::SYNC_POINTS),
            m(pi::ACCESS_TYPE),
            o(pi::RESYNC),
            o(pi::FREE_MESSAGE),
        ],
        Some(Aconnect),
    ),
    entry(
        Aconnect,
        SESSION,
        0x21,
        "ACONNECT",
        &[
            o(pi::ACCESS_CONTROL),
            m(pi::VERSION),
            o(pi::SYNC_POINTS),
            o(pi::RESYNC),
            o(pi::FREE_MESSAGE),
        ],
        None,
    ),
    entry(
        Rconnect,
        SESSION,
        0x22,
        "RCONNECT",
        &[m(pi::DIAGNOSTIC), o(pi::FREE_MESSAGE)],
        None,
    ),
    entry(
        Release,
        SESSION,
        0x23,
        "RELEASE",
        &[m(pi::DIAGNOSTIC), o(pi::FREE_MESSAGE)],
        Some(Relconf),
    ),
    entry(Relconf, SESSION, 0x24, "RELCONF", &[o(pi::FREE_MESSAGE)], None),
    entry(Abort, SESSION, 0x25, "ABORT", &[m(pi::DIAGNOSTIC)], None),
    entry(
        Create,
        FILE,
        0x11,
        "CREATE",
        &[
            m(pgi::FILE_ID),
            m(pi::TRANSFER_ID),
            o(pi::RESTARTED),
            o(pi::DATA_CODE),
            m(pi::PRIORITY),
            m(pi::MAX_ENTITY_SIZE),
            m(pgi::LOGICAL_ATTRIBUTES),
            m(pgi::PHYSICAL_ATTRIBUTES),
            m(pgi::HISTORICAL_ATTRIBUTES),
            SECURITY[0],
            SECURITY[1],
            SECURITY[2],
            SECURITY[3],
            SECURITY[4],
            SECURITY[5],
            SECURITY[6],
            SECURITY[7],
            SECURITY[8],
            SECURITY[9],
        ],
        Some(AckCreate),
    ),
    entry(
        AckCreate,
        FILE,
        0x30,
        "ACK_CREATE",
        &[
            m(pi::DIAGNOSTIC),
            o(pi::TRANSFER_ID),
            m(pi::MAX_ENTITY_SIZE),
            o(pi::AUTH_ELEMENTS),
            o(pi::ACCREDITATION),
            o(pi::SECOND_ACCREDITATION),
            o(pi::FREE_MESSAGE),
        ],
        None,
    ),
    entry(
        Select,
        FILE,
        0x12,
        "SELECT",
        &[
            m(pgi::FILE_ID),
            m(pi::TRANSFER_ID),
            o(pi::REQUESTED_ATTRIBUTES),
            o(pi::RESTARTED),
            m(pi::PRIORITY),
            m(pi::MAX_ENTITY_SIZE),
            SECURITY[0],
            SECURITY[1],
            SECURITY[2],
            SECURITY[3],
            SECURITY[4],
            SECURITY[5],
            SECURITY[6],
            SECURITY[7],
            SECURITY[8],
            SECURITY[9],
        ],
        Some(AckSelect),
    ),
    entry(
        AckSelect,
        FILE,
        0x31,
        "ACK_SELECT",
        &[
            m(pi::DIAGNOSTIC),
            m(pgi::FILE_ID),
            m(pi::TRANSFER_ID),
            o(pi::DATA_CODE),
            m(pi::MAX_ENTITY_SIZE),
            m(pgi::LOGICAL_ATTRIBUTES),
            m(pgi::PHYSICAL_ATTRIBUTES),
            m(pgi::HISTORICAL_ATTRIBUTES),
            o(pi::AUTH_ELEMENTS),
            o(pi::ACCREDITATION),
            o(pi::SECOND_ACCREDITATION),
            o(pi::FREE_MESSAGE),
        ],
        None,
    ),
    entry(
        Deselect,
        FILE,
        0x13,
        "DESELECT",
        &[m(pi::DIAGNOSTIC), o(pi::FREE_MESSAGE)],
        Some(AckDeselect),
    ),
    entry(
        AckDeselect,
        FILE,
        0x32,
        "ACK_DESELECT",
        &[m(pi::DIAGNOSTIC), o(pi::FREE_MESSAGE)],
        None,
    ),
    entry(
        Open,
        FILE,
        0x14,
        "OPEN",
        &[
            o(pi::COMPRESSION),
            o(pi::AUTH_ELEMENTS),
            o(pi::SEAL_ELEMENTS),
            o(pi::CIPHER_ELEMENTS),
            o(pi::ACCREDITATION),
            o(pi::SECOND_ACCREDITATION),
        ],
        Some(AckOpen),
    ),
    entry(
        AckOpen,
        FILE,
        0x33,
        "ACK_OPEN",
        &[
            m(pi::DIAGNOSTIC),
            o(pi::COMPRESSION),
            o(pi::SEAL_ELEMENTS),
            o(pi::CIPHER_ELEMENTS),
        ],
        None,
    ),
    entry(Close, FILE, 0x15, "CLOSE", &[m(pi::DIAGNOSTIC)], Some(AckClose)),
    entry(AckClose, FILE, 0x34, "ACK_CLOSE", &[m(pi::DIAGNOSTIC)], None),
    entry(Read, FILE, 0x01, "READ", &[m(pi::RESTART_POINT)], Some(AckRead)),
    entry(AckRead, FILE, 0x35, "ACK_READ", &[m(pi::DIAGNOSTIC)], None),
    entry(Write, FILE, 0x02, "WRITE", &[], Some(AckWrite)),
    entry(
        AckWrite,
        FILE,
        0x36,
        "ACK_WRITE",
        &[m(pi::DIAGNOSTIC), m(pi::RESTART_POINT)],
        None,
    ),
    entry(
        TransEnd,
        FILE,
        0x08,
        "TRANS_END",
        &[
            o(pi::BYTE_COUNT),
            o(pi::ARTICLE_COUNT),
            o(pi::SIGNATURE_RECEIPT),
        ],
        Some(AckTransEnd),
    ),
    entry(
        AckTransEnd,
        FILE,
        0x37,
        "ACK_TRANS_END",
        &[
            m(pi::DIAGNOSTIC),
            o(pi::BYTE_COUNT),
            o(pi::ARTICLE_COUNT),
            o(pi::SIGNATURE_RECEIPT),
        ],
        None,
    ),
    entry(
        DtfEnd,
        FILE,
        0x04,
        "DTF_END",
        &[m(pi::DIAGNOSTIC), o(pi::SEAL), o(pi::SIGNATURE)],
        None,
    ),
    entry(
        Syn,
        FILE,
        0x03,
        "SYN",
        &[m(pi::SYNC_NUMBER), o(pi::SEAL)],
        Some(AckSyn),
    ),
    entry(AckSyn, FILE, 0x38, "ACK_SYN", &[m(pi::SYNC_NUMBER)], None),
    entry(
        Resyn,
        FILE,
        0x05,
        "RESYN",
        &[m(pi::DIAGNOSTIC), m(pi::RESTART_POINT)],
        Some(AckResyn),
    ),
    entry(AckResyn, FILE, 0x39, "ACK_RESYN", &[m(pi::RESTART_POINT)], None),
    entry(
        Idt,
        FILE,
        0x06,
        "IDT",
        &[o(pi::DIAGNOSTIC), o(pi::END_CODE)],
        Some(AckIdt),
    ),
    entry(AckIdt, FILE, 0x3A, "ACK_IDT", &[], None),
    entry(Msg, FILE, 0x16, "MSG", MESSAGE, Some(AckMsg)),
    entry(MsgDm, FILE, 0x17, "MSGDM", MESSAGE, None),
    entry(MsgMm, FILE, 0x18, "MSGMM", &[o(pi::MESSAGE)], None),
    entry(MsgFm, FILE, 0x19, "MSGFM", &[o(pi::MESSAGE)], Some(AckMsg)),
    entry(
        AckMsg,
        FILE,
        0x3B,
        "ACK_MSG",
        &[
            m(pi::DIAGNOSTIC),
            o(pi::TRANSFER_ID),
            o(pi::DATA_CODE),
            o(pi::MESSAGE),
        ],
        None,
    ),
    entry(Dtf, DATA, 0x00, "DTF", &[], None),
    entry(DtfDa, DATA, 0x41, "DTFDA", &[], None),
    entry(DtfMa, DATA, 0x40, "DTFMA", &[], None),
    entry(DtfFa, DATA, 0x42, "DTFFA", &[], None),
];

impl FpduKind {
    /// All kinds, in catalog order.
    pub const ALL: [FpduKind; 38] = [
        Connect,
        Aconnect,
        Rconnect,
        Release,
        Relconf,
        Abort,
        Create,
        AckCreate,
        Select,
        AckSelect,
        Deselect,
        AckDeselect,
        Open,
        AckOpen,
        Close,
        AckClose,
        Read,
        AckRead,
        Write,
        AckWrite,
        TransEnd,
        AckTransEnd,
        DtfEnd,
        Syn,
        AckSyn,
        Resyn,
        AckResyn,
        Idt,
        AckIdt,
        Msg,
        MsgDm,
        MsgMm,
        MsgFm,
        AckMsg,
        Dtf,
        DtfDa,
        DtfMa,
        DtfFa,
    ];

    /// Catalog entry for this kind.
    #[inline]
    pub fn definition(self) -> &'static FpduTypeDef {
        &TYPES[self as usize]
    }

    /// Resolve a (phase, type) pair read off the wire.
    pub fn from_code(phase: u8, code: u8) -> Option<FpduKind> {
        TYPES
            .iter()
            .find(|t| t.phase == phase && t.code == code)
            .map(|t| t.kind)
    }

    #[inline]
    pub fn phase(self) -> u8 {
        self.definition().phase
    }

    #[inline]
    pub fn code(self) -> u8 {
        self.definition().code
    }

    #[inline]
    pub fn name(self) -> &'static str {
        self.definition().name
    }

    #[inline]
    pub fn requirements(self) -> &'static [Requirement] {
        self.definition().requirements
    }

    /// Type of the acknowledgment this kind calls for, if any.
    #[inline]
    pub fn ack(self) -> Option<FpduKind> {
        self.definition().ack
    }

    /// Data-frame family: raw payload, no parameters.
    #[inline]
    pub fn is_data(self) -> bool {
        self.phase() == phase::DATA
    }

    /// Connect/release/abort level.
    #[inline]
    pub fn is_session_level(self) -> bool {
        self.phase() == phase::SESSION
    }

    /// Whether `id` (a PI or a PGI) may appear in this kind, directly or as
    /// a member of a permitted group.
    pub fn permits(self, id: u8) -> bool {
        self.requirements().iter().any(|req| {
            req.id == id || group(req.id).is_some_and(|g| g.contains(id))
        })
    }

    /// Whether `id` must be present: listed as mandatory, or a mandatory
    /// member of a mandatory group.
    pub fn is_mandatory(self, id: u8) -> bool {
        self.requirements().iter().any(|req| {
            if !req.mandatory {
                return false;
            }
            if req.id == id {
                return true;
            }
            group(req.id)
                .and_then(|g| g.member(id))
                .is_some_and(|member| member.mandatory)
        })
    }

    /// Check an inbound response against the declared acknowledgment.
    #[inline]
    pub fn is_expected_ack(self, response: FpduKind) -> bool {
        self.ack() == Some(response)
    }
}

impl std::fmt::Display for FpduKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
