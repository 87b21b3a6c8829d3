//! Error types for pesit-engine.

use thiserror::Error;

use crate::diagnostic::Diagnostic;

/// Main error type for all engine operations.
///
/// Protocol-level refusals raised by a [`Session`](crate::session::Session)
/// never surface here: they are turned into diagnostic frames. This type is
/// for transport, configuration, persistence and framing faults.
#[derive(Debug, Error)]
pub enum PesitError {
    /// I/O error on the transport or the file store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error (audit journal).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error (checkpoints).
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Malformed frame, unknown identifier or ill-formed outgoing FPDU.
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The peer refused a request and sent this diagnostic.
    #[error("Rejected by peer: {0}")]
    Rejected(Diagnostic),

    /// Peer sent something the local role cannot follow.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No frame arrived within the read timeout.
    #[error("Read timeout")]
    Timeout,

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Backpressure timeout - write buffer full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

/// Framing and TLV errors.
///
/// Any of these is fatal to the frame that produced it: once the byte
/// stream is out of step there is no way to find the next frame boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// (phase, type) pair not present in the message type catalog.
    #[error("unknown FPDU type phase=0x{phase:02X} type=0x{kind:02X}")]
    UnknownType { phase: u8, kind: u8 },

    /// Tag is neither a PI nor a PGI.
    #[error("unknown parameter id {0}")]
    UnknownParameter(u8),

    /// Buffer ended before the announced structure did.
    #[error("truncated {what}: need {needed} bytes, have {available}")]
    Truncated {
        what: &'static str,
        needed: usize,
        available: usize,
    },

    /// Length field disagrees with the bytes actually supplied.
    #[error("length field says {declared} bytes but frame has {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// A PGI appeared inside another PGI.
    #[error("group {0} nested inside a group")]
    NestedGroup(u8),

    /// A PI appeared inside a PGI that does not list it.
    #[error("parameter {id} is not a member of group {group}")]
    NotInGroup { group: u8, id: u8 },

    /// Outgoing FPDU lacks a mandatory parameter.
    #[error("{fpdu} is missing mandatory parameter {id}")]
    MissingMandatory { fpdu: &'static str, id: u8 },

    /// Outgoing FPDU carries a parameter its type does not permit.
    #[error("{fpdu} does not permit parameter {id}")]
    NotPermitted { fpdu: &'static str, id: u8 },

    /// Value is longer than the nominal width of its PI.
    #[error("parameter {id} value is {len} bytes, maximum is {max}")]
    ValueTooLong { id: u8, len: usize, max: usize },

    /// Encoded frame does not fit the 2-byte length field.
    #[error("frame of {0} bytes is too large")]
    FrameTooLarge(usize),

    /// Raw payload attached to a type outside the data-frame family.
    #[error("{0} cannot carry a raw payload")]
    UnexpectedPayload(&'static str),
}

/// Result type alias using PesitError.
pub type Result<T> = std::result::Result<T, PesitError>;

impl PesitError {
    /// Diagnostic to report when this error ends a client-side operation.
    ///
    /// Transport faults map to the generic transmission error.
    pub fn diagnostic(&self) -> Diagnostic {
        match self {
            PesitError::Rejected(diag) => *diag,
            PesitError::Format(_) | PesitError::Protocol(_) => Diagnostic::D3_311,
            PesitError::Timeout => Diagnostic::D3_317,
            _ => Diagnostic::D1_100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error_display() {
        let err = FormatError::UnknownType {
            phase: 0x40,
            kind: 0x7F,
        };
        assert_eq!(
            err.to_string(),
            "unknown FPDU type phase=0x40 type=0x7F"
        );
    }

    #[test]
    fn test_format_error_converts() {
        let err: PesitError = FormatError::UnknownParameter(200).into();
        assert!(err.to_string().contains("unknown parameter id 200"));
    }

    #[test]
    fn test_error_diagnostic_mapping() {
        assert_eq!(PesitError::Timeout.diagnostic(), Diagnostic::D3_317);
        assert_eq!(
            PesitError::Rejected(Diagnostic::D2_007).diagnostic(),
            Diagnostic::D2_007
        );
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert_eq!(PesitError::from(io).diagnostic(), Diagnostic::D1_100);
    }
}
