//! Diagnostic catalog.
//!
//! Diagnostics travel inside PI 2 as exactly three bytes:
//! ```text
//! ┌──────────┬──────────────────┐
//! │ Category │ Reason           │
//! │ 1 byte   │ 2 bytes, uint16 BE│
//! └──────────┴──────────────────┘
//! ```
//!
//! `(0, 0)` is success. Every diagnostic the engine emits comes from
//! [`CATALOG`]; a peer may still send pairs we do not list, which decode to
//! an uncatalogued entry rather than an error.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::FormatError;

/// Encoded size of a diagnostic.
pub const DIAGNOSTIC_SIZE: usize = 3;

const UNLISTED: &str = "unlisted diagnostic";

/// A (category, reason) pair with its message text.
///
/// Serializes as `{ category, reason }`; the message is restored from the
/// catalog on the way back in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "DiagnosticRepr")]
pub struct Diagnostic {
    category: u8,
    reason: u16,
    message: &'static str,
}

macro_rules! diagnostics {
    ($($name:ident = ($cat:literal, $reason:literal, $msg:literal);)*) => {
        impl Diagnostic {
            $(
                #[doc = $msg]
                pub const $name: Diagnostic = Diagnostic::new($cat, $reason, $msg);
            )*
        }

        /// Every diagnostic known to the engine.
        pub static CATALOG: &[Diagnostic] = &[$(Diagnostic::$name),*];
    };
}

diagnostics! {
    D0_000 = (0, 0, "success");

    D1_100 = (1, 100, "transmission error");

    D2_001 = (2, 1, "partner unknown");
    D2_007 = (2, 7, "server unknown");
    D2_008 = (2, 8, "version incompatible");

    D2_200 = (2, 200, "insufficient file characteristics");
    D2_201 = (2, 201, "system resources temporarily insufficient");
    D2_202 = (2, 202, "user resources temporarily insufficient");
    D2_203 = (2, 203, "transfer not prioritary");
    D2_204 = (2, 204, "file already exists");
    D2_205 = (2, 205, "file does not exist");
    D2_206 = (2, 206, "receiving the file would exceed the disk quota");
    D2_207 = (2, 207, "file busy");
    D2_208 = (2, 208, "file too old");
    D2_209 = (2, 209, "message of this type not accepted");
    D2_210 = (2, 210, "presentation context negotiation failed");
    D2_211 = (2, 211, "file cannot be opened");
    D2_212 = (2, 212, "file cannot be closed normally");
    D2_213 = (2, 213, "blocking input/output error");
    D2_214 = (2, 214, "restart point negotiation failed");
    D2_215 = (2, 215, "system-specific error");
    D2_216 = (2, 216, "voluntary premature stop");
    D2_217 = (2, 217, "too many unacknowledged sync points");
    D2_218 = (2, 218, "resynchronization impossible");
    D2_219 = (2, 219, "file space exhausted");
    D2_220 = (2, 220, "article longer than expected");
    D2_221 = (2, 221, "end of transmission delay expired");
    D2_222 = (2, 222, "too much data without sync point");
    D2_223 = (2, 223, "abnormal end of transfer");
    D2_224 = (2, 224, "transmitted file larger than announced");
    D2_225 = (2, 225, "file received but could not be delivered to the application");
    D2_226 = (2, 226, "transfer refused");
    D2_299 = (2, 299, "other file error");

    D3_300 = (3, 300, "local communication system congested");
    D3_301 = (3, 301, "requested identification unknown");
    D3_302 = (3, 302, "request not attached to a service access point");
    D3_303 = (3, 303, "remote communication system congested");
    D3_304 = (3, 304, "requestor identification not authorized");
    D3_305 = (3, 305, "negotiation failed: SELECT");
    D3_306 = (3, 306, "negotiation failed: RESYN");
    D3_307 = (3, 307, "negotiation failed: SYNC");
    D3_308 = (3, 308, "version number not supported");
    D3_309 = (3, 309, "too many connections in progress");
    D3_310 = (3, 310, "network incident");
    D3_311 = (3, 311, "remote protocol error");
    D3_312 = (3, 312, "service closed on user request");
    D3_313 = (3, 313, "connection dropped after idle interval");
    D3_314 = (3, 314, "idle connection dropped for a new connection");
    D3_315 = (3, 315, "negotiation failed");
    D3_316 = (3, 316, "connection dropped by administrative command");
    D3_317 = (3, 317, "timer expired");
    D3_318 = (3, 318, "mandatory parameter absent or illegal content");
    D3_319 = (3, 319, "declared byte or article count differs from actual");
    D3_320 = (3, 320, "too many resynchronizations for one transfer");
    D3_321 = (3, 321, "call the backup number");
    D3_322 = (3, 322, "call again later");
    D3_399 = (3, 399, "other protocol error");
}

impl Diagnostic {
    /// Alias for `D0_000`.
    pub const SUCCESS: Diagnostic = Diagnostic::D0_000;

    const fn new(category: u8, reason: u16, message: &'static str) -> Self {
        Self {
            category,
            reason,
            message,
        }
    }

    /// Look a pair up in the catalog.
    pub fn lookup(category: u8, reason: u16) -> Option<Diagnostic> {
        CATALOG
            .iter()
            .find(|d| d.category == category && d.reason == reason)
            .copied()
    }

    /// Encode to the 3-byte PI 2 value.
    pub fn encode(&self) -> [u8; DIAGNOSTIC_SIZE] {
        let [hi, lo] = self.reason.to_be_bytes();
        [self.category, hi, lo]
    }

    /// Decode a PI 2 value.
    ///
    /// Pairs missing from the catalog decode to an entry carrying a generic
    /// message; only a wrong length is an error.
    pub fn decode(buf: &[u8]) -> Result<Diagnostic, FormatError> {
        if buf.len() != DIAGNOSTIC_SIZE {
            return Err(FormatError::LengthMismatch {
                declared: DIAGNOSTIC_SIZE,
                actual: buf.len(),
            });
        }
        let category = buf[0];
        let reason = u16::from_be_bytes([buf[1], buf[2]]);
        Ok(Self::lookup(category, reason)
            .unwrap_or_else(|| Diagnostic::new(category, reason, UNLISTED)))
    }

    #[inline]
    pub fn category(&self) -> u8 {
        self.category
    }

    #[inline]
    pub fn reason(&self) -> u16 {
        self.reason
    }

    #[inline]
    pub fn message(&self) -> &'static str {
        self.message
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.category == 0 && self.reason == 0
    }

    /// True if this pair is one of ours.
    pub fn is_catalogued(&self) -> bool {
        Self::lookup(self.category, self.reason).is_some()
    }
}

#[derive(Serialize, Deserialize)]
struct DiagnosticRepr {
    category: u8,
    reason: u16,
}

impl From<Diagnostic> for DiagnosticRepr {
    fn from(diag: Diagnostic) -> Self {
        Self {
            category: diag.category,
            reason: diag.reason,
        }
    }
}

impl From<DiagnosticRepr> for Diagnostic {
    fn from(repr: DiagnosticRepr) -> Self {
        Diagnostic::lookup(repr.category, repr.reason)
            .unwrap_or_else(|| Diagnostic::new(repr.category, repr.reason, UNLISTED))
    }
}

impl<'de> Deserialize<'de> for Diagnostic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        DiagnosticRepr::deserialize(deserializer).map(Diagnostic::from)
    }
}

impl Default for Diagnostic {
    fn default() -> Self {
        Diagnostic::SUCCESS
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D{}-{:03} {}", self.category, self.reason, self.message)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_catalog_pairs_are_unique() {
        let mut seen = HashSet::new();
        for diag in CATALOG {
            assert!(
                seen.insert((diag.category(), diag.reason())),
                "duplicate pair {}",
                diag
            );
        }
    }

    #[test]
    fn test_encode_layout() {
        assert_eq!(Diagnostic::SUCCESS.encode(), [0, 0, 0]);
        assert_eq!(Diagnostic::D2_220.encode(), [2, 0, 220]);
        assert_eq!(Diagnostic::D3_319.encode(), [3, 0x01, 0x3F]);
        assert_eq!(Diagnostic::D2_007.encode(), [2, 0, 7]);
    }

    #[test]
    fn test_decode_catalogued() {
        let diag = Diagnostic::decode(&[3, 0x01, 0x33]).unwrap();
        assert_eq!(diag, Diagnostic::D3_307);
        assert_eq!(diag.message(), "negotiation failed: SYNC");
        assert!(diag.is_catalogued());
    }

    #[test]
    fn test_decode_unlisted_pair() {
        let diag = Diagnostic::decode(&[9, 0, 42]).unwrap();
        assert_eq!(diag.category(), 9);
        assert_eq!(diag.reason(), 42);
        assert!(!diag.is_catalogued());
        assert!(!diag.is_success());
    }

    #[test]
    fn test_decode_wrong_length() {
        let err = Diagnostic::decode(&[2, 0]).unwrap_err();
        assert_eq!(
            err,
            FormatError::LengthMismatch {
                declared: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Diagnostic::D2_224.to_string(),
            "D2-224 transmitted file larger than announced"
        );
    }

    #[test]
    fn test_serde_restores_message() {
        let json = serde_json::to_string(&Diagnostic::D3_319).unwrap();
        assert_eq!(json, r#"{"category":3,"reason":319}"#);
        let back: Diagnostic = serde_json::from_str(&json).unwrap();
        assert_eq!(back.message(), Diagnostic::D3_319.message());
    }

    #[test]
    fn test_deserialize_from_short_lived_buffer() {
        let line = String::from(r#"[{"category":2,"reason":204},null]"#);
        let parsed: Vec<Option<Diagnostic>> = serde_json::from_str(&line).unwrap();
        drop(line);
        assert_eq!(parsed, vec![Some(Diagnostic::D2_204), None]);
    }
}
