//! Compiled-in protocol catalogs.
//!
//! Three closed tables describe everything that can appear on the wire:
//! - Parameter Identifiers (PI): one typed field
//! - Parameter Group Identifiers (PGI): a bundle of PIs carried as one tag
//! - FPDU types: (phase, type) code, parameter contract, acknowledgment type
//!
//! Tables are static slices. Cross-references (a type's acknowledgment, a
//! group's members) are plain ids resolved through the tables, so there is
//! no initialization order between them.

mod fpdu_type;
mod group;
mod parameter;

pub use fpdu_type::{phase, FpduKind, FpduTypeDef};
pub use group::{group, groups, pgi, GroupDef};
pub use parameter::{parameter, parameters, pi, ParameterDef, ValueKind, Width};

/// One entry of a group's member list or a type's parameter contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requirement {
    /// PI or PGI id.
    pub id: u8,
    /// Must be present.
    pub mandatory: bool,
}

impl Requirement {
    pub const fn mandatory(id: u8) -> Self {
        Self {
            id,
            mandatory: true,
        }
    }

    pub const fn optional(id: u8) -> Self {
        Self {
            id,
            mandatory: false,
        }
    }
}

/// True if `id` is a known PI or PGI.
pub fn is_known_id(id: u8) -> bool {
    parameter(id).is_some() || group(id).is_some()
}
