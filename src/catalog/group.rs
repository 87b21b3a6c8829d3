//! Parameter Group Identifier (PGI) table.

use super::parameter::pi;
use super::Requirement;

/// Immutable PGI catalog entry.
#[derive(Debug, PartialEq, Eq)]
pub struct GroupDef {
    pub id: u8,
    pub name: &'static str,
    /// Ordered member PIs.
    pub members: &'static [Requirement],
}

impl GroupDef {
    /// Catalog entry for member `id`, if it belongs here.
    pub fn member(&self, id: u8) -> Option<&Requirement> {
        self.members.iter().find(|m| m.id == id)
    }

    #[inline]
    pub fn contains(&self, id: u8) -> bool {
        self.member(id).is_some()
    }
}

/// PGI id constants.
pub mod pgi {
    pub const FILE_ID: u8 = 9;
    pub const LOGICAL_ATTRIBUTES: u8 = 30;
    pub const PHYSICAL_ATTRIBUTES: u8 = 40;
    pub const HISTORICAL_ATTRIBUTES: u8 = 50;
}

static GROUPS: &[GroupDef] = &[
    GroupDef {
        id: pgi::FILE_ID,
        name: "File identifier",
        members: &[
            Requirement::optional(pi::REQUESTOR),
            Requirement::optional(pi::SERVER),
            Requirement::mandatory(pi::FILE_TYPE),
            Requirement::mandatory(pi::FILENAME),
        ],
    },
    GroupDef {
        id: pgi::LOGICAL_ATTRIBUTES,
        name: "Logical attributes",
        members: &[
            Requirement::optional(pi::ARTICLE_FORMAT),
            Requirement::mandatory(pi::ARTICLE_LENGTH),
            Requirement::optional(pi::ORGANIZATION),
            Requirement::optional(pi::SIGNATURE_HANDLING),
            Requirement::optional(pi::SIT_SEAL),
            Requirement::optional(pi::LABEL),
            Requirement::optional(pi::KEY_LENGTH),
            Requirement::optional(pi::KEY_OFFSET),
        ],
    },
    GroupDef {
        id: pgi::PHYSICAL_ATTRIBUTES,
        name: "Physical attributes",
        members: &[
            Requirement::optional(pi::RESERVATION_UNIT),
            Requirement::mandatory(pi::MAX_RESERVATION),
        ],
    },
    GroupDef {
        id: pgi::HISTORICAL_ATTRIBUTES,
        name: "Historical attributes",
        members: &[
            Requirement::mandatory(pi::CREATION_DATE),
            Requirement::optional(pi::EXTRACTION_DATE),
        ],
    },
];

/// Look up a PGI by id.
pub fn group(id: u8) -> Option<&'static GroupDef> {
    GROUPS.iter().find(|g| g.id == id)
}

/// The whole PGI table.
pub fn groups() -> &'static [GroupDef] {
    GROUPS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_id_members() {
        let g = group(pgi::FILE_ID).unwrap();
        assert!(g.contains(pi::FILENAME));
        assert!(g.member(pi::FILENAME).unwrap().mandatory);
        assert!(!g.member(pi::REQUESTOR).unwrap().mandatory);
        assert!(!g.contains(pi::TRANSFER_ID));
    }

    #[test]
    fn test_unknown_group() {
        assert!(group(10).is_none());
        assert!(group(pi::FILENAME).is_none());
    }
}
