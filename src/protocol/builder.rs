//! Builders for requester-side FPDUs.
//!
//! The catalog only says which parameters a type accepts; these builders
//! pick sensible values for the ones a requester must supply and lay the
//! groups out in the order peers expect.

use chrono::{Local, NaiveDateTime};

use super::fpdu::{Fpdu, Group, Leaf};
use crate::catalog::{pgi, pi, FpduKind};

/// Requested access mode (PI 22).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessType {
    /// Requester sends files.
    #[default]
    Write,
    /// Requester receives files.
    Read,
    /// Both directions on the same connection.
    Mixed,
}

impl AccessType {
    pub fn code(self) -> u8 {
        match self {
            AccessType::Write => 0,
            AccessType::Read => 1,
            AccessType::Mixed => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(AccessType::Write),
            1 => Some(AccessType::Read),
            2 => Some(AccessType::Mixed),
            _ => None,
        }
    }
}

/// Article format (PI 31).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordFormat {
    Fixed,
    #[default]
    Variable,
}

impl RecordFormat {
    pub const FIXED_CODE: u8 = 0x00;
    pub const VARIABLE_CODE: u8 = 0x80;

    pub fn code(self) -> u8 {
        match self {
            RecordFormat::Fixed => Self::FIXED_CODE,
            RecordFormat::Variable => Self::VARIABLE_CODE,
        }
    }

    /// Anything but the fixed code is treated as variable.
    pub fn from_code(code: u8) -> Self {
        if code == Self::FIXED_CODE {
            RecordFormat::Fixed
        } else {
            RecordFormat::Variable
        }
    }
}

/// Builder for CONNECT.
///
/// # Example
///
/// ```
/// use pesit_engine::protocol::{AccessType, ConnectBuilder};
///
/// let connect = ConnectBuilder::new("LOOP", "PESIT_SERVER")
///     .access(AccessType::Write)
///     .sync_points(16, 4)
///     .build(5);
/// assert_eq!(connect.src(), 5);
/// assert_eq!(connect.dst(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct ConnectBuilder {
    requestor: String,
    server: String,
    password: Option<String>,
    version: u16,
    access: AccessType,
    sync: Option<(u16, u8)>,
    resync: bool,
}

impl ConnectBuilder {
    pub fn new(requestor: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            requestor: requestor.into(),
            server: server.into(),
            password: None,
            version: 2,
            access: AccessType::Write,
            sync: None,
            resync: false,
        }
    }

    /// Password sent as access control (PI 5).
    pub fn password(mut self, password: impl Into<String>) -> Self {
        let password = password.into();
        self.password = (!password.is_empty()).then_some(password);
        self
    }

    pub fn version(mut self, version: u16) -> Self {
        self.version = version;
        self
    }

    pub fn access(mut self, access: AccessType) -> Self {
        self.access = access;
        self
    }

    /// Offer sync points every `interval_kb` KiB with an acknowledgment
    /// window of `window` (capped at 16).
    pub fn sync_points(mut self, interval_kb: u16, window: u8) -> Self {
        self.sync = Some((interval_kb, window.min(16)));
        self
    }

    pub fn resync(mut self, enabled: bool) -> Self {
        self.resync = enabled;
        self
    }

    /// Build the frame; the requester's own id goes in the source field.
    pub fn build(self, connection_id: u8) -> Fpdu {
        let mut fpdu = Fpdu::new(FpduKind::Connect)
            .with_ids(0, connection_id)
            .with(Leaf::text(pi::REQUESTOR, &self.requestor))
            .with(Leaf::text(pi::SERVER, &self.server));
        if let Some(password) = &self.password {
            fpdu = fpdu.with(Leaf::text(pi::ACCESS_CONTROL, password));
        }
        fpdu = fpdu.with(Leaf::numeric(pi::VERSION, self.version as u64));
        if let Some((interval, window)) = self.sync {
            let [hi, lo] = interval.to_be_bytes();
            fpdu = fpdu.with(Leaf::new(pi::SYNC_POINTS, vec![hi, lo, window]));
        }
        fpdu = fpdu.with(Leaf::flag(pi::ACCESS_TYPE, self.access.code()));
        if self.resync {
            fpdu = fpdu.with(Leaf::flag(pi::RESYNC, 1));
        }
        fpdu
    }
}

/// Builder for CREATE (requester writes a file).
#[derive(Debug, Clone)]
pub struct CreateBuilder {
    filename: String,
    file_type: u16,
    transfer_id: u32,
    priority: u8,
    max_entity_size: u16,
    format: RecordFormat,
    record_length: u16,
    reservation_unit: u8,
    max_reservation: u32,
    created: Option<NaiveDateTime>,
    restarted: bool,
}

impl Default for CreateBuilder {
    fn default() -> Self {
        Self {
            filename: "FILE".to_string(),
            file_type: 0,
            transfer_id: 1,
            priority: 0,
            max_entity_size: 4096,
            format: RecordFormat::Variable,
            record_length: 1024,
            reservation_unit: 0,
            max_reservation: 0,
            created: None,
            restarted: false,
        }
    }
}

impl CreateBuilder {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            ..Self::default()
        }
    }

    pub fn file_type(mut self, file_type: u16) -> Self {
        self.file_type = file_type;
        self
    }

    pub fn transfer_id(mut self, id: u32) -> Self {
        self.transfer_id = id;
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_entity_size(mut self, size: u16) -> Self {
        self.max_entity_size = size;
        self
    }

    /// Fixed-length articles of `length` bytes.
    pub fn fixed_records(mut self, length: u16) -> Self {
        self.format = RecordFormat::Fixed;
        self.record_length = length;
        self
    }

    /// Variable-length articles of at most `max_length` bytes.
    pub fn variable_records(mut self, max_length: u16) -> Self {
        self.format = RecordFormat::Variable;
        self.record_length = max_length;
        self
    }

    /// Announced size: `max` units of `unit` (0 = KiB).
    pub fn reservation(mut self, unit: u8, max: u32) -> Self {
        self.reservation_unit = unit;
        self.max_reservation = max;
        self
    }

    pub fn created(mut self, when: NaiveDateTime) -> Self {
        self.created = Some(when);
        self
    }

    /// Ask the server to resume the transfer from its last checkpoint.
    pub fn restarted(mut self, restarted: bool) -> Self {
        self.restarted = restarted;
        self
    }

    pub fn build(self) -> Fpdu {
        let created = self.created.unwrap_or_else(|| Local::now().naive_local());
        let mut fpdu = Fpdu::new(FpduKind::Create)
            .with(
                Group::new(pgi::FILE_ID)
                    .with(Leaf::numeric(pi::FILE_TYPE, self.file_type as u64))
                    .with(Leaf::text(pi::FILENAME, &self.filename)),
            )
            .with(Leaf::numeric(pi::TRANSFER_ID, self.transfer_id as u64));
        if self.restarted {
            fpdu = fpdu.with(Leaf::flag(pi::RESTARTED, 1));
        }
        fpdu.with(Leaf::flag(pi::PRIORITY, self.priority))
            .with(Leaf::numeric(pi::MAX_ENTITY_SIZE, self.max_entity_size as u64))
            .with(
                Group::new(pgi::LOGICAL_ATTRIBUTES)
                    .with(Leaf::flag(pi::ARTICLE_FORMAT, self.format.code()))
                    .with(Leaf::numeric(pi::ARTICLE_LENGTH, self.record_length as u64)),
            )
            .with(
                Group::new(pgi::PHYSICAL_ATTRIBUTES)
                    .with(Leaf::flag(pi::RESERVATION_UNIT, self.reservation_unit))
                    .with(Leaf::numeric(pi::MAX_RESERVATION, self.max_reservation as u64)),
            )
            .with(
                Group::new(pgi::HISTORICAL_ATTRIBUTES)
                    .with(Leaf::date(pi::CREATION_DATE, created)),
            )
    }
}

/// Builder for SELECT (requester reads a file).
#[derive(Debug, Clone)]
pub struct SelectBuilder {
    filename: String,
    file_type: u16,
    transfer_id: u32,
    priority: u8,
    max_entity_size: u16,
    restarted: bool,
}

impl SelectBuilder {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            file_type: 0,
            transfer_id: 1,
            priority: 0,
            max_entity_size: 4096,
            restarted: false,
        }
    }

    pub fn file_type(mut self, file_type: u16) -> Self {
        self.file_type = file_type;
        self
    }

    pub fn transfer_id(mut self, id: u32) -> Self {
        self.transfer_id = id;
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_entity_size(mut self, size: u16) -> Self {
        self.max_entity_size = size;
        self
    }

    pub fn restarted(mut self, restarted: bool) -> Self {
        self.restarted = restarted;
        self
    }

    pub fn build(self) -> Fpdu {
        let mut fpdu = Fpdu::new(FpduKind::Select)
            .with(
                Group::new(pgi::FILE_ID)
                    .with(Leaf::numeric(pi::FILE_TYPE, self.file_type as u64))
                    .with(Leaf::text(pi::FILENAME, &self.filename)),
            )
            .with(Leaf::numeric(pi::TRANSFER_ID, self.transfer_id as u64));
        if self.restarted {
            fpdu = fpdu.with(Leaf::flag(pi::RESTARTED, 1));
        }
        fpdu.with(Leaf::flag(pi::PRIORITY, self.priority))
            .with(Leaf::numeric(pi::MAX_ENTITY_SIZE, self.max_entity_size as u64))
    }
}
