//! Partner and virtual-file directories.
//!
//! Both are read-only from the session's point of view and shared between
//! all connections. [`StaticDirectory`] serves both from the configuration
//! file; other backends implement the two traits.

use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::protocol::AccessType;

/// What a partner may do on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessDirection {
    /// Partner may only fetch files (SELECT).
    Read,
    /// Partner may only deposit files (CREATE).
    Write,
    #[default]
    Both,
}

impl AccessDirection {
    pub fn can_write(self) -> bool {
        matches!(self, AccessDirection::Write | AccessDirection::Both)
    }

    pub fn can_read(self) -> bool {
        matches!(self, AccessDirection::Read | AccessDirection::Both)
    }

    /// Whether a CONNECT asking for `access` is within these rights.
    pub fn allows(self, access: AccessType) -> bool {
        match access {
            AccessType::Write => self.can_write(),
            AccessType::Read => self.can_read(),
            AccessType::Mixed => self == AccessDirection::Both,
        }
    }
}

/// A known remote party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partner {
    /// Requestor identification (PI 3), may contain `*` and `?`.
    pub id: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Expected access control value (PI 5).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default)]
    pub access: AccessDirection,

    /// Filename patterns this partner may use. Empty means any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_files: Vec<String>,
}

impl Partner {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            password: None,
            access: AccessDirection::Both,
            allowed_files: Vec::new(),
        }
    }

    /// Check a presented password. A partner without one accepts anything.
    pub fn password_matches(&self, presented: Option<&str>) -> bool {
        match &self.password {
            None => true,
            Some(expected) => presented == Some(expected.as_str()),
        }
    }

    pub fn can_access_file(&self, filename: &str) -> bool {
        self.allowed_files.is_empty()
            || self
                .allowed_files
                .iter()
                .any(|pattern| wildcard_match(pattern, filename))
    }
}

/// Direction of a virtual file, seen from this server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileDirection {
    /// Peers deposit it here (CREATE).
    Receive,
    /// Peers fetch it from here (SELECT).
    Send,
    #[default]
    Both,
}

impl FileDirection {
    pub fn can_receive(self) -> bool {
        matches!(self, FileDirection::Receive | FileDirection::Both)
    }

    pub fn can_send(self) -> bool {
        matches!(self, FileDirection::Send | FileDirection::Both)
    }
}

/// A logical file name and where its content lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualFile {
    /// Logical filename (PI 12), may contain `*` and `?`.
    pub id: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub direction: FileDirection,

    /// Store directory for received content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receive_directory: Option<PathBuf>,

    /// Store directory holding content to send.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_directory: Option<PathBuf>,

    /// Name given to received content; see [`expand_template`].
    #[serde(default = "default_receive_filename")]
    pub receive_filename: String,

    /// Replace an existing target instead of refusing.
    #[serde(default)]
    pub overwrite: bool,

    /// Largest accepted content in bytes, 0 for no limit.
    #[serde(default)]
    pub max_file_size: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<u16>,
}

impl VirtualFile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            direction: FileDirection::Both,
            receive_directory: None,
            send_directory: None,
            receive_filename: default_receive_filename(),
            overwrite: false,
            max_file_size: 0,
            file_type: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_receive_filename() -> String {
    "${filename}_${timestamp}".to_string()
}

/// Partner lookup.
pub trait PartnerDirectory: Send + Sync {
    fn find_partner(&self, id: &str) -> Option<Partner>;
}

/// Virtual file lookup.
pub trait FileDirectory: Send + Sync {
    fn find_file(&self, name: &str) -> Option<VirtualFile>;
}

/// Directory backed by in-memory lists, usually from [`Config`](crate::config::Config).
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    partners: Vec<Partner>,
    files: Vec<VirtualFile>,
}

impl StaticDirectory {
    pub fn new(partners: Vec<Partner>, files: Vec<VirtualFile>) -> Self {
        Self { partners, files }
    }

    pub fn partners(&self) -> &[Partner] {
        &self.partners
    }

    pub fn files(&self) -> &[VirtualFile] {
        &self.files
    }
}

impl PartnerDirectory for StaticDirectory {
    fn find_partner(&self, id: &str) -> Option<Partner> {
        resolve(&self.partners, id, |p| &p.id).cloned()
    }
}

impl FileDirectory for StaticDirectory {
    fn find_file(&self, name: &str) -> Option<VirtualFile> {
        resolve(&self.files, name, |f| &f.id).cloned()
    }
}

/// Exact id, then case-insensitive id, then the first matching pattern.
fn resolve<'a, T>(entries: &'a [T], name: &str, id: impl Fn(&T) -> &String) -> Option<&'a T> {
    entries
        .iter()
        .find(|e| id(e) == name)
        .or_else(|| entries.iter().find(|e| id(e).eq_ignore_ascii_case(name)))
        .or_else(|| {
            entries.iter().find(|e| {
                let pattern = id(e);
                pattern.contains(['*', '?']) && wildcard_match(pattern, name)
            })
        })
}

/// Case-insensitive glob match supporting `*` and `?`.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().map(|c| c.to_ascii_uppercase()).collect();
    let t: Vec<char> = text.chars().map(|c| c.to_ascii_uppercase()).collect();

    let (mut pi, mut ti) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            backtrack = Some((pi, ti));
            pi += 1;
        } else if let Some((star, matched)) = backtrack {
            pi = star + 1;
            ti = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}

/// Expand a receive filename template.
///
/// Placeholders: `${filename}`, `${transferId}`, `${timestamp}`
/// (`yyyyMMddHHmmss`), `${date}` (`yyyyMMdd`), `${time}` (`HHmmss`).
pub fn expand_template(
    template: &str,
    filename: &str,
    transfer_id: u32,
    now: DateTime<Local>,
) -> String {
    let filename = if filename.is_empty() { "file" } else { filename };
    template
        .replace("${filename}", filename)
        .replace("${transferId}", &transfer_id.to_string())
        .replace("${timestamp}", &now.format("%Y%m%d%H%M%S").to_string())
        .replace("${date}", &now.format("%Y%m%d").to_string())
        .replace("${time}", &now.format("%H%M%S").to_string())
}
