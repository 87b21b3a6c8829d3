//! Configuration management for pesit-engine.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::directory::{Partner, StaticDirectory, VirtualFile};
use crate::error::{PesitError, Result};
use crate::protocol::HEADER_SIZE;

/// Highest protocol version this engine speaks.
pub const MAX_PROTOCOL_VERSION: u16 = 2;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Listener and connect-time policy.
    #[serde(default)]
    pub server: ServerConfig,

    /// Transfer negotiation limits.
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Known partners.
    #[serde(default, rename = "partner")]
    pub partners: Vec<Partner>,

    /// Virtual files.
    #[serde(default, rename = "file")]
    pub files: Vec<VirtualFile>,
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| PesitError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| PesitError::Config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| PesitError::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| PesitError::Config(format!("Failed to write config: {e}")))?;

        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.server.server_id.trim().is_empty() {
            return Err(PesitError::Config("server_id must not be empty".into()));
        }

        if self.server.max_connections == 0 {
            return Err(PesitError::Config("max_connections must be positive".into()));
        }

        let entity = self.transfer.max_entity_size as usize;
        if !(HEADER_SIZE + 1..=u16::MAX as usize).contains(&entity) {
            return Err(PesitError::Config(format!(
                "max_entity_size {entity} outside {}..=65535",
                HEADER_SIZE + 1
            )));
        }

        let mut seen = HashSet::new();
        if let Some(dup) = self.partners.iter().find(|p| !seen.insert(p.id.to_ascii_uppercase())) {
            return Err(PesitError::Config(format!("duplicate partner id {}", dup.id)));
        }

        let mut seen = HashSet::new();
        if let Some(dup) = self.files.iter().find(|f| !seen.insert(f.id.to_ascii_uppercase())) {
            return Err(PesitError::Config(format!("duplicate file id {}", dup.id)));
        }

        Ok(())
    }

    /// Directory serving the configured partners and files.
    pub fn directory(&self) -> StaticDirectory {
        StaticDirectory::new(self.partners.clone(), self.files.clone())
    }

    /// Create example configuration.
    pub fn example() -> Self {
        let mut file = VirtualFile::new("FILE");
        file.receive_filename = "${filename}_${transferId}".into();
        Self {
            partners: vec![Partner::new("LOOP")],
            files: vec![file],
            ..Default::default()
        }
    }
}

/// Listener and connect-time policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Our identity; CONNECT must name it in PI 4.
    #[serde(default = "default_server_id")]
    pub server_id: String,

    /// Highest version accepted.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u16,

    /// Maximum concurrent connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Idle time allowed between two frames.
    #[serde(default = "default_read_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,

    /// Refuse requestors missing from the partner list.
    #[serde(default = "default_true")]
    pub strict_partner_check: bool,

    /// Refuse filenames missing from the file list.
    #[serde(default)]
    pub strict_file_check: bool,

    /// Store directory for received files without a virtual file entry.
    #[serde(default = "default_receive_directory")]
    pub receive_directory: PathBuf,

    /// Store directory for sent files without a virtual file entry.
    #[serde(default = "default_send_directory")]
    pub send_directory: PathBuf,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5000))
}
fn default_server_id() -> String {
    "PESIT_SERVER".into()
}
fn default_protocol_version() -> u16 {
    MAX_PROTOCOL_VERSION
}
fn default_max_connections() -> usize {
    100
}
fn default_read_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_true() -> bool {
    true
}
fn default_receive_directory() -> PathBuf {
    PathBuf::from("received")
}
fn default_send_directory() -> PathBuf {
    PathBuf::from("outgoing")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            server_id: default_server_id(),
            protocol_version: default_protocol_version(),
            max_connections: default_max_connections(),
            read_timeout: default_read_timeout(),
            strict_partner_check: true,
            strict_file_check: false,
            receive_directory: default_receive_directory(),
            send_directory: default_send_directory(),
        }
    }
}

/// Transfer negotiation limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Largest data entity we accept (PI 25).
    #[serde(default = "default_max_entity_size")]
    pub max_entity_size: u16,

    #[serde(default = "default_true")]
    pub sync_points_enabled: bool,

    /// Sync interval we offer, in KiB. 0 leaves it to the requester.
    #[serde(default)]
    pub sync_interval_kb: u16,

    /// Largest sync acknowledgment window we accept.
    #[serde(default = "default_sync_window")]
    pub sync_window: u8,

    #[serde(default = "default_true")]
    pub resync_enabled: bool,

    /// RESYN exchanges allowed per transfer.
    #[serde(default = "default_max_resyncs")]
    pub max_resyncs: u32,

    #[serde(default)]
    pub crc_enabled: bool,
}

fn default_max_entity_size() -> u16 {
    4096
}
fn default_sync_window() -> u8 {
    16
}
fn default_max_resyncs() -> u32 {
    3
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_entity_size: default_max_entity_size(),
            sync_points_enabled: true,
            sync_interval_kb: 0,
            sync_window: default_sync_window(),
            resync_enabled: true,
            max_resyncs: default_max_resyncs(),
            crc_enabled: false,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text or json).
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Enable colored output.
    #[serde(default = "default_true")]
    pub color: bool,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: true,
        }
    }
}

/// Initialize logging.
///
/// `RUST_LOG` overrides the configured level. Returns `false` when a global
/// subscriber was already installed.
pub fn init_logging(config: &LoggingConfig) -> bool {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = if config.format == "json" {
        subscriber.with(fmt::layer().json()).try_init()
    } else {
        subscriber
            .with(fmt::layer().with_ansi(config.color))
            .try_init()
    };

    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{AccessDirection, FileDirection};

    #[test]
    fn test_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.server.listen.port(), 5000);
        assert_eq!(config.server.server_id, "PESIT_SERVER");
        assert_eq!(config.server.max_connections, 100);
        assert_eq!(config.server.read_timeout, Duration::from_secs(60));
        assert!(config.server.strict_partner_check);
        assert!(!config.server.strict_file_check);
        assert_eq!(config.transfer.max_entity_size, 4096);
        assert_eq!(config.transfer.max_resyncs, 3);
        assert!(config.partners.is_empty());
    }

    #[test]
    fn test_parse_full_document() {
        let config = Config::from_toml(
            r#"
            [server]
            server_id = "BANK_GW"
            read_timeout = "15s"
            strict_file_check = true

            [transfer]
            max_entity_size = 512
            sync_interval_kb = 32

            [[partner]]
            id = "LOOP"
            password = "secret"
            access = "write"

            [[file]]
            id = "PAY*"
            direction = "receive"
            receive_directory = "in/pay"
            overwrite = true
            "#,
        )
        .unwrap();
        assert_eq!(config.server.server_id, "BANK_GW");
        assert_eq!(config.server.read_timeout, Duration::from_secs(15));
        assert_eq!(config.transfer.max_entity_size, 512);
        assert_eq!(config.partners[0].access, AccessDirection::Write);
        assert_eq!(config.files[0].direction, FileDirection::Receive);
        assert!(config.files[0].overwrite);
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.server.max_connections = 0;
        assert!(config.validate().is_err());
        config.server.max_connections = 1;

        config.transfer.max_entity_size = 6;
        assert!(config.validate().is_err());
        config.transfer.max_entity_size = 7;
        assert!(config.validate().is_ok());

        config.partners = vec![Partner::new("LOOP"), Partner::new("loop")];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate partner id"));
        config.partners.clear();

        config.server.server_id = " ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pesit.toml");
        let config = Config::example();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.partners, config.partners);
        assert_eq!(loaded.files, config.files);
        assert_eq!(loaded.server.read_timeout, config.server.read_timeout);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/pesit.toml").unwrap_err();
        assert!(matches!(err, PesitError::Config(_)));
    }

    #[test]
    fn test_init_logging_twice() {
        let config = LoggingConfig::default();
        init_logging(&config);
        assert!(!init_logging(&config));
    }
}
