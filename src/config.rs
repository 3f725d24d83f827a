//! trustprov configuration management

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default server enrollment endpoint
pub const DEFAULT_SE_URL: &str = "https://se.cgbe.trustonic.com:8443/service-enabler/enrollment/";

/// Main provisioning agent configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    /// Server connection settings
    #[serde(default)]
    pub server: ServerConfig,

    /// TEE channel settings
    #[serde(default)]
    pub tee: TeeConfig,

    /// Device information reported to the server
    #[serde(default)]
    pub device: DeviceConfig,

    /// Command dispatch settings
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

impl ProvisionerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Default configuration file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs_next::config_dir().map(|dir| dir.join("trustprov").join("config.toml"))
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.server.base_url.trim().is_empty() {
            return Err(Error::Config("server.base_url must not be empty".to_string()));
        }
        if !self.server.base_url.ends_with('/') {
            return Err(Error::Config("server.base_url must end with '/'".to_string()));
        }
        if self.tee.buffer_size == 0 {
            return Err(Error::Config("tee.buffer_size must be positive".to_string()));
        }
        if let Some(suid) = &self.device.suid {
            crate::device::Suid::from_hex(suid)
                .map_err(|e| Error::Config(format!("device.suid: {}", e)))?;
        }
        Ok(())
    }
}

/// Server connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base address of the enrollment service; links are built beneath it
    pub base_url: String,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// Content type of the XML documents sent to the server
    pub content_type: String,

    /// Accept header for server responses
    pub accept: String,

    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SE_URL.to_string(),
            request_timeout_secs: 30,
            content_type: "application/vnd.mcorecm+xml;v=1.0".to_string(),
            accept: "application/json".to_string(),
            user_agent: format!("trustprov/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// TEE channel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeeConfig {
    /// Size of the shared buffer used for one command batch
    pub buffer_size: usize,

    /// How long to wait for the secure side to answer a batch
    pub notification_timeout_ms: u64,
}

impl Default for TeeConfig {
    fn default() -> Self {
        Self {
            buffer_size: 64 * 1024,
            notification_timeout_ms: 60_000,
        }
    }
}

/// Device information overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub imei_esn: Option<String>,
    pub mno: Option<String>,
    pub brand: Option<String>,
    pub manufacturer: Option<String>,
    pub hardware: Option<String>,
    pub model: Option<String>,
    pub version: Option<String>,

    /// SUID as hex; when set the secure side is not asked for it
    pub suid: Option<String>,

    /// Treat the device as factory reset and clean up its registration first
    pub assume_factory_reset: bool,
}

/// Order of results in a command result document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResultOrder {
    /// Protocol results first, then upload results
    #[default]
    Grouped,
    /// Results in original command order
    Interleaved,
}

/// Command dispatch configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub result_order: ResultOrder,
}
