//! Device identity and platform information

use crate::config::DeviceConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Service provider identifier. `0` means "no service provider".
pub type Spid = u32;

/// Length of a secure-element unique identifier in bytes.
pub const SUID_LEN: usize = 16;

/// Secure-element unique identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Suid(pub [u8; SUID_LEN]);

impl Suid {
    /// Lowercase hex, two digits per byte.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(value: &str) -> Result<Self> {
        let bytes = hex::decode(value.trim())
            .map_err(|e| Error::IllegalArgument(format!("Invalid SUID '{}': {}", value, e)))?;
        Self::from_slice(&bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; SUID_LEN] = bytes.try_into().map_err(|_| {
            Error::IllegalArgument(format!(
                "SUID must be {} bytes, got {}",
                SUID_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }
}

impl fmt::Display for Suid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Operating-system level device information. Absent fields are omitted
/// from the system information document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsInfo {
    pub imei_esn: Option<String>,
    pub mno: Option<String>,
    pub brand: Option<String>,
    pub manufacturer: Option<String>,
    pub hardware: Option<String>,
    pub model: Option<String>,
    pub version: Option<String>,
}

/// TEE version information reported by the secure side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeeVersion {
    pub product_id: String,
    pub mci: u32,
    pub so: u32,
    pub mclf: u32,
    pub container: u32,
    pub mc_config: u32,
    pub tl_api: u32,
    pub dr_api: u32,
    pub cmp: u32,
}

/// Source of platform facts the session needs.
#[async_trait]
pub trait DeviceInfoProvider: Send + Sync {
    /// Operating-system information for the system information document.
    async fn os_info(&self) -> Result<OsInfo>;

    /// Whether the device looks factory-reset and needs its registration
    /// cleaned up before provisioning continues.
    fn factory_reset_suspected(&self) -> bool;
}

/// Device information taken from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticDeviceInfo {
    info: OsInfo,
    factory_reset: bool,
}

impl StaticDeviceInfo {
    pub fn new(info: OsInfo) -> Self {
        Self {
            info,
            factory_reset: false,
        }
    }

    pub fn with_factory_reset(mut self, suspected: bool) -> Self {
        self.factory_reset = suspected;
        self
    }
}

impl From<&DeviceConfig> for StaticDeviceInfo {
    fn from(config: &DeviceConfig) -> Self {
        let info = OsInfo {
            imei_esn: config.imei_esn.clone(),
            mno: config.mno.clone(),
            brand: config.brand.clone(),
            manufacturer: config.manufacturer.clone(),
            hardware: config.hardware.clone(),
            model: config.model.clone(),
            version: config.version.clone(),
        };
        Self::new(info).with_factory_reset(config.assume_factory_reset)
    }
}

#[async_trait]
impl DeviceInfoProvider for StaticDeviceInfo {
    async fn os_info(&self) -> Result<OsInfo> {
        Ok(self.info.clone())
    }

    fn factory_reset_suspected(&self) -> bool {
        self.factory_reset
    }
}
