//! Server link construction

use crate::device::{Spid, Suid};
use crate::error::{Error, Result};
use uuid::Uuid;

/// Longest base address accepted, in bytes.
pub const MAX_BASE_URL_LEN: usize = 254;

/// Check a base address before it is used.
pub fn validate_base_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(Error::Internal("server address is empty".to_string()));
    }
    if url.len() > MAX_BASE_URL_LEN {
        return Err(Error::IllegalArgument(format!(
            "server address is {} bytes, at most {} allowed",
            url.len(),
            MAX_BASE_URL_LEN
        )));
    }
    Ok(())
}

/// Builds the links a session starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkBuilder {
    base: String,
}

impl LinkBuilder {
    /// `base` must end with the path separator the server expects.
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// `<base><suid hex>`
    pub fn device(&self, suid: &Suid) -> String {
        format!("{}{}", self.base, suid.to_hex())
    }

    /// Device link, followed by `/<spid>` when a service provider is given.
    pub fn registration(&self, suid: &Suid, spid: Spid) -> String {
        let mut link = self.device(suid);
        if spid != 0 {
            link.push_str(&format!("/{}", spid as i32));
        }
        link
    }

    /// Registration link followed by `/<uuid>` in hyphenated form.
    pub fn trustlet(&self, suid: &Suid, spid: Spid, uuid: &Uuid) -> String {
        format!("{}/{}", self.registration(suid, spid), uuid.hyphenated())
    }
}
