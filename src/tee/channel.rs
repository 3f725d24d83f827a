//! Secure channel to a trusted application.
//!
//! A channel owns one open device, one shared buffer and one session.
//! Everything it acquired is released when the channel is dropped, on every
//! exit path.

use super::cmp::{self, CmpBatchResponse, CmpRequest};
use super::driver::{SessionHandle, SessionTarget, SharedBuffer, TeeDriver};
use crate::config::TeeConfig;
use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

/// Settings for opening a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOptions {
    pub buffer_size: usize,
    pub timeout: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        ChannelOptions::from(&TeeConfig::default())
    }
}

impl From<&TeeConfig> for ChannelOptions {
    fn from(config: &TeeConfig) -> Self {
        Self {
            buffer_size: config.buffer_size,
            timeout: Duration::from_millis(config.notification_timeout_ms),
        }
    }
}

/// An open session with a trusted application.
pub struct SecureChannel {
    driver: Arc<dyn TeeDriver>,
    device_open: bool,
    buffer: Option<SharedBuffer>,
    session: Option<SessionHandle>,
    timeout: Duration,
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("session", &self.session)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl SecureChannel {
    /// Open the device, allocate the shared buffer and open a session.
    pub fn open(
        driver: Arc<dyn TeeDriver>,
        target: &SessionTarget,
        options: &ChannelOptions,
    ) -> Result<Self> {
        driver
            .open_device()
            .map_err(|e| Error::MobicoreConnection(format!("Failed to open TEE device: {}", e)))?;

        let mut channel = Self {
            driver: Arc::clone(&driver),
            device_open: true,
            buffer: None,
            session: None,
            timeout: options.timeout,
        };

        let buffer = driver.allocate_buffer(options.buffer_size).map_err(|e| {
            Error::OutOfMemory(format!(
                "Failed to allocate {} byte shared buffer: {}",
                options.buffer_size, e
            ))
        })?;
        let buffer = channel.buffer.insert(buffer);

        let session = driver
            .open_session(target, buffer)
            .map_err(|e| Error::MobicoreConnection(format!("Failed to open session: {}", e)))?;
        channel.session = Some(session);

        tracing::debug!(session = session.0, "Secure channel open");
        Ok(channel)
    }

    /// Send one command batch and wait for the answer.
    pub async fn execute(&mut self, requests: &[CmpRequest]) -> Result<CmpBatchResponse> {
        let (Some(session), Some(buffer)) = (self.session, self.buffer.as_mut()) else {
            return Err(Error::Internal("Secure channel is closed".to_string()));
        };

        let encoded = cmp::encode_requests(requests, buffer.len())?;
        buffer.as_mut_slice()[..encoded.len()].copy_from_slice(&encoded);

        self.driver
            .notify(session, buffer)
            .await
            .map_err(|e| Error::MobicoreConnection(format!("Failed to notify trustlet: {}", e)))?;

        match tokio::time::timeout(self.timeout, self.driver.wait_notification(session, buffer)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(Error::MobicoreConnection(format!(
                    "Waiting for trustlet failed: {}",
                    e
                )))
            }
            Err(_) => {
                return Err(Error::MobicoreConnection(format!(
                    "Trustlet did not answer within {:?}",
                    self.timeout
                )))
            }
        }

        cmp::decode_responses(buffer.as_slice())
    }

    /// Close the session and release everything. Same as dropping.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = self.driver.close_session(session) {
                tracing::warn!(session = session.0, "Failed to close session: {}", e);
            }
        }
        if let Some(buffer) = self.buffer.take() {
            self.driver.free_buffer(buffer);
        }
        if std::mem::take(&mut self.device_open) {
            if let Err(e) = self.driver.close_device() {
                tracing::warn!("Failed to close TEE device: {}", e);
            }
        }
    }
}

impl Drop for SecureChannel {
    fn drop(&mut self) {
        self.release();
    }
}
