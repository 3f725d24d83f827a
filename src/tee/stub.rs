//! Stub TEE driver for hosts without a secure world.
//!
//! Provides the [`TeeDriver`] interface but every operation fails with a
//! connection error, so everything above the driver can run and report
//! the missing TEE the way it reports any other channel failure.

use super::driver::{SessionHandle, SessionTarget, SharedBuffer, TeeDriver};
use crate::error::{Error, Result};
use async_trait::async_trait;

/// Stub TEE driver: all operations return errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableDriver;

fn unavailable<T>() -> Result<T> {
    Err(Error::MobicoreConnection(
        "TEE not available on this host".to_string(),
    ))
}

#[async_trait]
impl TeeDriver for UnavailableDriver {
    fn open_device(&self) -> Result<()> {
        unavailable()
    }

    fn close_device(&self) -> Result<()> {
        Ok(())
    }

    fn allocate_buffer(&self, _len: usize) -> Result<SharedBuffer> {
        unavailable()
    }

    fn free_buffer(&self, _buffer: SharedBuffer) {}

    fn open_session(&self, _target: &SessionTarget, _buffer: &SharedBuffer) -> Result<SessionHandle> {
        unavailable()
    }

    fn close_session(&self, _session: SessionHandle) -> Result<()> {
        Ok(())
    }

    async fn notify(&self, _session: SessionHandle, _buffer: &SharedBuffer) -> Result<()> {
        unavailable()
    }

    async fn wait_notification(&self, _session: SessionHandle, _buffer: &mut SharedBuffer) -> Result<()> {
        unavailable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::tee::{ChannelOptions, ContentManager, TeeContentManager};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_stub_reports_connection_error() {
        let manager = TeeContentManager::new(Arc::new(UnavailableDriver), ChannelOptions::default());
        let err = manager.get_suid().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MobicoreConnection);
    }
}
