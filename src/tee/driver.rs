//! Low-level TEE driver interface

use crate::device::Spid;
use crate::error::Result;
use async_trait::async_trait;
use uuid::Uuid;
use zeroize::Zeroizing;

/// Content management trustlet, addressed when no trustlet binary is given.
pub const CONTENT_MANAGER_UUID: Uuid = Uuid::from_bytes([
    0x07, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
]);

/// Which trusted application a session talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTarget {
    /// A trustlet already known to the secure side
    System(Uuid),
    /// A trustlet loaded from its binary for a service provider
    Trustlet { spid: Spid, binary: Vec<u8> },
}

impl Default for SessionTarget {
    fn default() -> Self {
        SessionTarget::System(CONTENT_MANAGER_UUID)
    }
}

/// World-shared memory. Wiped when dropped.
#[derive(Debug)]
pub struct SharedBuffer {
    data: Zeroizing<Vec<u8>>,
}

impl SharedBuffer {
    pub fn new(len: usize) -> Self {
        Self {
            data: Zeroizing::new(vec![0; len]),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Handle of an open session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub u32);

/// Operations of the TEE driver used by a secure channel.
///
/// Calls run in order: open the device, allocate the shared buffer, open a
/// session, then any number of notify/wait rounds, then tear down in
/// reverse.
#[async_trait]
pub trait TeeDriver: Send + Sync {
    fn open_device(&self) -> Result<()>;

    fn close_device(&self) -> Result<()>;

    fn allocate_buffer(&self, len: usize) -> Result<SharedBuffer>;

    fn free_buffer(&self, buffer: SharedBuffer);

    fn open_session(&self, target: &SessionTarget, buffer: &SharedBuffer) -> Result<SessionHandle>;

    fn close_session(&self, session: SessionHandle) -> Result<()>;

    /// Hand the buffer contents to the secure side.
    async fn notify(&self, session: SessionHandle, buffer: &SharedBuffer) -> Result<()>;

    /// Wait for the secure side to write its answer into the buffer.
    async fn wait_notification(&self, session: SessionHandle, buffer: &mut SharedBuffer) -> Result<()>;
}
