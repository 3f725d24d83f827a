//! Container registry
//!
//! Persistent store of secure objects: the root container, service
//! provider containers and trustlet containers. Reads distinguish a
//! missing object from a failed read.

use crate::device::Spid;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Result of reading a registry object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Present(T),
    Absent,
    Failed(String),
}

/// Lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Unregistered,
    Registered,
    Activated,
    RootLocked,
    SpLocked,
    RootSpLocked,
}

/// A service provider container with the trustlets it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpContainer {
    pub state: ContainerState,
    pub trustlets: Vec<Uuid>,
}

/// Access to the container registry.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn root_state(&self) -> Lookup<ContainerState>;

    async fn sp_container(&self, spid: Spid) -> Lookup<SpContainer>;

    async fn trustlet_state(&self, spid: Spid, uuid: Uuid) -> Lookup<ContainerState>;

    /// Persist a secure object received from the server.
    async fn store_secure_object(&self, object: &[u8]) -> Result<()>;

    /// Persist a trustlet binary under an existing trustlet container.
    async fn store_trustlet(&self, spid: Spid, uuid: Uuid, binary: &[u8]) -> Result<()>;
}

#[derive(Debug, Default)]
struct RegistryState {
    root: Option<ContainerState>,
    sp: HashMap<Spid, SpContainer>,
    trustlets: HashMap<(Spid, Uuid), ContainerState>,
    binaries: HashMap<(Spid, Uuid), Vec<u8>>,
    objects: Vec<Vec<u8>>,
    read_only: bool,
    unreadable: bool,
}

/// In-memory registry.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    state: RwLock<RegistryState>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_root(&self, state: ContainerState) {
        self.state.write().await.root = Some(state);
    }

    pub async fn insert_sp(&self, spid: Spid, container: SpContainer) {
        self.state.write().await.sp.insert(spid, container);
    }

    pub async fn insert_trustlet(&self, spid: Spid, uuid: Uuid, state: ContainerState) {
        self.state.write().await.trustlets.insert((spid, uuid), state);
    }

    /// Make every write fail, as a full or read-only store would.
    pub async fn set_read_only(&self, read_only: bool) {
        self.state.write().await.read_only = read_only;
    }

    /// Make every read fail, as a corrupted store would.
    pub async fn set_unreadable(&self, unreadable: bool) {
        self.state.write().await.unreadable = unreadable;
    }

    /// Secure objects stored so far, oldest first.
    pub async fn stored_objects(&self) -> Vec<Vec<u8>> {
        self.state.read().await.objects.clone()
    }

    pub async fn trustlet_binary(&self, spid: Spid, uuid: Uuid) -> Option<Vec<u8>> {
        self.state.read().await.binaries.get(&(spid, uuid)).cloned()
    }
}

fn lookup<T: Clone>(state: &RegistryState, value: Option<&T>) -> Lookup<T> {
    if state.unreadable {
        return Lookup::Failed("registry is unreadable".to_string());
    }
    match value {
        Some(v) => Lookup::Present(v.clone()),
        None => Lookup::Absent,
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn root_state(&self) -> Lookup<ContainerState> {
        let state = self.state.read().await;
        lookup(&state, state.root.as_ref())
    }

    async fn sp_container(&self, spid: Spid) -> Lookup<SpContainer> {
        let state = self.state.read().await;
        lookup(&state, state.sp.get(&spid))
    }

    async fn trustlet_state(&self, spid: Spid, uuid: Uuid) -> Lookup<ContainerState> {
        let state = self.state.read().await;
        lookup(&state, state.trustlets.get(&(spid, uuid)))
    }

    async fn store_secure_object(&self, object: &[u8]) -> Result<()> {
        let mut state = self.state.write().await;
        if state.read_only {
            return Err(Error::Registry("registry is read-only".to_string()));
        }
        state.objects.push(object.to_vec());
        tracing::debug!(bytes = object.len(), "Stored secure object");
        Ok(())
    }

    async fn store_trustlet(&self, spid: Spid, uuid: Uuid, binary: &[u8]) -> Result<()> {
        let mut state = self.state.write().await;
        if state.read_only {
            return Err(Error::Registry("registry is read-only".to_string()));
        }
        state.binaries.insert((spid, uuid), binary.to_vec());
        Ok(())
    }
}
