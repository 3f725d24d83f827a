//! Provisioning agent: the public entry point
//!
//! Starts background provisioning sessions and answers container and TEE
//! queries. At most one session runs at a time.

use crate::codec::TrustletInstallationRequest;
use crate::config::{ProvisionerConfig, ResultOrder};
use crate::device::{DeviceInfoProvider, Spid, StaticDeviceInfo, Suid, TeeVersion};
use crate::dispatch::Dispatcher;
use crate::engine::{
    validate_base_url, LinkBuilder, ProvisioningSession, SessionContext, SessionKind, SessionRequest,
};
use crate::error::{Error, Result};
use crate::protocol::{ProvisioningState, StateCallback};
use crate::registry::{ContainerState, Lookup, MemoryRegistry, Registry};
use crate::tee::{
    BatchOutcome, ChannelOptions, CmpRequest, ContentManager, TeeContentManager, TeeDriver,
    UnavailableDriver,
};
use crate::transport::{HttpTransport, Transport};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// A service provider container and the state of each of its trustlets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpContainerStructure {
    pub state: ContainerState,
    pub trustlets: Vec<(Uuid, ContainerState)>,
}

/// Runs provisioning sessions against the server.
pub struct ProvisioningAgent {
    transport: Arc<dyn Transport>,
    content: Arc<dyn ContentManager>,
    registry: Arc<dyn Registry>,
    device: Arc<dyn DeviceInfoProvider>,
    result_order: ResultOrder,
    suid: Option<Suid>,
    base_url: RwLock<String>,
    session_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for ProvisioningAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningAgent")
            .field("result_order", &self.result_order)
            .field("suid", &self.suid)
            .finish_non_exhaustive()
    }
}

impl ProvisioningAgent {
    pub fn builder() -> ProvisioningAgentBuilder {
        ProvisioningAgentBuilder::new()
    }

    /// Start a provisioning session. `spid` 0 provisions the device only.
    pub async fn provision(&self, spid: Spid, callback: StateCallback) -> Result<JoinHandle<()>> {
        self.start(SessionKind::Provision, spid, callback).await
    }

    /// Start a session that installs a trustlet for `spid`.
    pub async fn install_trustlet(
        &self,
        spid: Spid,
        request: TrustletInstallationRequest,
        callback: StateCallback,
    ) -> Result<JoinHandle<()>> {
        if request.payload.data().is_empty() {
            return Err(Error::IllegalArgument("trustlet payload is empty".to_string()));
        }
        self.start(SessionKind::InstallTrustlet(request), spid, callback)
            .await
    }

    /// Start a session that removes the device's root container.
    pub async fn unregister_root_container(&self, callback: StateCallback) -> Result<JoinHandle<()>> {
        self.start(SessionKind::Unregister, 0, callback).await
    }

    /// Change the server base address used by later sessions.
    pub async fn set_se_address(&self, url: &str) -> Result<()> {
        validate_base_url(url)?;
        *self.base_url.write().await = url.to_string();
        tracing::info!(address = %url, "Server address changed");
        Ok(())
    }

    pub async fn se_address(&self) -> String {
        self.base_url.read().await.clone()
    }

    /// TEE version information.
    pub async fn get_version(&self) -> Result<TeeVersion> {
        self.content.get_version().await
    }

    /// The device SUID, from configuration or from the secure side.
    pub async fn get_suid(&self) -> Result<Suid> {
        match self.suid {
            Some(suid) => Ok(suid),
            None => self.content.get_suid().await,
        }
    }

    /// Run protocol messages directly on the secure side. Refused while a
    /// session is running.
    pub async fn execute_cmp_commands(&self, requests: &[CmpRequest]) -> Result<BatchOutcome> {
        let _guard = self.try_lock()?;
        if requests.is_empty() {
            return Err(Error::IllegalArgument("no commands given".to_string()));
        }
        self.content.execute(requests).await
    }

    pub async fn is_root_container_registered(&self) -> Result<bool> {
        match self.registry.root_state().await {
            Lookup::Present(state) => Ok(state != ContainerState::Unregistered),
            Lookup::Absent => Ok(false),
            Lookup::Failed(reason) => Err(Error::Registry(reason)),
        }
    }

    pub async fn is_sp_container_registered(&self, spid: Spid) -> Result<bool> {
        match self.sp_container_structure(spid).await? {
            Some(structure) => Ok(structure.state != ContainerState::Unregistered),
            None => Ok(false),
        }
    }

    /// The container of `spid`, or `None` when it does not exist.
    pub async fn sp_container_structure(&self, spid: Spid) -> Result<Option<SpContainerStructure>> {
        let container = match self.registry.sp_container(spid).await {
            Lookup::Present(container) => container,
            Lookup::Absent => return Ok(None),
            Lookup::Failed(reason) => return Err(Error::Registry(reason)),
        };

        let mut trustlets = Vec::with_capacity(container.trustlets.len());
        for uuid in container.trustlets {
            match self.registry.trustlet_state(spid, uuid).await {
                Lookup::Present(state) => trustlets.push((uuid, state)),
                Lookup::Absent => {
                    return Err(Error::Registry(format!(
                        "trustlet container {} listed but missing",
                        uuid
                    )))
                }
                Lookup::Failed(reason) => return Err(Error::Registry(reason)),
            }
        }

        Ok(Some(SpContainerStructure {
            state: container.state,
            trustlets,
        }))
    }

    /// Store a trustlet binary under its existing container.
    pub async fn store_trustlet(&self, spid: Spid, uuid: Uuid, binary: &[u8]) -> Result<()> {
        if binary.is_empty() {
            return Err(Error::IllegalArgument("trustlet binary is empty".to_string()));
        }
        match self.registry.trustlet_state(spid, uuid).await {
            Lookup::Present(_) => {}
            Lookup::Absent => {
                return Err(Error::IllegalArgument(format!(
                    "no trustlet container {} for spid {}",
                    uuid, spid
                )))
            }
            Lookup::Failed(reason) => return Err(Error::Registry(reason)),
        }
        self.registry
            .store_trustlet(spid, uuid, binary)
            .await
            .map_err(|e| Error::Registry(e.to_string()))
    }

    fn try_lock(&self) -> Result<OwnedMutexGuard<()>> {
        Arc::clone(&self.session_lock)
            .try_lock_owned()
            .map_err(|_| Error::Lock("a provisioning session is running".to_string()))
    }

    async fn start(
        &self,
        kind: SessionKind,
        spid: Spid,
        callback: StateCallback,
    ) -> Result<JoinHandle<()>> {
        let guard = self.try_lock()?;
        let suid = self.get_suid().await?;
        let links = LinkBuilder::new(self.se_address().await);

        let dispatcher = Dispatcher::new(Arc::clone(&self.content), Arc::clone(&self.registry))
            .with_callback(Arc::clone(&callback))
            .with_order(self.result_order);

        let context = SessionContext {
            transport: Arc::clone(&self.transport),
            content: Arc::clone(&self.content),
            device: Arc::clone(&self.device),
            dispatcher: Arc::new(dispatcher),
            links,
            callback: Arc::clone(&callback),
        };
        let session = ProvisioningSession::new(SessionRequest { kind, spid, suid }, context);

        Ok(tokio::spawn(async move {
            let _guard = guard;
            session.run().await;
            callback(ProvisioningState::ThreadExiting);
        }))
    }
}

/// Builder for [`ProvisioningAgent`].
pub struct ProvisioningAgentBuilder {
    config: ProvisionerConfig,
    transport: Option<Arc<dyn Transport>>,
    content: Option<Arc<dyn ContentManager>>,
    driver: Option<Arc<dyn TeeDriver>>,
    registry: Option<Arc<dyn Registry>>,
    device: Option<Arc<dyn DeviceInfoProvider>>,
}

impl ProvisioningAgentBuilder {
    pub fn new() -> Self {
        Self {
            config: ProvisionerConfig::default(),
            transport: None,
            content: None,
            driver: None,
            registry: None,
            device: None,
        }
    }

    /// Set the configuration
    pub fn config(mut self, config: ProvisionerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a TEE driver; batches run through [`TeeContentManager`].
    pub fn driver(mut self, driver: Arc<dyn TeeDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Use a ready-made content manager. Takes precedence over [`Self::driver`].
    pub fn content_manager(mut self, content: Arc<dyn ContentManager>) -> Self {
        self.content = Some(content);
        self
    }

    pub fn registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn device_info(mut self, device: Arc<dyn DeviceInfoProvider>) -> Self {
        self.device = Some(device);
        self
    }

    /// Build the agent
    pub fn build(self) -> Result<ProvisioningAgent> {
        let config = self.config;
        config.validate()?;
        validate_base_url(&config.server.base_url)?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&config.server)?),
        };

        let content: Arc<dyn ContentManager> = match (self.content, self.driver) {
            (Some(content), _) => content,
            (None, driver) => {
                let driver: Arc<dyn TeeDriver> = match driver {
                    Some(driver) => driver,
                    None => {
                        tracing::warn!("No TEE driver configured, secure side operations will fail");
                        Arc::new(UnavailableDriver)
                    }
                };
                Arc::new(TeeContentManager::new(driver, ChannelOptions::from(&config.tee)))
            }
        };

        let registry: Arc<dyn Registry> = match self.registry {
            Some(registry) => registry,
            None => Arc::new(MemoryRegistry::new()),
        };
        let device: Arc<dyn DeviceInfoProvider> = match self.device {
            Some(device) => device,
            None => Arc::new(StaticDeviceInfo::from(&config.device)),
        };

        let suid = config.device.suid.as_deref().map(Suid::from_hex).transpose()?;

        Ok(ProvisioningAgent {
            transport,
            content,
            registry,
            device,
            result_order: config.dispatch.result_order,
            suid,
            base_url: RwLock::new(config.server.base_url),
            session_lock: Arc::new(Mutex::new(())),
        })
    }
}

impl Default for ProvisioningAgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}
