//! Provisioning session loop
//!
//! Follows the relations the server hands out until it stops handing them
//! out, reporting progress through the caller's callback.
//!
//! ```text
//!  initial_post / initial_delete ──► server ──► relation ─┬─ system_info    PUT device info
//!                 ▲                                      ├─ command_result POST results
//!                 │                                      ├─ next           GET
//!                 └────────── next exchange ◄────────────┼─ self           repeat last request
//!                                                        └─ <none>         Finished
//! ```

use super::links::LinkBuilder;
use crate::codec::{build_system_info_document, build_trustlet_request_document, TrustletInstallationRequest};
use crate::device::{DeviceInfoProvider, OsInfo, Spid, Suid, TeeVersion};
use crate::dispatch::Dispatcher;
use crate::error::{ErrorKind, Result};
use crate::protocol::{Exchange, ProvisioningState, Relation, StateCallback};
use crate::tee::ContentManager;
use crate::transport::{Transport, Verb};
use std::sync::Arc;

/// What a session is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionKind {
    /// Provision the device, optionally for a service provider
    Provision,
    /// Install a trustlet for a service provider
    InstallTrustlet(TrustletInstallationRequest),
    /// Remove the device's root container registration
    Unregister,
}

/// Inputs of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub kind: SessionKind,
    pub spid: Spid,
    pub suid: Suid,
}

/// Collaborators a session talks to.
#[derive(Clone)]
pub struct SessionContext {
    pub transport: Arc<dyn Transport>,
    pub content: Arc<dyn ContentManager>,
    pub device: Arc<dyn DeviceInfoProvider>,
    pub dispatcher: Arc<Dispatcher>,
    pub links: LinkBuilder,
    pub callback: StateCallback,
}

/// One provisioning conversation with the server.
pub struct ProvisioningSession {
    request: SessionRequest,
    context: SessionContext,
    /// Last exchange that was acted on, replayed on `relation/self`
    last_used: Option<Exchange>,
    /// Exchange parked while a factory-reset cleanup runs
    pending: Option<Exchange>,
}

impl ProvisioningSession {
    pub fn new(request: SessionRequest, context: SessionContext) -> Self {
        Self {
            request,
            context,
            last_used: None,
            pending: None,
        }
    }

    fn notify(&self, state: ProvisioningState) {
        (self.context.callback)(state);
    }

    fn fail(&self, kind: ErrorKind) {
        tracing::error!(error = %kind, "Provisioning failed");
        self.notify(ProvisioningState::Error(kind));
    }

    /// Run the session to completion. Does not report `ThreadExiting`; the
    /// task that owns the session does.
    pub async fn run(mut self) {
        tracing::info!(
            spid = self.request.spid,
            suid = %self.request.suid,
            "Provisioning session started"
        );
        self.notify(ProvisioningState::Connecting);

        if let Err(e) = self.context.transport.open().await {
            tracing::error!("Failed to open transport: {}", e);
            self.fail(e.kind());
            return;
        }

        match self.initial_exchange() {
            Ok(mut current) => {
                if self.context.device.factory_reset_suspected()
                    && current.relation != Relation::InitialDelete
                {
                    tracing::info!("Device looks factory reset, removing stale registration first");
                    let cleanup = Exchange::new(
                        self.context.links.device(&self.request.suid),
                        Relation::InitialDelete,
                        None,
                    );
                    self.pending = Some(std::mem::replace(&mut current, cleanup));
                }

                while let Some(next) = self.step(current).await {
                    current = next;
                }
            }
            Err(e) => self.fail(e.kind()),
        }

        self.context.transport.close().await;
        tracing::info!("Provisioning session ended");
    }

    fn initial_exchange(&self) -> Result<Exchange> {
        let SessionRequest { kind, spid, suid } = &self.request;
        let links = &self.context.links;
        let exchange = match kind {
            SessionKind::Provision => {
                Exchange::new(links.registration(suid, *spid), Relation::InitialPost, None)
            }
            SessionKind::InstallTrustlet(request) => Exchange::new(
                links.trustlet(suid, *spid, &request.uuid),
                Relation::InitialPost,
                Some(build_trustlet_request_document(request)?),
            ),
            SessionKind::Unregister => {
                Exchange::new(links.device(suid), Relation::InitialDelete, None)
            }
        };
        Ok(exchange)
    }

    /// Act on one exchange. `None` ends the loop.
    async fn step(&mut self, current: Exchange) -> Option<Exchange> {
        tracing::debug!(relation = %current.relation, link = ?current.link, "Next step");

        match current.relation {
            Relation::End => {
                if let Some(parked) = self.pending.take() {
                    tracing::info!("Cleanup done, resuming parked request");
                    return Some(parked);
                }
                self.notify(ProvisioningState::Finished);
                None
            }
            Relation::Repeat => match self.last_used.clone() {
                Some(previous) => Some(previous),
                None => {
                    tracing::error!("Server asked to repeat, but nothing was sent yet");
                    self.fail(ErrorKind::IllegalArgument);
                    None
                }
            },
            Relation::Unknown(ref relation) => {
                tracing::error!(relation = %relation, "Unknown relation");
                self.fail(ErrorKind::IllegalArgument);
                None
            }
            _ => {
                self.last_used = Some(current.clone());
                let Some(link) = current.link.as_deref() else {
                    tracing::error!(relation = %current.relation, "Relation without a link");
                    self.fail(ErrorKind::IllegalArgument);
                    return None;
                };
                match current.relation {
                    Relation::SystemInfo => self.send_system_info(link).await,
                    Relation::CommandResult => {
                        self.send_command_results(link, current.body.as_deref()).await
                    }
                    Relation::InitialPost => self.perform(Verb::Post, link, current.body.as_deref()).await,
                    Relation::InitialDelete => self.perform(Verb::Delete, link, None).await,
                    Relation::Next => self.perform(Verb::Get, link, None).await,
                    _ => None,
                }
            }
        }
    }

    async fn perform(&self, verb: Verb, link: &str, body: Option<&[u8]>) -> Option<Exchange> {
        match self.context.transport.perform(verb, link, body).await {
            Ok(next) => Some(next),
            Err(e) => {
                tracing::error!(%verb, link, "Request failed: {}", e);
                self.fail(e.kind());
                None
            }
        }
    }

    async fn send_system_info(&self, link: &str) -> Option<Exchange> {
        let mut gathering_error = None;

        let os = match self.context.device.os_info().await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("Failed to read device information: {}", e);
                gathering_error = Some(e.kind());
                OsInfo::default()
            }
        };
        let version = match self.context.content.get_version().await {
            Ok(version) => version,
            Err(e) => {
                tracing::warn!("Failed to read TEE version: {}", e);
                gathering_error = Some(e.kind());
                TeeVersion::default()
            }
        };

        let document = match build_system_info_document(&version, &os) {
            Ok(document) => document,
            Err(e) => {
                self.fail(e.kind());
                return None;
            }
        };

        let next = self.perform(Verb::Put, link, Some(&document)).await?;
        if let Some(kind) = gathering_error {
            self.fail(kind);
        }
        Some(next)
    }

    async fn send_command_results(&self, link: &str, body: Option<&[u8]>) -> Option<Exchange> {
        let handled = self.context.dispatcher.handle_document(body).await;

        let Some(document) = handled.response else {
            self.fail(handled.error.unwrap_or(ErrorKind::Internal));
            return None;
        };

        let next = self.perform(Verb::Post, link, Some(&document)).await?;
        match handled.error {
            Some(ErrorKind::RegistryObjectNotAvailable) | None => {}
            Some(kind) => self.fail(kind),
        }
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::TrustletPayload;
    use crate::device::StaticDeviceInfo;
    use crate::error::Error;
    use crate::registry::MemoryRegistry;
    use crate::tee::{BatchOutcome, CmpRequest};
    use crate::protocol::CommandResult;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const BASE: &str = "https://se/enrollment/";

    #[derive(Default)]
    struct ScriptedTransport {
        answers: Mutex<VecDeque<Result<Exchange>>>,
        sent: Mutex<Vec<(Verb, String, Option<Vec<u8>>)>>,
        open_fails: bool,
    }

    impl ScriptedTransport {
        fn answering(answers: Vec<Result<Exchange>>) -> Self {
            Self {
                answers: Mutex::new(answers.into()),
                ..Default::default()
            }
        }

        fn verbs(&self) -> Vec<Verb> {
            self.sent.lock().unwrap().iter().map(|(v, _, _)| *v).collect()
        }

        fn links(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(_, l, _)| l.clone()).collect()
        }

        fn body(&self, index: usize) -> String {
            let sent = self.sent.lock().unwrap();
            String::from_utf8(sent[index].2.clone().unwrap_or_default()).unwrap()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn open(&self) -> Result<()> {
            if self.open_fails {
                return Err(Error::Network("no route to host".to_string()));
            }
            Ok(())
        }

        async fn perform(&self, verb: Verb, link: &str, body: Option<&[u8]>) -> Result<Exchange> {
            self.sent
                .lock()
                .unwrap()
                .push((verb, link.to_string(), body.map(<[u8]>::to_vec)));
            self.answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Exchange::end()))
        }
    }

    #[derive(Default)]
    struct FakeContent {
        no_version: bool,
    }

    #[async_trait]
    impl ContentManager for FakeContent {
        async fn execute(&self, requests: &[CmpRequest]) -> Result<BatchOutcome> {
            Ok(BatchOutcome {
                results: requests
                    .iter()
                    .map(|r| CommandResult::success(r.id, r.ignore_error, vec![0x42]))
                    .collect(),
                internal_error: 0,
            })
        }

        async fn get_version(&self) -> Result<TeeVersion> {
            if self.no_version {
                return Err(Error::MobicoreConnection("device busy".to_string()));
            }
            Ok(TeeVersion {
                product_id: "tee-300".to_string(),
                cmp: 3,
                ..Default::default()
            })
        }
    }

    struct Harness {
        transport: Arc<ScriptedTransport>,
        states: Arc<Mutex<Vec<ProvisioningState>>>,
    }

    async fn run(
        kind: SessionKind,
        transport: ScriptedTransport,
        content: FakeContent,
        factory_reset: bool,
    ) -> Harness {
        let transport = Arc::new(transport);
        let content: Arc<dyn ContentManager> = Arc::new(content);
        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&states);
        let callback: StateCallback = Arc::new(move |s| sink.lock().unwrap().push(s));

        let dispatcher = Dispatcher::new(Arc::clone(&content), Arc::new(MemoryRegistry::new()))
            .with_callback(Arc::clone(&callback));
        let context = SessionContext {
            transport: transport.clone(),
            content,
            device: Arc::new(StaticDeviceInfo::default().with_factory_reset(factory_reset)),
            dispatcher: Arc::new(dispatcher),
            links: LinkBuilder::new(BASE),
            callback,
        };
        let request = SessionRequest {
            kind,
            spid: 5,
            suid: Suid([0xAA; 16]),
        };
        ProvisioningSession::new(request, context).run().await;
        Harness { transport, states }
    }

    impl Harness {
        fn states(&self) -> Vec<ProvisioningState> {
            self.states.lock().unwrap().clone()
        }
    }

    fn command_document() -> Vec<u8> {
        br#"<ContentManagementCommand xmlns="http://www.mcore.gi-de.com/2012/04/schema/EnrollmentService">
              <commands><command id="1" type="CMP"><commandValue>AQID</commandValue></command></commands>
            </ContentManagementCommand>"#
            .to_vec()
    }

    fn device_link() -> String {
        format!("{}{}", BASE, "aa".repeat(16))
    }

    #[tokio::test]
    async fn test_full_provisioning_flow() {
        let transport = ScriptedTransport::answering(vec![
            Ok(Exchange::new("https://se/si", Relation::SystemInfo, None)),
            Ok(Exchange::new(
                "https://se/cr",
                Relation::CommandResult,
                Some(command_document()),
            )),
            Ok(Exchange::end()),
        ]);
        let harness = run(SessionKind::Provision, transport, FakeContent::default(), false).await;

        assert_eq!(
            harness.states(),
            vec![ProvisioningState::Connecting, ProvisioningState::Finished]
        );
        let t = &harness.transport;
        assert_eq!(t.verbs(), vec![Verb::Post, Verb::Put, Verb::Post]);
        assert_eq!(
            t.links(),
            vec![format!("{}/5", device_link()), "https://se/si".to_string(), "https://se/cr".to_string()]
        );
        assert!(t.body(1).contains("productId=\"tee-300\""));
        assert!(t.body(2).contains("<resultValue>Qg==</resultValue>"));
    }

    #[tokio::test]
    async fn test_factory_reset_cleans_up_first() {
        let harness = run(
            SessionKind::Provision,
            ScriptedTransport::default(),
            FakeContent::default(),
            true,
        )
        .await;

        assert_eq!(harness.transport.verbs(), vec![Verb::Delete, Verb::Post]);
        assert_eq!(
            harness.transport.links(),
            vec![device_link(), format!("{}/5", device_link())]
        );
        assert_eq!(
            harness.states(),
            vec![ProvisioningState::Connecting, ProvisioningState::Finished]
        );
    }

    #[tokio::test]
    async fn test_parked_trustlet_request_survives_cleanup() {
        let request = TrustletInstallationRequest {
            uuid: uuid::Uuid::from_u128(3),
            payload: TrustletPayload::binary(vec![9, 9, 9]),
            min_version: 1,
            puk_hash: vec![0x10, 0x20],
        };
        let expected_body = build_trustlet_request_document(&request).unwrap();
        let harness = run(
            SessionKind::InstallTrustlet(request),
            ScriptedTransport::default(),
            FakeContent::default(),
            true,
        )
        .await;

        let sent = harness.transport.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], (Verb::Delete, device_link(), None));
        assert_eq!(
            sent[1],
            (
                Verb::Post,
                format!("{}/5/00000000-0000-0000-0000-000000000003", device_link()),
                Some(expected_body)
            )
        );
        assert_eq!(
            harness.states(),
            vec![ProvisioningState::Connecting, ProvisioningState::Finished]
        );
    }

    #[tokio::test]
    async fn test_consecutive_repeats_resend_identical_results() {
        let transport = ScriptedTransport::answering(vec![
            Ok(Exchange::new(
                "https://se/cr",
                Relation::CommandResult,
                Some(command_document()),
            )),
            Ok(Exchange::new("https://se/ignored", Relation::Repeat, None)),
            Ok(Exchange::new("https://se/ignored", Relation::Repeat, None)),
            Ok(Exchange::new("https://se/ignored", Relation::Repeat, None)),
            Ok(Exchange::end()),
        ]);
        let harness = run(SessionKind::Provision, transport, FakeContent::default(), false).await;

        let sent = harness.transport.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 5);
        let first = &sent[1];
        assert_eq!(first.0, Verb::Post);
        assert_eq!(first.1, "https://se/cr");
        assert!(first.2.is_some());
        for replay in &sent[2..] {
            assert_eq!(replay, first);
        }
        assert_eq!(
            harness.states(),
            vec![ProvisioningState::Connecting, ProvisioningState::Finished]
        );
    }

    #[tokio::test]
    async fn test_repeat_replays_last_request() {
        let transport = ScriptedTransport::answering(vec![
            Ok(Exchange::new("https://se/n", Relation::Next, None)),
            Ok(Exchange::new("https://se/ignored", Relation::Repeat, None)),
            Ok(Exchange::end()),
        ]);
        let harness = run(SessionKind::Provision, transport, FakeContent::default(), false).await;

        assert_eq!(harness.transport.verbs(), vec![Verb::Post, Verb::Get, Verb::Get]);
        assert_eq!(harness.transport.links()[2], "https://se/n");
        assert_eq!(harness.states().last(), Some(&ProvisioningState::Finished));
    }

    #[tokio::test]
    async fn test_unknown_relation_fails() {
        let transport = ScriptedTransport::answering(vec![Ok(Exchange::new(
            "https://se/x",
            Relation::Unknown("relation/reboot".to_string()),
            None,
        ))]);
        let harness = run(SessionKind::Provision, transport, FakeContent::default(), false).await;

        assert_eq!(
            harness.states(),
            vec![
                ProvisioningState::Connecting,
                ProvisioningState::Error(ErrorKind::IllegalArgument)
            ]
        );
        assert_eq!(harness.transport.verbs().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_open_failure() {
        let transport = ScriptedTransport {
            open_fails: true,
            ..Default::default()
        };
        let harness = run(SessionKind::Provision, transport, FakeContent::default(), false).await;

        assert_eq!(
            harness.states(),
            vec![
                ProvisioningState::Connecting,
                ProvisioningState::Error(ErrorKind::Network)
            ]
        );
        assert!(harness.transport.verbs().is_empty());
    }

    #[tokio::test]
    async fn test_server_error_stops_session() {
        let transport = ScriptedTransport::answering(vec![
            Ok(Exchange::new("https://se/si", Relation::SystemInfo, None)),
            Err(Error::SePreconditionNotMet("412".to_string())),
        ]);
        let harness = run(SessionKind::Provision, transport, FakeContent::default(), false).await;

        assert_eq!(
            harness.states(),
            vec![
                ProvisioningState::Connecting,
                ProvisioningState::Error(ErrorKind::SePreconditionNotMet)
            ]
        );
    }

    #[tokio::test]
    async fn test_system_info_gathering_failure_is_reported() {
        let transport = ScriptedTransport::answering(vec![
            Ok(Exchange::new("https://se/si", Relation::SystemInfo, None)),
            Ok(Exchange::end()),
        ]);
        let content = FakeContent { no_version: true };
        let harness = run(SessionKind::Provision, transport, content, false).await;

        assert_eq!(harness.transport.verbs(), vec![Verb::Post, Verb::Put]);
        assert_eq!(
            harness.states(),
            vec![
                ProvisioningState::Connecting,
                ProvisioningState::Error(ErrorKind::MobicoreConnection),
                ProvisioningState::Finished
            ]
        );
    }

    #[tokio::test]
    async fn test_command_result_without_document() {
        let transport = ScriptedTransport::answering(vec![Ok(Exchange::new(
            "https://se/cr",
            Relation::CommandResult,
            None,
        ))]);
        let harness = run(SessionKind::Provision, transport, FakeContent::default(), false).await;

        assert_eq!(harness.transport.verbs(), vec![Verb::Post]);
        assert_eq!(
            harness.states().last(),
            Some(&ProvisioningState::Error(ErrorKind::IllegalArgument))
        );
    }

    #[tokio::test]
    async fn test_unregister() {
        let harness = run(
            SessionKind::Unregister,
            ScriptedTransport::default(),
            FakeContent::default(),
            true,
        )
        .await;

        assert_eq!(harness.transport.verbs(), vec![Verb::Delete]);
        assert_eq!(harness.transport.links(), vec![device_link()]);
        assert_eq!(harness.states().last(), Some(&ProvisioningState::Finished));
    }

    #[tokio::test]
    async fn test_install_trustlet_posts_request() {
        let request = TrustletInstallationRequest {
            uuid: uuid::Uuid::from_u128(1),
            payload: TrustletPayload::binary(vec![1, 2, 3]),
            min_version: 2,
            puk_hash: vec![0xFF],
        };
        let harness = run(
            SessionKind::InstallTrustlet(request),
            ScriptedTransport::default(),
            FakeContent::default(),
            false,
        )
        .await;

        let t = &harness.transport;
        assert_eq!(t.verbs(), vec![Verb::Post]);
        assert_eq!(
            t.links()[0],
            format!("{}/5/00000000-0000-0000-0000-000000000001", device_link())
        );
        assert!(t.body(0).contains("trustletAxf"));
    }
}
