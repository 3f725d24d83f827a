//! End-to-end provisioning sessions through the public agent API

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use trustprov::codec::parse_result_document;
use trustprov::config::ProvisionerConfig;
use trustprov::protocol::{CommandResult, Exchange, Relation};
use trustprov::registry::MemoryRegistry;
use trustprov::tee::{BatchOutcome, CmpRequest, ContentManager};
use trustprov::transport::{Transport, Verb};
use trustprov::{ErrorKind, ProvisioningAgent, ProvisioningState, Result, StateCallback};

const SUID_HEX: &str = "0102030405060708090a0b0c0d0e0f10";

#[derive(Default)]
struct ScriptedServer {
    answers: Mutex<VecDeque<Exchange>>,
    requests: Mutex<Vec<(Verb, String, Option<Vec<u8>>)>>,
    gate: Option<Arc<Notify>>,
}

impl ScriptedServer {
    fn new(answers: Vec<Exchange>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            ..Default::default()
        }
    }

    fn requests(&self) -> Vec<(Verb, String, Option<Vec<u8>>)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedServer {
    async fn perform(&self, verb: Verb, link: &str, body: Option<&[u8]>) -> Result<Exchange> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.requests
            .lock()
            .unwrap()
            .push((verb, link.to_string(), body.map(<[u8]>::to_vec)));
        Ok(self
            .answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(Exchange::end))
    }
}

/// Answers each protocol command with its id, failing the ids in `fail`.
#[derive(Default)]
struct FakeSecureSide {
    fail: Vec<u32>,
    executed: Mutex<Vec<u32>>,
}

#[async_trait]
impl ContentManager for FakeSecureSide {
    async fn execute(&self, requests: &[CmpRequest]) -> Result<BatchOutcome> {
        let mut results = Vec::new();
        for request in requests {
            self.executed.lock().unwrap().push(request.id);
            if self.fail.contains(&request.id) {
                results.push(CommandResult::failure(
                    request.id,
                    request.ignore_error,
                    ErrorKind::CommandExecution,
                    7,
                ));
                if !request.ignore_error {
                    break;
                }
            } else {
                results.push(CommandResult::success(
                    request.id,
                    request.ignore_error,
                    vec![request.id as u8],
                ));
            }
        }
        Ok(BatchOutcome {
            results,
            internal_error: 0,
        })
    }
}

fn recorder() -> (StateCallback, Arc<Mutex<Vec<ProvisioningState>>>) {
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    (Arc::new(move |s| sink.lock().unwrap().push(s)), states)
}

fn agent(
    server: Arc<ScriptedServer>,
    secure: Arc<FakeSecureSide>,
    registry: Arc<MemoryRegistry>,
) -> ProvisioningAgent {
    let mut config = ProvisionerConfig::default();
    config.server.base_url = "https://se.example.com/enrollment/".to_string();
    config.device.suid = Some(SUID_HEX.to_string());
    ProvisioningAgent::builder()
        .config(config)
        .transport(server)
        .content_manager(secure)
        .registry(registry)
        .build()
        .unwrap()
}

fn command_document(commands: &str) -> Vec<u8> {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
        <ContentManagementCommand xmlns="http://www.mcore.gi-de.com/2012/04/schema/EnrollmentService">
          <commands>{}</commands>
        </ContentManagementCommand>"#,
        commands
    )
    .into_bytes()
}

#[tokio::test]
async fn test_full_provisioning_session() {
    let commands = command_document(
        r#"<command id="1" type="CMP"><commandValue>AQ==</commandValue></command>
           <command id="2" type="SO_UPLOAD"><commandValue>BAU=</commandValue></command>
           <command id="3" type="TLT_UPLOAD"><commandValue>Bg==</commandValue></command>"#,
    );
    let server = Arc::new(ScriptedServer::new(vec![
        Exchange::new("https://se.example.com/si", Relation::SystemInfo, None),
        Exchange::new("https://se.example.com/cr", Relation::CommandResult, Some(commands)),
        Exchange::end(),
    ]));
    let registry = Arc::new(MemoryRegistry::new());
    let agent = agent(server.clone(), Arc::new(FakeSecureSide::default()), registry.clone());

    let (callback, states) = recorder();
    agent.provision(9, callback).await.unwrap().await.unwrap();

    assert_eq!(
        *states.lock().unwrap(),
        vec![
            ProvisioningState::Connecting,
            ProvisioningState::InstallingTrustlet(vec![6]),
            ProvisioningState::Finished,
            ProvisioningState::ThreadExiting,
        ]
    );

    let requests = server.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].0, Verb::Post);
    assert_eq!(
        requests[0].1,
        format!("https://se.example.com/enrollment/{}/9", SUID_HEX)
    );
    assert_eq!(requests[1].0, Verb::Put);
    assert_eq!(requests[2].0, Verb::Post);

    let results = parse_result_document(requests[2].2.as_deref().unwrap()).unwrap();
    let ids: Vec<u32> = results.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(results[0].outcome, Ok(vec![1]));
    assert_eq!(registry.stored_objects().await, vec![vec![4, 5]]);
}

#[tokio::test]
async fn test_failed_command_stops_batch() {
    let commands = command_document(
        r#"<command id="1" type="CMP"><commandValue>AQ==</commandValue></command>
           <command id="2" type="SO_UPLOAD" ignoreError="true"><commandValue>BAU=</commandValue></command>"#,
    );
    let server = Arc::new(ScriptedServer::new(vec![Exchange::new(
        "https://se.example.com/cr",
        Relation::CommandResult,
        Some(commands),
    )]));
    let secure = Arc::new(FakeSecureSide {
        fail: vec![1],
        ..Default::default()
    });
    let registry = Arc::new(MemoryRegistry::new());
    let agent = agent(server.clone(), secure, registry.clone());

    let (callback, states) = recorder();
    agent.provision(0, callback).await.unwrap().await.unwrap();

    let requests = server.requests();
    let posted = String::from_utf8(requests[1].2.clone().unwrap()).unwrap();
    assert_eq!(posted.matches("<commandResult ").count(), 1);
    assert!(posted.contains(r#"errorCode="INTERNAL_ERROR""#));
    assert!(posted.contains(r#"errorDetail="7""#));
    assert!(registry.stored_objects().await.is_empty());
    assert_eq!(
        states.lock().unwrap().last(),
        Some(&ProvisioningState::ThreadExiting)
    );
}

#[tokio::test]
async fn test_concurrent_session_is_refused() {
    let gate = Arc::new(Notify::new());
    let server = Arc::new(ScriptedServer {
        gate: Some(gate.clone()),
        ..Default::default()
    });
    let agent = agent(
        server,
        Arc::new(FakeSecureSide::default()),
        Arc::new(MemoryRegistry::new()),
    );

    let (callback, _) = recorder();
    let running = agent.provision(0, callback).await.unwrap();

    let (callback, states) = recorder();
    let err = agent.unregister_root_container(callback).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lock);
    assert!(states.lock().unwrap().is_empty());

    let requests = [CmpRequest {
        id: 1,
        ignore_error: false,
        payload: vec![1],
    }];
    let err = agent.execute_cmp_commands(&requests);
    assert_eq!(err.await.unwrap_err().kind(), ErrorKind::Lock);

    gate.notify_one();
    running.await.unwrap();

    let outcome = agent
        .execute_cmp_commands(&[CmpRequest {
            id: 4,
            ignore_error: false,
            payload: vec![4],
        }])
        .await
        .unwrap();
    assert_eq!(outcome.results[0].outcome, Ok(vec![4]));
}

#[tokio::test]
async fn test_unregister_session() {
    let server = Arc::new(ScriptedServer::default());
    let agent = agent(
        server.clone(),
        Arc::new(FakeSecureSide::default()),
        Arc::new(MemoryRegistry::new()),
    );

    let (callback, states) = recorder();
    agent
        .unregister_root_container(callback)
        .await
        .unwrap()
        .await
        .unwrap();

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0, Verb::Delete);
    assert_eq!(
        requests[0].1,
        format!("https://se.example.com/enrollment/{}", SUID_HEX)
    );
    assert_eq!(
        *states.lock().unwrap(),
        vec![
            ProvisioningState::Connecting,
            ProvisioningState::Finished,
            ProvisioningState::ThreadExiting,
        ]
    );
}

#[tokio::test]
async fn test_changed_address_applies_to_next_session() {
    let server = Arc::new(ScriptedServer::default());
    let agent = agent(
        server.clone(),
        Arc::new(FakeSecureSide::default()),
        Arc::new(MemoryRegistry::new()),
    );
    agent
        .set_se_address("https://staging.example.com/enroll/")
        .await
        .unwrap();

    let (callback, _) = recorder();
    agent.provision(0, callback).await.unwrap().await.unwrap();

    assert_eq!(
        server.requests()[0].1,
        format!("https://staging.example.com/enroll/{}", SUID_HEX)
    );
}
