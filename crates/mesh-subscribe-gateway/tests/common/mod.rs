//! Shared fakes and builders for the gateway integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use mesh_subscribe_gateway::registry::GroupSnapshot;
use mesh_subscribe_gateway::security::AclRule;
use mesh_subscribe_gateway::{
    AgreementError, Collaborators, ConsumerManager, CorrelationId, DeliveryAgreement,
    GatewayConfig, HeartbeatRequest, NotifyError, SpanHandle, StaticAclChecker, SubscribeRequest,
    SubscribeRequestBody, SubscribeRequestHeader, SubscriptionGateway, SubscriptionItem,
    SubscriptionMode, TimeSource, TraceRecorder, UnsubscribeRequest, UnsubscribeRequestBody,
    WebhookTarget,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

pub const REMOTE: &str = "10.1.1.1:5000";
pub const WEBHOOK: &str = "http://10.20.0.5:8080/hook";

/// Agreement that answers from a fixed script and counts calls
pub struct ScriptedAgreement {
    answer: Result<bool, AgreementError>,
    pub calls: AtomicUsize,
}

impl ScriptedAgreement {
    pub fn accepting() -> Arc<Self> {
        Self::answering(Ok(true))
    }

    pub fn answering(answer: Result<bool, AgreementError>) -> Arc<Self> {
        Arc::new(Self {
            answer,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliveryAgreement for ScriptedAgreement {
    async fn obtain_delivery_agreement(
        &self,
        _target: &WebhookTarget,
        _origin: &str,
    ) -> Result<bool, AgreementError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.answer.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Changed(GroupSnapshot),
    Removed(String),
}

/// Consumer manager that records every notification and can be told to fail
#[derive(Default)]
pub struct RecordingConsumerManager {
    pub notifications: Mutex<Vec<Notification>>,
    failing: AtomicBool,
}

impl RecordingConsumerManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_with_rejection(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.notifications.lock().len()
    }

    pub fn last(&self) -> Option<Notification> {
        self.notifications.lock().last().cloned()
    }
}

impl ConsumerManager for RecordingConsumerManager {
    fn notify_topology_change(
        &self,
        group: &str,
        snapshot: &GroupSnapshot,
    ) -> Result<(), NotifyError> {
        self.notifications
            .lock()
            .push(Notification::Changed(snapshot.clone()));
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Rejected {
                group: group.to_string(),
                source: "push engine offline".into(),
            });
        }
        Ok(())
    }

    fn notify_group_removed(&self, group: &str) -> Result<(), NotifyError> {
        self.notifications
            .lock()
            .push(Notification::Removed(group.to_string()));
        Ok(())
    }
}

/// Trace recorder that counts span starts and ends
#[derive(Default)]
pub struct RecordingTracer {
    next_id: AtomicU64,
    pub started: Mutex<Vec<(u64, &'static str)>>,
    pub ended: Mutex<Vec<(u64, Option<String>)>>,
}

impl RecordingTracer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn open(&self, name: &'static str) -> SpanHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.started.lock().push((id, name));
        SpanHandle::new(id, name, tracing::Span::none())
    }

    pub fn errors(&self) -> Vec<String> {
        self.ended
            .lock()
            .iter()
            .filter_map(|(_, error)| error.clone())
            .collect()
    }

    /// Every started span was ended exactly once
    pub fn balanced(&self) -> bool {
        let mut started: Vec<u64> = self.started.lock().iter().map(|(id, _)| *id).collect();
        let mut ended: Vec<u64> = self.ended.lock().iter().map(|(id, _)| *id).collect();
        started.sort_unstable();
        ended.sort_unstable();
        started == ended
    }
}

impl TraceRecorder for RecordingTracer {
    fn start(&self, name: &'static str, _correlation_id: CorrelationId) -> SpanHandle {
        self.open(name)
    }

    fn start_child(&self, _parent: &SpanHandle, name: &'static str) -> SpanHandle {
        self.open(name)
    }

    fn record_attribute(&self, _handle: &SpanHandle, _key: &'static str, _value: &dyn fmt::Display) {}

    fn end(&self, handle: SpanHandle) {
        self.ended.lock().push((handle.id(), None));
    }

    fn end_with_error(&self, handle: SpanHandle, error: &dyn fmt::Display) {
        self.ended.lock().push((handle.id(), Some(error.to_string())));
    }
}

/// Clock the tests move by hand
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn at(secs: u64) -> Arc<Self> {
        Arc::new(Self(AtomicU64::new(secs)))
    }

    pub fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Gateway plus handles on its fakes
pub struct Harness {
    pub gateway: SubscriptionGateway,
    pub agreement: Arc<ScriptedAgreement>,
    pub manager: Arc<RecordingConsumerManager>,
    pub tracer: Arc<RecordingTracer>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: GatewayConfig) -> Self {
        Self::build(config, ScriptedAgreement::accepting())
    }

    pub fn build(config: GatewayConfig, agreement: Arc<ScriptedAgreement>) -> Self {
        let manager = RecordingConsumerManager::new();
        let tracer = RecordingTracer::new();
        let clock = ManualClock::at(1_000);
        let acl = StaticAclChecker::default()
            .with_rule(AclRule::new("alice", "secret", ["topic*"]))
            .with_rule(AclRule::new("bob", "secret", ["t1", "t2"]));

        let collaborators = Collaborators::new(Arc::new(acl), agreement.clone(), manager.clone())
            .with_tracer(tracer.clone())
            .with_time(clock.clone());
        let gateway = SubscriptionGateway::new(config, collaborators).unwrap();

        Self {
            gateway,
            agreement,
            manager,
            tracer,
            clock,
        }
    }
}

pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.mesh.cluster = "cluster-a".into();
    config.mesh.env = "PRD".into();
    config.mesh.idc = "idc1".into();
    config.mesh.local_ip = "10.9.9.9".parse().unwrap();
    config.mesh.webhook_origin = "eventmesh.idc1".into();
    config
}

pub fn header(pid: u64) -> SubscribeRequestHeader {
    SubscribeRequestHeader {
        env: "PRD".into(),
        idc: "idc1".into(),
        sys: "sys1".into(),
        pid: pid.to_string(),
        ip: "10.1.1.1".into(),
        username: "alice".into(),
        passwd: "secret".into(),
    }
}

pub fn items(topics: &[&str]) -> Vec<SubscriptionItem> {
    topics
        .iter()
        .map(|topic| SubscriptionItem::new(*topic, SubscriptionMode::Clustering))
        .collect()
}

pub fn subscribe_request(pid: u64, group: &str, topics: &[&str]) -> SubscribeRequest {
    SubscribeRequest {
        remote_addr: REMOTE.parse().unwrap(),
        header: header(pid),
        body: SubscribeRequestBody {
            url: WEBHOOK.into(),
            consumer_group: group.into(),
            topics: items(topics),
        },
    }
}

pub fn unsubscribe_request(pid: u64, group: &str, topics: &[&str]) -> UnsubscribeRequest {
    UnsubscribeRequest {
        remote_addr: REMOTE.parse().unwrap(),
        header: header(pid),
        body: UnsubscribeRequestBody {
            url: WEBHOOK.into(),
            consumer_group: group.into(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
        },
    }
}

pub fn heartbeat_request(pid: u64) -> HeartbeatRequest {
    HeartbeatRequest {
        remote_addr: REMOTE.parse().unwrap(),
        header: header(pid),
    }
}
