//! Security gate: per-topic ACL, then webhook target validation.
//!
//! Both checks run before the registry is touched. The URL check (DNS
//! resolution plus the delivery-agreement handshake) performs network I/O
//! and is bounded by the configured handshake timeout; it never runs while
//! a registry lock is held.

pub mod acl;
pub mod agreement;
pub mod url_guard;

pub use acl::{constant_time_compare, AclRule, StaticAclChecker};
pub use agreement::HttpDeliveryAgreement;
pub use url_guard::{UrlGuard, UrlRejection};

use crate::domain::outcome::{Outcome, Rejection};
use crate::domain::types::{RequestCode, SubscribeRequestHeader};
use crate::ports::{AclChecker, DeliveryAgreement, SpanHandle, TraceRecorder, WebhookTarget};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Reason returned for every refused webhook target
pub const INVALID_URL_MESSAGE: &str = "invalid or unauthorized URL";

/// ACL plus SSRF guard plus delivery agreement
pub struct SecurityGate {
    acl_enabled: bool,
    acl: Arc<dyn AclChecker>,
    guard: UrlGuard,
    agreement: Arc<dyn DeliveryAgreement>,
    origin: String,
    handshake_timeout: Duration,
    tracer: Arc<dyn TraceRecorder>,
}

impl SecurityGate {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        acl_enabled: bool,
        acl: Arc<dyn AclChecker>,
        guard: UrlGuard,
        agreement: Arc<dyn DeliveryAgreement>,
        origin: impl Into<String>,
        handshake_timeout: Duration,
        tracer: Arc<dyn TraceRecorder>,
    ) -> Self {
        Self {
            acl_enabled,
            acl,
            guard,
            agreement,
            origin: origin.into(),
            handshake_timeout,
            tracer,
        }
    }

    pub fn acl_enabled(&self) -> bool {
        self.acl_enabled
    }

    /// Check every topic; the first denial aborts the request.
    pub fn authorize<'a>(
        &self,
        remote_addr: SocketAddr,
        header: &SubscribeRequestHeader,
        topics: impl IntoIterator<Item = &'a str>,
        request_code: RequestCode,
    ) -> Outcome<()> {
        if !self.acl_enabled {
            return Outcome::Accepted(());
        }
        for topic in topics {
            if let Err(e) = self.acl.check_permission(
                remote_addr,
                &header.username,
                &header.passwd,
                &header.sys,
                topic,
                request_code,
            ) {
                warn!(
                    remote_addr = %remote_addr,
                    username = %header.username,
                    sys = %header.sys,
                    topic,
                    error = %e,
                    "ACL denied"
                );
                return Outcome::Rejected(Rejection::acl(e.to_string()));
            }
        }
        Outcome::Accepted(())
    }

    /// Validate the push URL and obtain the target's agreement.
    ///
    /// Malformed, denylisted, refused, failed and timed-out handshakes all
    /// produce the same `BODY_ERROR`.
    pub async fn check_webhook(
        &self,
        raw_url: &str,
        parent: &SpanHandle,
    ) -> Outcome<WebhookTarget> {
        let span = self.tracer.start_child(parent, "webhook_handshake");
        self.tracer.record_attribute(&span, "url", &raw_url);

        let checked = tokio::time::timeout(self.handshake_timeout, self.verify(raw_url)).await;
        let failure = match checked {
            Ok(Ok(target)) => {
                self.tracer.end(span);
                return Outcome::Accepted(target);
            }
            Ok(Err(reason)) => reason,
            Err(_) => format!("timed out after {:?}", self.handshake_timeout),
        };

        warn!(url = %raw_url, reason = %failure, "Webhook target refused");
        self.tracer.end_with_error(span, &failure);
        Outcome::Rejected(Rejection::body(INVALID_URL_MESSAGE))
    }

    async fn verify(&self, raw_url: &str) -> Result<WebhookTarget, String> {
        let target = self.guard.check(raw_url).await.map_err(|e| e.to_string())?;
        match self
            .agreement
            .obtain_delivery_agreement(&target, &self.origin)
            .await
        {
            Ok(true) => Ok(target),
            Ok(false) => Err("target refused delivery agreement".to_string()),
            Err(e) => Err(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::{SecurityConfig, WebhookConfig};
    use crate::domain::correlation::CorrelationId;
    use crate::domain::error::RetCode;
    use crate::observability::NoopTraceRecorder;
    use crate::ports::AgreementError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        answer: Result<bool, AgreementError>,
        delay: Duration,
        calls: AtomicUsize,
        targets: Mutex<Vec<WebhookTarget>>,
    }

    impl Scripted {
        fn new(answer: Result<bool, AgreementError>) -> Arc<Self> {
            Self::delayed(answer, Duration::ZERO)
        }

        fn delayed(answer: Result<bool, AgreementError>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                answer,
                delay,
                calls: AtomicUsize::new(0),
                targets: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl DeliveryAgreement for Scripted {
        async fn obtain_delivery_agreement(
            &self,
            target: &WebhookTarget,
            _origin: &str,
        ) -> Result<bool, AgreementError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.targets.lock().push(target.clone());
            tokio::time::sleep(self.delay).await;
            self.answer.clone()
        }
    }

    fn gate(acl_enabled: bool, agreement: Arc<dyn DeliveryAgreement>) -> SecurityGate {
        let acl = StaticAclChecker::default().with_rule(AclRule::new("alice", "pw", ["topicA"]));
        SecurityGate::new(
            acl_enabled,
            Arc::new(acl),
            UrlGuard::from_config(&SecurityConfig::default(), &WebhookConfig::default()).unwrap(),
            agreement,
            "eventmesh.idc1",
            Duration::from_millis(200),
            Arc::new(NoopTraceRecorder),
        )
    }

    fn header(username: &str) -> SubscribeRequestHeader {
        SubscribeRequestHeader {
            username: username.into(),
            passwd: "pw".into(),
            sys: "sys1".into(),
            ..Default::default()
        }
    }

    fn span() -> SpanHandle {
        NoopTraceRecorder.start("test", CorrelationId::new())
    }

    fn addr() -> SocketAddr {
        "10.1.1.1:5000".parse().unwrap()
    }

    #[test]
    fn test_acl_disabled_skips_checks() {
        let gate = gate(false, Scripted::new(Ok(true)));
        let outcome = gate.authorize(addr(), &header("nobody"), ["topicZ"], RequestCode::Subscribe);
        assert!(outcome.is_accepted());
    }

    #[test]
    fn test_first_denial_aborts() {
        let gate = gate(true, Scripted::new(Ok(true)));
        let outcome = gate.authorize(
            addr(),
            &header("alice"),
            ["topicA", "topicB"],
            RequestCode::Subscribe,
        );
        assert_eq!(outcome.code(), RetCode::AclError);
        let rejection = outcome.into_result().unwrap_err();
        assert!(rejection.message.contains("topicB"));
    }

    #[tokio::test]
    async fn test_webhook_accepted() {
        let agreement = Scripted::new(Ok(true));
        let gate = gate(false, agreement.clone());
        let outcome = gate.check_webhook("http://10.0.0.5/hook", &span()).await;
        assert!(outcome.is_accepted());
        assert_eq!(agreement.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handshake_receives_vetted_addrs() {
        let agreement = Scripted::new(Ok(true));
        let gate = gate(false, agreement.clone());
        let target = gate
            .check_webhook("http://10.0.0.5:8080/hook", &span())
            .await
            .into_result()
            .unwrap();

        let expected: SocketAddr = "10.0.0.5:8080".parse().unwrap();
        assert_eq!(target.addrs, vec![expected]);
        assert_eq!(agreement.targets.lock().as_slice(), &[target]);
    }

    #[tokio::test]
    async fn test_denylisted_target_skips_handshake() {
        let agreement = Scripted::new(Ok(true));
        let gate = gate(false, agreement.clone());
        let outcome = gate.check_webhook("http://127.0.0.1/hook", &span()).await;
        let rejection = outcome.into_result().unwrap_err();
        assert_eq!(rejection.code, RetCode::BodyError);
        assert!(rejection.message.ends_with(INVALID_URL_MESSAGE));
        assert_eq!(agreement.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refusal_and_transport_error_are_body_errors() {
        for answer in [Ok(false), Err(AgreementError::Transport("reset".into()))] {
            let gate = gate(false, Scripted::new(answer));
            let outcome = gate.check_webhook("http://10.0.0.5/hook", &span()).await;
            assert_eq!(outcome.code(), RetCode::BodyError);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handshake_times_out() {
        let agreement = Scripted::delayed(Ok(true), Duration::from_secs(10));
        let gate = gate(false, agreement);
        let outcome = gate.check_webhook("http://10.0.0.5/hook", &span()).await;
        assert_eq!(outcome.code(), RetCode::BodyError);
    }
}
