//! Outbound ports for the subscription gateway.
//!
//! Everything the pipeline needs from the outside world: credentials,
//! webhook handshakes, the downstream delivery manager, tracing and time.

use crate::domain::correlation::CorrelationId;
use crate::domain::types::RequestCode;
use crate::registry::GroupSnapshot;
use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;
use url::Url;

/// Time source trait for testability
pub trait TimeSource: Send + Sync {
    /// Unix seconds
    fn now(&self) -> u64;
}

/// System time implementation
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// ACL failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AclError {
    /// Caller may not use this topic; the reason is returned to the client
    #[error("{reason}")]
    PermissionDenied { reason: String },
    /// Credential backend could not answer
    #[error("acl backend unavailable: {0}")]
    Unavailable(String),
}

impl AclError {
    pub fn denied(reason: impl Into<String>) -> Self {
        AclError::PermissionDenied {
            reason: reason.into(),
        }
    }
}

/// Per-topic authorization
pub trait AclChecker: Send + Sync {
    fn check_permission(
        &self,
        remote_addr: SocketAddr,
        username: &str,
        passwd: &str,
        sys: &str,
        topic: &str,
        request_code: RequestCode,
    ) -> Result<(), AclError>;
}

/// Delivery-agreement handshake failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgreementError {
    /// Connection, TLS or protocol failure
    #[error("handshake transport error: {0}")]
    Transport(String),
    /// Target did not answer in time
    #[error("handshake timed out")]
    Timeout,
}

/// A webhook URL and the socket addresses vetted for its host.
///
/// `addrs` is empty when the host name was left unresolved; the handshake
/// then resolves it on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookTarget {
    pub url: Url,
    pub addrs: Vec<SocketAddr>,
}

impl WebhookTarget {
    pub fn new(url: Url, addrs: Vec<SocketAddr>) -> Self {
        Self { url, addrs }
    }

    pub fn unresolved(url: Url) -> Self {
        Self::new(url, Vec::new())
    }
}

/// Out-of-band handshake proving the target agreed to receive pushes
#[async_trait]
pub trait DeliveryAgreement: Send + Sync {
    /// `Ok(true)` only when the target acknowledged `origin`. Connections
    /// must go to `target.addrs` when it is non-empty.
    async fn obtain_delivery_agreement(
        &self,
        target: &WebhookTarget,
        origin: &str,
    ) -> Result<bool, AgreementError>;
}

/// Consumer-manager notification failure
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Manager is not accepting updates
    #[error("consumer manager unavailable: {0}")]
    Unavailable(String),
    /// Manager refused the new topology
    #[error("topology update for group {group} rejected")]
    Rejected {
        group: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Downstream delivery manager.
///
/// Called while the registry lock is held, so implementations must not
/// block or call back into the registry.
pub trait ConsumerManager: Send + Sync {
    fn notify_topology_change(
        &self,
        group: &str,
        snapshot: &GroupSnapshot,
    ) -> Result<(), NotifyError>;

    /// The group lost its last member
    fn notify_group_removed(&self, group: &str) -> Result<(), NotifyError> {
        let _ = group;
        Ok(())
    }
}

/// Opaque handle to a started span
#[derive(Debug, Clone)]
pub struct SpanHandle {
    id: u64,
    name: &'static str,
    span: tracing::Span,
}

impl SpanHandle {
    pub fn new(id: u64, name: &'static str, span: tracing::Span) -> Self {
        Self { id, name, span }
    }

    /// Handle that records nothing
    pub fn disabled(name: &'static str) -> Self {
        Self::new(0, name, tracing::Span::none())
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}

/// Observability plugin: start/end/error spans with attributes
pub trait TraceRecorder: Send + Sync {
    fn start(&self, name: &'static str, correlation_id: CorrelationId) -> SpanHandle;

    fn start_child(&self, parent: &SpanHandle, name: &'static str) -> SpanHandle;

    fn record_attribute(&self, handle: &SpanHandle, key: &'static str, value: &dyn fmt::Display);

    fn end(&self, handle: SpanHandle);

    fn end_with_error(&self, handle: SpanHandle, error: &dyn fmt::Display);
}
