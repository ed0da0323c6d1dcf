//! Event-mesh subscription gateway.
//!
//! Takes a client's "subscribe these topics, push to this URL" request from
//! arrival to either an acknowledgement or a typed rejection.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                      SUBSCRIPTION GATEWAY                          │
//! ├───────────────────────────────────────────────────────────────────┤
//! │  transport ──► AsyncRequestContext ──► ResponseReceiver            │
//! │                      │                                            │
//! │  RequestValidator ── header / body checks (pure)                  │
//! │                      │                                            │
//! │  SecurityGate ────── ACL per topic → SSRF guard → handshake       │
//! │                      │                                            │
//! │  SubscriptionRegistry  (one lock: stage → swap → notify)          │
//! │                      │                                            │
//! │  NotificationDispatcher ──► ConsumerManager                       │
//! │                      │                                            │
//! │  ResponseAssembler ── exactly one response, metrics callback      │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Return codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | `SUCCESS` (0) | registered and propagated |
//! | `HEADER_ERROR` (19) | idc/pid/sys missing, pid not numeric or out of range |
//! | `BODY_ERROR` (20) | url/topics/consumerGroup invalid, or webhook target refused |
//! | `SUBSCRIBE_ERROR` (25) | registered, but the consumer manager failed |
//! | `ACL_ERROR` (38) | a topic was denied |
//!
//! # Usage
//!
//! ```ignore
//! use mesh_subscribe_gateway::{Collaborators, GatewayConfig, SubscriptionGateway};
//!
//! let gateway = SubscriptionGateway::new(GatewayConfig::from_env()?, collaborators)?;
//! let response = gateway.subscribe(request).await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod context;
pub mod dispatch;
pub mod domain;
pub mod metrics;
pub mod observability;
pub mod ports;
pub mod processor;
pub mod registry;
pub mod response;
pub mod security;
pub mod service;

// Re-exports for public API
pub use context::{AsyncRequestContext, CompletionError, CompletionReport, ResponseReceiver};
pub use dispatch::{BroadcastConsumerManager, NotificationDispatcher, TopologyEvent};
pub use domain::{
    ClientInfo, ConfigError, CorrelationId, GatewayConfig, GatewayError, HeartbeatRequest,
    MeshResponse, Outcome, PipelineStage, Rejection, RequestCode, RequestValidator, RetCode,
    SubscribeRequest, SubscribeRequestBody, SubscribeRequestHeader, SubscriptionItem,
    SubscriptionMode, SubscriptionType, UnsubscribeRequest, UnsubscribeRequestBody,
};
pub use metrics::{MetricsSnapshot, SubscribeMetrics};
pub use observability::{NoopTraceRecorder, TracingSpanRecorder};
pub use ports::{
    AclChecker, AclError, AgreementError, ConsumerManager, DeliveryAgreement, NotifyError,
    SpanHandle, SystemTimeSource, TimeSource, TraceRecorder, WebhookTarget,
};
pub use processor::{SubscribeProcessor, UnsubscribeProcessor};
pub use registry::{
    GroupChange, GroupSnapshot, InMemoryRegistryStore, RegistryStore, SubscriptionRegistry,
};
pub use response::ResponseAssembler;
pub use security::{HttpDeliveryAgreement, SecurityGate, StaticAclChecker, UrlGuard};
pub use service::{cleanup_task, Collaborators, SubscriptionGateway};
