//! Ports (hexagonal architecture) for the subscription gateway.

pub mod outbound;

pub use outbound::{
    AclChecker, AclError, AgreementError, ConsumerManager, DeliveryAgreement, NotifyError,
    SpanHandle, SystemTimeSource, TimeSource, TraceRecorder, WebhookTarget,
};
