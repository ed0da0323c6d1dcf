//! Trace recorders.
//!
//! [`TracingSpanRecorder`] maps the start/end/error contract onto `tracing`
//! spans with the OpenTelemetry field conventions (`otel.kind`,
//! `otel.status_code`), so any subscriber with an OTel layer exports them.
//! [`NoopTraceRecorder`] is used when tracing is switched off.

use crate::domain::correlation::CorrelationId;
use crate::ports::{SpanHandle, TraceRecorder};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, field, info_span, warn};

/// Records through `tracing` spans
#[derive(Debug, Default)]
pub struct TracingSpanRecorder {
    next_id: AtomicU64,
}

impl TracingSpanRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl TraceRecorder for TracingSpanRecorder {
    fn start(&self, name: &'static str, correlation_id: CorrelationId) -> SpanHandle {
        let span = info_span!(
            "mesh_request",
            request = name,
            correlation_id = %correlation_id,
            otel.kind = "server",
            otel.status_code = field::Empty,
            remote_addr = field::Empty,
            consumer_group = field::Empty,
            topic_count = field::Empty,
            url = field::Empty,
            ret_code = field::Empty,
            error = field::Empty,
        );
        SpanHandle::new(self.next_id(), name, span)
    }

    fn start_child(&self, parent: &SpanHandle, name: &'static str) -> SpanHandle {
        let span = info_span!(
            parent: parent.span(),
            "mesh_stage",
            stage = name,
            otel.kind = "client",
            otel.status_code = field::Empty,
            url = field::Empty,
            error = field::Empty,
        );
        SpanHandle::new(self.next_id(), name, span)
    }

    fn record_attribute(&self, handle: &SpanHandle, key: &'static str, value: &dyn fmt::Display) {
        let span = handle.span();
        if span.has_field(key) {
            span.record(key, field::display(value));
        } else {
            debug!(parent: span, key, value = %value, "Span attribute");
        }
    }

    fn end(&self, handle: SpanHandle) {
        handle.span().record("otel.status_code", "OK");
    }

    fn end_with_error(&self, handle: SpanHandle, error: &dyn fmt::Display) {
        let span = handle.span();
        span.record("otel.status_code", "ERROR");
        span.record("error", field::display(error));
        warn!(parent: span, span_name = handle.name(), error = %error, "Span ended with error");
    }
}

/// Records nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTraceRecorder;

impl TraceRecorder for NoopTraceRecorder {
    fn start(&self, name: &'static str, _correlation_id: CorrelationId) -> SpanHandle {
        SpanHandle::disabled(name)
    }

    fn start_child(&self, _parent: &SpanHandle, name: &'static str) -> SpanHandle {
        SpanHandle::disabled(name)
    }

    fn record_attribute(&self, _handle: &SpanHandle, _key: &'static str, _value: &dyn fmt::Display) {}

    fn end(&self, _handle: SpanHandle) {}

    fn end_with_error(&self, _handle: SpanHandle, _error: &dyn fmt::Display) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let recorder = TracingSpanRecorder::new();
        let parent = recorder.start("subscribe", CorrelationId::new());
        let child = recorder.start_child(&parent, "webhook_handshake");
        assert_ne!(parent.id(), child.id());
        assert_eq!(child.name(), "webhook_handshake");
        recorder.record_attribute(&parent, "consumer_group", &"g1");
        recorder.record_attribute(&parent, "not_declared", &42);
        recorder.end_with_error(child, &"refused");
        recorder.end(parent);
    }

    #[test]
    fn test_noop_handles_are_disabled() {
        let handle = NoopTraceRecorder.start("subscribe", CorrelationId::new());
        assert_eq!(handle.id(), 0);
        assert!(handle.span().is_none());
    }
}
