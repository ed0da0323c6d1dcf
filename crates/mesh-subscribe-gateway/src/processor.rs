//! Subscribe and unsubscribe pipelines.
//!
//! ```text
//! context → validate header/body → ACL per topic → URL guard + handshake
//!         → registry commit (+ notify under the same lock) → response
//! ```
//!
//! Every stage returns `Result<_, Rejection>`; the first rejection skips
//! straight to the response assembler. Header, body and ACL failures are
//! decided before the registry is touched. A notification failure happens
//! after the commit and is reported without rolling it back.

use crate::context::{AsyncRequestContext, CompletionError, CompletionReport};
use crate::dispatch::NotificationDispatcher;
use crate::domain::lifecycle::{PipelineStage, RequestLifecycle};
use crate::domain::outcome::Rejection;
use crate::domain::types::{
    ClientInfo, MeshResponse, RequestCode, SubscribeRequest, UnsubscribeRequest,
};
use crate::domain::validation::RequestValidator;
use crate::metrics::SubscribeMetrics;
use crate::ports::{SpanHandle, TraceRecorder};
use crate::registry::{GroupChange, SubscriptionRegistry};
use crate::response::ResponseAssembler;
use crate::security::SecurityGate;
use std::sync::Arc;
use tracing::{debug, info, Instrument};

pub type SubscribeContext = AsyncRequestContext<SubscribeRequest, MeshResponse>;
pub type UnsubscribeContext = AsyncRequestContext<UnsubscribeRequest, MeshResponse>;

/// Components shared by both pipelines
#[derive(Clone)]
pub struct PipelineParts {
    pub validator: RequestValidator,
    pub registry: Arc<SubscriptionRegistry>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub assembler: Arc<ResponseAssembler>,
    pub tracer: Arc<dyn TraceRecorder>,
    pub metrics: Arc<SubscribeMetrics>,
}

/// Runs the subscribe pipeline for one request
pub struct SubscribeProcessor {
    parts: PipelineParts,
    gate: Arc<SecurityGate>,
}

impl SubscribeProcessor {
    pub fn new(parts: PipelineParts, gate: Arc<SecurityGate>) -> Self {
        Self { parts, gate }
    }

    /// Process the request and complete its context exactly once
    pub async fn process(
        &self,
        ctx: SubscribeContext,
    ) -> Result<CompletionReport, CompletionError> {
        let parts = &self.parts;
        parts.metrics.record_request(true);
        let span = parts.tracer.start("subscribe", ctx.correlation_id());
        let mut lifecycle = RequestLifecycle::new();

        let result = self
            .run(ctx.request(), &span, &mut lifecycle)
            .instrument(span.span().clone())
            .await;

        parts
            .assembler
            .finish(ctx, RequestCode::Subscribe, result, span, &mut lifecycle)
    }

    async fn run(
        &self,
        request: &SubscribeRequest,
        span: &SpanHandle,
        lifecycle: &mut RequestLifecycle,
    ) -> Result<GroupChange, Rejection> {
        let parts = &self.parts;
        let SubscribeRequest {
            remote_addr,
            header,
            body,
        } = request;
        parts.tracer.record_attribute(span, "remote_addr", remote_addr);
        parts
            .tracer
            .record_attribute(span, "consumer_group", &body.consumer_group);
        parts
            .tracer
            .record_attribute(span, "topic_count", &body.topics.len());

        parts.validator.validate_header(header).into_result()?;
        parts.validator.validate_body(body).into_result()?;
        let client = ClientInfo::from_header(header)?;
        lifecycle.advance(PipelineStage::Validated);

        let topics = body.normalized_topics();
        let names = topics.iter().map(|item| item.topic.as_str());
        self.gate
            .authorize(*remote_addr, header, names, RequestCode::Subscribe)
            .into_result()?;
        lifecycle.advance(PipelineStage::Authorized);

        self.gate.check_webhook(&body.url, span).await.into_result()?;
        lifecycle.advance(PipelineStage::UrlChecked);

        let group = body.consumer_group.trim();
        let url = body.url.trim();
        let (change, notified) =
            parts
                .registry
                .subscribe_with(&client, group, url, &topics, |change| {
                    parts.dispatcher.notify_change(change)
                });
        lifecycle.advance(PipelineStage::Registered);

        notified.into_result()?;
        lifecycle.advance(PipelineStage::Notified);

        if let Some(snapshot) = change.snapshot() {
            info!(
                client = %client,
                consumer_group = %group,
                url = %url,
                topics = snapshot.topics.len(),
                members = snapshot.members.len(),
                "Subscription registered"
            );
        }
        Ok(change)
    }
}

/// Runs the unsubscribe pipeline for one request.
///
/// Unsubscribing only narrows what a client receives, so the security gate
/// is not consulted.
pub struct UnsubscribeProcessor {
    parts: PipelineParts,
}

impl UnsubscribeProcessor {
    pub fn new(parts: PipelineParts) -> Self {
        Self { parts }
    }

    pub fn process(
        &self,
        ctx: UnsubscribeContext,
    ) -> Result<CompletionReport, CompletionError> {
        let parts = &self.parts;
        parts.metrics.record_request(false);
        let span = parts.tracer.start("unsubscribe", ctx.correlation_id());
        let mut lifecycle = RequestLifecycle::without_gate();

        let result = span
            .span()
            .in_scope(|| self.run(ctx.request(), &span, &mut lifecycle));

        parts
            .assembler
            .finish(ctx, RequestCode::Unsubscribe, result, span, &mut lifecycle)
    }

    fn run(
        &self,
        request: &UnsubscribeRequest,
        span: &SpanHandle,
        lifecycle: &mut RequestLifecycle,
    ) -> Result<GroupChange, Rejection> {
        let parts = &self.parts;
        let UnsubscribeRequest {
            remote_addr,
            header,
            body,
        } = request;
        parts.tracer.record_attribute(span, "remote_addr", remote_addr);
        parts
            .tracer
            .record_attribute(span, "consumer_group", &body.consumer_group);
        parts
            .tracer
            .record_attribute(span, "topic_count", &body.topics.len());

        parts.validator.validate_header(header).into_result()?;
        parts
            .validator
            .validate_unsubscribe_body(body)
            .into_result()?;
        let client = ClientInfo::from_header(header)?;
        lifecycle.advance(PipelineStage::Validated);

        let group = body.consumer_group.trim();
        let topics = body.normalized_topics();
        let (change, notified) =
            parts
                .registry
                .unsubscribe_with(&client, group, &topics, |change| {
                    parts.dispatcher.notify_change(change)
                });
        lifecycle.advance(PipelineStage::Registered);

        notified.into_result()?;
        lifecycle.advance(PipelineStage::Notified);

        match &change {
            GroupChange::Updated(snapshot) => info!(
                client = %client,
                consumer_group = %group,
                topics = snapshot.topics.len(),
                "Unsubscribed"
            ),
            GroupChange::Removed { .. } => {
                info!(client = %client, consumer_group = %group, "Last member left; group pruned")
            }
            GroupChange::Unchanged { .. } => {
                debug!(client = %client, consumer_group = %group, "Nothing to unsubscribe")
            }
        }
        Ok(change)
    }
}
