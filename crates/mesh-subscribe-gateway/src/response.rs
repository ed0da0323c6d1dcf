//! Response assembly and single completion.

use crate::context::{AsyncRequestContext, CompletionError, CompletionReport};
use crate::domain::config::MeshConfig;
use crate::domain::error::RetCode;
use crate::domain::lifecycle::{PipelineStage, RequestLifecycle};
use crate::domain::outcome::Rejection;
use crate::domain::types::{MeshResponse, RequestCode, ResponseHeader};
use crate::metrics::SubscribeMetrics;
use crate::ports::{SpanHandle, TraceRecorder};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

/// Builds the one response for a request and completes its context
pub struct ResponseAssembler {
    cluster: String,
    ip: String,
    env: String,
    idc: String,
    tracer: Arc<dyn TraceRecorder>,
    metrics: Arc<SubscribeMetrics>,
}

impl ResponseAssembler {
    pub fn new(
        mesh: &MeshConfig,
        tracer: Arc<dyn TraceRecorder>,
        metrics: Arc<SubscribeMetrics>,
    ) -> Self {
        Self {
            cluster: mesh.cluster.clone(),
            ip: mesh.local_ip.to_string(),
            env: mesh.env.clone(),
            idc: mesh.idc.clone(),
            tracer,
            metrics,
        }
    }

    /// Response for `result` with this gateway's identity in the header
    pub fn assemble<T>(&self, request_code: RequestCode, result: &Result<T, Rejection>) -> MeshResponse {
        let (code, message) = match result {
            Ok(_) => (RetCode::Success, RetCode::Success.message().to_string()),
            Err(rejection) => (rejection.code, rejection.message.clone()),
        };
        MeshResponse {
            header: ResponseHeader {
                code: request_code.code(),
                cluster: self.cluster.clone(),
                ip: self.ip.clone(),
                env: self.env.clone(),
                idc: self.idc.clone(),
            },
            ret_code: code.code(),
            ret_msg: message,
            res_time: Utc::now(),
        }
    }

    /// End the request span, move the lifecycle to its terminal state and
    /// complete the context. Round-trip latency is recorded after the
    /// response has been handed over.
    pub fn finish<Req, T>(
        &self,
        mut ctx: AsyncRequestContext<Req, MeshResponse>,
        request_code: RequestCode,
        result: Result<T, Rejection>,
        span: SpanHandle,
        lifecycle: &mut RequestLifecycle,
    ) -> Result<CompletionReport, CompletionError> {
        let response = self.assemble(request_code, &result);
        let code = response.ret_code().unwrap_or(RetCode::SubscribeError);
        self.metrics.record_outcome(code);
        self.tracer.record_attribute(&span, "ret_code", &code);

        match &result {
            Ok(_) => {
                lifecycle.advance(PipelineStage::Completed);
                self.tracer.end(span);
                info!(
                    correlation_id = %ctx.correlation_id(),
                    request = %request_code,
                    "Request accepted"
                );
            }
            Err(rejection) => {
                lifecycle.reject();
                self.tracer.end_with_error(span, rejection);
                debug!(
                    correlation_id = %ctx.correlation_id(),
                    request = %request_code,
                    code = %rejection.code,
                    message = %rejection.message,
                    "Request rejected"
                );
            }
        }

        let metrics = self.metrics.clone();
        ctx.on_complete(move |report| {
            metrics.record_completion(report.elapsed, report.delivered);
            Ok(())
        });
        ctx.complete(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::NoopTraceRecorder;
    use crate::domain::correlation::CorrelationId;

    fn assembler(metrics: Arc<SubscribeMetrics>) -> ResponseAssembler {
        let mesh = MeshConfig {
            cluster: "c1".into(),
            idc: "idc9".into(),
            ..MeshConfig::default()
        };
        ResponseAssembler::new(&mesh, Arc::new(NoopTraceRecorder), metrics)
    }

    #[test]
    fn test_header_carries_identity() {
        let response = assembler(Arc::new(SubscribeMetrics::new()))
            .assemble::<()>(RequestCode::Subscribe, &Ok(()));
        assert!(response.is_success());
        assert_eq!(response.header.code, 206);
        assert_eq!(response.header.cluster, "c1");
        assert_eq!(response.header.idc, "idc9");
        assert_eq!(response.header.ip, "127.0.0.1");
    }

    #[test]
    fn test_rejection_code_and_message() {
        let response = assembler(Arc::new(SubscribeMetrics::new())).assemble::<()>(
            RequestCode::Unsubscribe,
            &Err(Rejection::acl("denied")),
        );
        assert_eq!(response.ret_code(), Some(RetCode::AclError));
        assert_eq!(response.ret_msg, "denied");
        assert_eq!(response.header.code, 207);
    }

    #[tokio::test]
    async fn test_finish_completes_and_records() {
        let metrics = Arc::new(SubscribeMetrics::new());
        let assembler = assembler(metrics.clone());
        let (ctx, rx) = AsyncRequestContext::<(), MeshResponse>::new(());
        let mut lifecycle = RequestLifecycle::new();
        let span = NoopTraceRecorder.start("subscribe", CorrelationId::new());

        let report = assembler
            .finish::<(), ()>(
                ctx,
                RequestCode::Subscribe,
                Err(Rejection::header("idc is blank")),
                span,
                &mut lifecycle,
            )
            .unwrap();
        assert!(report.delivered);
        assert_eq!(lifecycle.stage(), PipelineStage::Rejected);

        let response = rx.recv().await.unwrap();
        assert_eq!(response.ret_code(), Some(RetCode::HeaderError));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.header_errors, 1);
        assert_eq!(snapshot.latency_samples, 1);
    }
}
