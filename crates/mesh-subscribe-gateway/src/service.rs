//! Subscription gateway service - wires the pipeline together.
//!
//! The transport layer either hands over ready-made contexts
//! ([`SubscriptionGateway::handle_subscribe`]) or uses the request/response
//! helpers ([`SubscriptionGateway::subscribe`]).

use crate::context::{AsyncRequestContext, CompletionError, CompletionReport};
use crate::dispatch::NotificationDispatcher;
use crate::domain::config::GatewayConfig;
use crate::domain::error::GatewayError;
use crate::domain::outcome::Rejection;
use crate::domain::types::{
    ClientInfo, HeartbeatRequest, MeshResponse, RequestCode, SubscribeRequest, UnsubscribeRequest,
};
use crate::domain::validation::RequestValidator;
use crate::metrics::SubscribeMetrics;
use crate::observability::{NoopTraceRecorder, TracingSpanRecorder};
use crate::ports::{
    AclChecker, ConsumerManager, DeliveryAgreement, SystemTimeSource, TimeSource, TraceRecorder,
};
use crate::processor::{
    PipelineParts, SubscribeContext, SubscribeProcessor, UnsubscribeContext, UnsubscribeProcessor,
};
use crate::registry::{GroupChange, InMemoryRegistryStore, RegistryStore, SubscriptionRegistry};
use crate::response::ResponseAssembler;
use crate::security::{SecurityGate, UrlGuard};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// External collaborators injected into the gateway
pub struct Collaborators {
    pub acl: Arc<dyn AclChecker>,
    pub agreement: Arc<dyn DeliveryAgreement>,
    pub consumer_manager: Arc<dyn ConsumerManager>,
    /// `None` picks a recorder from `trace.enabled`
    pub tracer: Option<Arc<dyn TraceRecorder>>,
    pub store: Arc<dyn RegistryStore>,
    pub time: Arc<dyn TimeSource>,
}

impl Collaborators {
    pub fn new(
        acl: Arc<dyn AclChecker>,
        agreement: Arc<dyn DeliveryAgreement>,
        consumer_manager: Arc<dyn ConsumerManager>,
    ) -> Self {
        Self {
            acl,
            agreement,
            consumer_manager,
            tracer: None,
            store: Arc::new(InMemoryRegistryStore::new()),
            time: Arc::new(SystemTimeSource),
        }
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn TraceRecorder>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn RegistryStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_time(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }
}

/// Subscription gateway service state
pub struct SubscriptionGateway {
    config: GatewayConfig,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Arc<NotificationDispatcher>,
    validator: RequestValidator,
    assembler: Arc<ResponseAssembler>,
    metrics: Arc<SubscribeMetrics>,
    subscribe: SubscribeProcessor,
    unsubscribe: UnsubscribeProcessor,
    shutdown_tx: watch::Sender<bool>,
}

impl SubscriptionGateway {
    /// Validate `config`, restore the registry from the store and build
    /// the pipeline.
    pub fn new(config: GatewayConfig, collaborators: Collaborators) -> Result<Self, GatewayError> {
        config.validate()?;

        let Collaborators {
            acl,
            agreement,
            consumer_manager,
            tracer,
            store,
            time,
        } = collaborators;

        let tracer: Arc<dyn TraceRecorder> = match tracer {
            Some(tracer) => tracer,
            None if config.trace.enabled => Arc::new(TracingSpanRecorder::new()),
            None => Arc::new(NoopTraceRecorder),
        };

        let registry = Arc::new(
            SubscriptionRegistry::restore(store, time)
                .map_err(|e| GatewayError::Internal(format!("registry restore failed: {e}")))?,
        );
        let metrics = Arc::new(SubscribeMetrics::new());
        let dispatcher = Arc::new(NotificationDispatcher::new(
            consumer_manager,
            config.limits.diagnostic_frames,
            Arc::clone(&metrics),
        ));
        let assembler = Arc::new(ResponseAssembler::new(
            &config.mesh,
            Arc::clone(&tracer),
            Arc::clone(&metrics),
        ));

        let guard = UrlGuard::from_config(&config.security, &config.webhook)?;
        let gate = Arc::new(SecurityGate::new(
            config.security.acl_enabled,
            acl,
            guard,
            agreement,
            config.mesh.webhook_origin.clone(),
            config.webhook.handshake_timeout,
            Arc::clone(&tracer),
        ));

        let parts = PipelineParts {
            validator: RequestValidator::new(config.limits.max_topics_per_request),
            registry: Arc::clone(&registry),
            dispatcher: Arc::clone(&dispatcher),
            assembler: Arc::clone(&assembler),
            tracer,
            metrics: Arc::clone(&metrics),
        };

        let (shutdown_tx, _) = watch::channel(false);

        info!(
            cluster = %config.mesh.cluster,
            idc = %config.mesh.idc,
            acl_enabled = config.security.acl_enabled,
            groups = registry.group_count(),
            "Subscription gateway ready"
        );

        Ok(Self {
            subscribe: SubscribeProcessor::new(parts.clone(), gate),
            validator: parts.validator,
            unsubscribe: UnsubscribeProcessor::new(parts),
            config,
            registry,
            dispatcher,
            assembler,
            metrics,
            shutdown_tx,
        })
    }

    /// Run the subscribe pipeline on a transport-provided context
    pub async fn handle_subscribe(
        &self,
        ctx: SubscribeContext,
    ) -> Result<CompletionReport, CompletionError> {
        self.subscribe.process(ctx).await
    }

    /// Run the unsubscribe pipeline on a transport-provided context
    pub fn handle_unsubscribe(
        &self,
        ctx: UnsubscribeContext,
    ) -> Result<CompletionReport, CompletionError> {
        self.unsubscribe.process(ctx)
    }

    /// Subscribe and wait for the response
    pub async fn subscribe(&self, request: SubscribeRequest) -> Result<MeshResponse, CompletionError> {
        let (ctx, rx) = AsyncRequestContext::new(request);
        self.handle_subscribe(ctx).await?;
        rx.recv().await
    }

    /// Unsubscribe and wait for the response
    pub async fn unsubscribe(
        &self,
        request: UnsubscribeRequest,
    ) -> Result<MeshResponse, CompletionError> {
        let (ctx, rx) = AsyncRequestContext::new(request);
        self.handle_unsubscribe(ctx)?;
        rx.recv().await
    }

    /// Refresh the caller's `last_seen` in every group it belongs to so the
    /// idle reaper keeps it. A client with no memberships still gets SUCCESS.
    pub fn heartbeat(&self, request: &HeartbeatRequest) -> MeshResponse {
        let result = self.refresh(request);
        if let Err(rejection) = &result {
            debug!(
                remote_addr = %request.remote_addr,
                code = %rejection.code,
                message = %rejection.message,
                "Heartbeat rejected"
            );
        }
        self.assembler.assemble(RequestCode::Heartbeat, &result)
    }

    fn refresh(&self, request: &HeartbeatRequest) -> Result<usize, Rejection> {
        self.validator.validate_header(&request.header).into_result()?;
        let client = ClientInfo::from_header(&request.header)?;
        let touched = self.registry.heartbeat(&client);
        debug!(client = %client, groups = touched, "Heartbeat");
        Ok(touched)
    }

    /// Drop a client from every group (e.g. on disconnect) and notify the
    /// consumer manager for each changed group.
    pub fn remove_client(&self, client: &ClientInfo) -> Vec<GroupChange> {
        let dispatcher = &self.dispatcher;
        self.registry.remove_client_with(client, |change| {
            // failures are logged and counted by the dispatcher
            let _ = dispatcher.notify_change(change);
        })
    }

    /// Reap members idle for longer than `registry.client_idle_timeout`
    pub fn reap_idle(&self) -> Vec<GroupChange> {
        reap_once(
            &self.registry,
            &self.dispatcher,
            &self.metrics,
            self.config.registry.client_idle_timeout,
        )
    }

    /// Start the periodic idle reaper
    pub fn spawn_cleanup(&self) -> Result<JoinHandle<()>, GatewayError> {
        if *self.shutdown_tx.borrow() {
            return Err(GatewayError::ShuttingDown);
        }
        let registry = Arc::clone(&self.registry);
        let dispatcher = Arc::clone(&self.dispatcher);
        let metrics = Arc::clone(&self.metrics);
        let interval = self.config.registry.cleanup_interval;
        let max_idle = self.config.registry.client_idle_timeout;
        let shutdown = self.shutdown_tx.subscribe();
        Ok(tokio::spawn(async move {
            cleanup_task(registry, dispatcher, metrics, interval, max_idle, shutdown).await;
        }))
    }

    /// Stop background tasks
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<SubscriptionRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn metrics(&self) -> Arc<SubscribeMetrics> {
        Arc::clone(&self.metrics)
    }
}

fn reap_once(
    registry: &SubscriptionRegistry,
    dispatcher: &NotificationDispatcher,
    metrics: &SubscribeMetrics,
    max_idle: Duration,
) -> Vec<GroupChange> {
    let changes = registry.reap_idle_with(max_idle, |change| {
        let _ = dispatcher.notify_change(change);
    });
    metrics.record_reaped(changes.len() as u64);
    changes
}

/// Background task that reaps idle subscribers until shutdown
pub async fn cleanup_task(
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Arc<NotificationDispatcher>,
    metrics: Arc<SubscribeMetrics>,
    interval: Duration,
    max_idle: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut cleanup_interval = tokio::time::interval(interval);
    cleanup_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cleanup_interval.tick() => {
                let changes = reap_once(&registry, &dispatcher, &metrics, max_idle);
                if !changes.is_empty() {
                    debug!(groups = changes.len(), "Cleaned up idle subscribers");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Cleanup task stopping");
                    return;
                }
            }
        }
    }
}
