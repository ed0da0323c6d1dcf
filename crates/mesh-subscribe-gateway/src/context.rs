//! Async request context: the bridge between transport and pipeline.
//!
//! The transport creates a context together with a [`ResponseReceiver`],
//! hands the context to a processor and awaits the receiver. The context
//! owns a single-use completion slot backed by a oneshot channel.
//!
//! [`AsyncRequestContext::complete`] consumes the context, so completing
//! twice does not compile:
//!
//! ```compile_fail
//! use mesh_subscribe_gateway::AsyncRequestContext;
//!
//! let (ctx, _rx) = AsyncRequestContext::<u32, u32>::new(7);
//! let _ = ctx.complete(1);
//! let _ = ctx.complete(2);
//! ```
//!
//! Code that only holds `&mut` can use [`AsyncRequestContext::try_complete`],
//! which reports a second attempt as [`CompletionError::AlreadyCompleted`]
//! instead of sending again.

use crate::domain::correlation::CorrelationId;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{error, warn};

/// Boxed error returned by post-completion callbacks
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

type Callback = Box<dyn FnOnce(&CompletionReport) -> Result<(), CallbackError> + Send + Sync>;

/// Completion failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CompletionError {
    /// The slot was already used
    #[error("request {0} already completed")]
    AlreadyCompleted(CorrelationId),
    /// The context was dropped without a response
    #[error("request abandoned without a response")]
    Abandoned,
}

/// What happened when a context was completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionReport {
    pub correlation_id: CorrelationId,
    /// False when the transport receiver was already gone
    pub delivered: bool,
    /// Time from context creation to completion
    pub elapsed: Duration,
}

/// One inbound request plus its single-use completion slot
pub struct AsyncRequestContext<Req, Resp> {
    request: Req,
    correlation_id: CorrelationId,
    received_at: Instant,
    slot: Option<oneshot::Sender<Resp>>,
    callback: Option<Callback>,
}

impl<Req, Resp> AsyncRequestContext<Req, Resp> {
    pub fn new(request: Req) -> (Self, ResponseReceiver<Resp>) {
        Self::with_correlation_id(request, CorrelationId::new())
    }

    pub fn with_correlation_id(
        request: Req,
        correlation_id: CorrelationId,
    ) -> (Self, ResponseReceiver<Resp>) {
        let (tx, rx) = oneshot::channel();
        let ctx = Self {
            request,
            correlation_id,
            received_at: Instant::now(),
            slot: Some(tx),
            callback: None,
        };
        let receiver = ResponseReceiver {
            correlation_id,
            rx,
        };
        (ctx, receiver)
    }

    pub fn request(&self) -> &Req {
        &self.request
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    pub fn is_completed(&self) -> bool {
        self.slot.is_none()
    }

    /// Run `callback` after the response has been handed over. A failing
    /// callback is logged and otherwise ignored. Replaces any earlier one.
    pub fn on_complete<F>(&mut self, callback: F)
    where
        F: FnOnce(&CompletionReport) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    /// Complete and consume the context
    pub fn complete(mut self, response: Resp) -> Result<CompletionReport, CompletionError> {
        self.try_complete(response)
    }

    /// Complete through a mutable borrow. A second call returns
    /// [`CompletionError::AlreadyCompleted`] and sends nothing.
    pub fn try_complete(&mut self, response: Resp) -> Result<CompletionReport, CompletionError> {
        let Some(tx) = self.slot.take() else {
            error!(
                correlation_id = %self.correlation_id,
                "Request completed twice; second response discarded"
            );
            return Err(CompletionError::AlreadyCompleted(self.correlation_id));
        };

        // A closed receiver makes completion a no-op
        let delivered = tx.send(response).is_ok();
        let report = CompletionReport {
            correlation_id: self.correlation_id,
            delivered,
            elapsed: self.received_at.elapsed(),
        };
        if !delivered {
            warn!(
                correlation_id = %self.correlation_id,
                "Transport receiver dropped before completion"
            );
        }

        if let Some(callback) = self.callback.take() {
            if let Err(e) = callback(&report) {
                warn!(
                    correlation_id = %self.correlation_id,
                    error = %e,
                    "Post-completion callback failed"
                );
            }
        }
        Ok(report)
    }
}

impl<Req, Resp> Drop for AsyncRequestContext<Req, Resp> {
    fn drop(&mut self) {
        if self.slot.is_some() {
            error!(
                correlation_id = %self.correlation_id,
                "Request context dropped without a response"
            );
        }
    }
}

impl<Req: fmt::Debug, Resp> fmt::Debug for AsyncRequestContext<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncRequestContext")
            .field("correlation_id", &self.correlation_id)
            .field("request", &self.request)
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// Transport side of a context
#[derive(Debug)]
pub struct ResponseReceiver<Resp> {
    correlation_id: CorrelationId,
    rx: oneshot::Receiver<Resp>,
}

impl<Resp> ResponseReceiver<Resp> {
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Wait for the response
    pub async fn recv(self) -> Result<Resp, CompletionError> {
        self.rx.await.map_err(|_| CompletionError::Abandoned)
    }

    /// Non-blocking check; `Ok(None)` while still pending
    pub fn try_recv(&mut self) -> Result<Option<Resp>, CompletionError> {
        match self.rx.try_recv() {
            Ok(resp) => Ok(Some(resp)),
            Err(oneshot::error::TryRecvError::Empty) => Ok(None),
            Err(oneshot::error::TryRecvError::Closed) => Err(CompletionError::Abandoned),
        }
    }
}
