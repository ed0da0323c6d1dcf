//! Topology change propagation to the consumer manager.
//!
//! [`NotificationDispatcher`] turns a committed [`GroupChange`] into a
//! consumer-manager call and maps failure to `SUBSCRIBE_ERROR` with a
//! diagnostic truncated to a bounded number of error-chain frames. The
//! registry mutation stays in place when notification fails.
//!
//! [`BroadcastConsumerManager`] is an in-process manager publishing
//! [`TopologyEvent`]s on a `tokio::sync::broadcast` channel.

use crate::domain::outcome::{Outcome, Rejection};
use crate::metrics::SubscribeMetrics;
use crate::ports::{ConsumerManager, NotifyError};
use crate::registry::{GroupChange, GroupSnapshot};
use serde::Serialize;
use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

/// Default broadcast channel capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Notifies the consumer manager about committed changes
pub struct NotificationDispatcher {
    manager: Arc<dyn ConsumerManager>,
    diagnostic_frames: usize,
    metrics: Arc<SubscribeMetrics>,
}

impl NotificationDispatcher {
    pub fn new(
        manager: Arc<dyn ConsumerManager>,
        diagnostic_frames: usize,
        metrics: Arc<SubscribeMetrics>,
    ) -> Self {
        Self {
            manager,
            diagnostic_frames: diagnostic_frames.max(1),
            metrics,
        }
    }

    /// Tell the manager a group's topic set changed
    pub fn notify(&self, snapshot: &GroupSnapshot) -> Outcome<()> {
        let result = self
            .manager
            .notify_topology_change(&snapshot.group, snapshot);
        self.finish(&snapshot.group, result)
    }

    /// Dispatch any change; `Unchanged` is a no-op.
    pub fn notify_change(&self, change: &GroupChange) -> Outcome<()> {
        match change {
            GroupChange::Updated(snapshot) => self.notify(snapshot),
            GroupChange::Removed { group } => {
                let result = self.manager.notify_group_removed(group);
                self.finish(group, result)
            }
            GroupChange::Unchanged { .. } => Outcome::Accepted(()),
        }
    }

    fn finish(&self, group: &str, result: Result<(), NotifyError>) -> Outcome<()> {
        match result {
            Ok(()) => {
                debug!(consumer_group = %group, "Consumer manager notified");
                Outcome::Accepted(())
            }
            Err(e) => {
                self.metrics.record_notify_failure();
                let diagnostic = diagnostic(&e, self.diagnostic_frames);
                error!(
                    consumer_group = %group,
                    error = %diagnostic,
                    "Consumer manager notification failed; registry keeps the new state"
                );
                Outcome::Rejected(Rejection::subscribe(diagnostic))
            }
        }
    }
}

/// Render at most `frames` links of an error's source chain.
pub fn diagnostic(err: &(dyn Error + 'static), frames: usize) -> String {
    let mut parts = Vec::with_capacity(frames);
    let mut current: Option<&(dyn Error + 'static)> = Some(err);
    while let Some(e) = current {
        if parts.len() == frames {
            break;
        }
        parts.push(e.to_string());
        current = e.source();
    }
    parts.join(": ")
}

/// Topology change published on the event bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TopologyEvent {
    GroupUpdated { snapshot: GroupSnapshot },
    GroupRemoved { group: String },
}

impl TopologyEvent {
    pub fn group(&self) -> &str {
        match self {
            TopologyEvent::GroupUpdated { snapshot } => &snapshot.group,
            TopologyEvent::GroupRemoved { group } => group,
        }
    }
}

/// Consumer manager that publishes on a broadcast channel.
///
/// `send` never blocks, which keeps it safe to call under the registry
/// lock. Publishing with no subscribers is not an error.
pub struct BroadcastConsumerManager {
    sender: broadcast::Sender<TopologyEvent>,
    events_published: AtomicU64,
}

impl Default for BroadcastConsumerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastConsumerManager {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            events_published: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TopologyEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }

    fn publish(&self, event: TopologyEvent) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
        let group = event.group().to_string();
        match self.sender.send(event) {
            Ok(receivers) => {
                debug!(consumer_group = %group, receivers, "Topology event published");
            }
            Err(_) => {
                warn!(consumer_group = %group, "Topology event published with no subscribers");
            }
        }
    }
}

impl ConsumerManager for BroadcastConsumerManager {
    fn notify_topology_change(
        &self,
        _group: &str,
        snapshot: &GroupSnapshot,
    ) -> Result<(), NotifyError> {
        self.publish(TopologyEvent::GroupUpdated {
            snapshot: snapshot.clone(),
        });
        Ok(())
    }

    fn notify_group_removed(&self, group: &str) -> Result<(), NotifyError> {
        self.publish(TopologyEvent::GroupRemoved {
            group: group.to_string(),
        });
        Ok(())
    }
}
