//! Subscription pipeline metrics.
//!
//! Plain atomics; a metrics backend reads them through [`SubscribeMetrics::snapshot`].

use crate::domain::error::RetCode;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Pipeline counters
#[derive(Debug, Default)]
pub struct SubscribeMetrics {
    // Request counters
    pub requests_total: AtomicU64,
    pub subscribe_requests: AtomicU64,
    pub unsubscribe_requests: AtomicU64,

    // Outcome counters
    pub accepted: AtomicU64,
    pub header_errors: AtomicU64,
    pub body_errors: AtomicU64,
    pub acl_errors: AtomicU64,
    pub subscribe_errors: AtomicU64,

    // Downstream
    pub notify_failures: AtomicU64,
    pub undelivered_responses: AtomicU64,
    pub reaped_groups: AtomicU64,

    // Latency tracking (sum + count)
    pub total_latency_us: AtomicU64,
    pub latency_samples: AtomicU64,
}

impl SubscribeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, subscribe: bool) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if subscribe {
            self.subscribe_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.unsubscribe_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_outcome(&self, code: RetCode) {
        let counter = match code {
            RetCode::Success => &self.accepted,
            RetCode::HeaderError => &self.header_errors,
            RetCode::BodyError => &self.body_errors,
            RetCode::AclError => &self.acl_errors,
            RetCode::SubscribeError => &self.subscribe_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notify_failure(&self) {
        self.notify_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reaped(&self, groups: u64) {
        self.reaped_groups.fetch_add(groups, Ordering::Relaxed);
    }

    /// Round trip from request arrival to response hand-over
    pub fn record_completion(&self, elapsed: Duration, delivered: bool) {
        if !delivered {
            self.undelivered_responses.fetch_add(1, Ordering::Relaxed);
        }
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.total_latency_us.fetch_add(micros, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Get average latency in microseconds
    pub fn average_latency_us(&self) -> f64 {
        let total = self.total_latency_us.load(Ordering::Relaxed);
        let count = self.latency_samples.load(Ordering::Relaxed);
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            requests_total: load(&self.requests_total),
            subscribe_requests: load(&self.subscribe_requests),
            unsubscribe_requests: load(&self.unsubscribe_requests),
            accepted: load(&self.accepted),
            header_errors: load(&self.header_errors),
            body_errors: load(&self.body_errors),
            acl_errors: load(&self.acl_errors),
            subscribe_errors: load(&self.subscribe_errors),
            notify_failures: load(&self.notify_failures),
            undelivered_responses: load(&self.undelivered_responses),
            reaped_groups: load(&self.reaped_groups),
            latency_samples: load(&self.latency_samples),
            average_latency_us: self.average_latency_us(),
        }
    }
}

/// Point-in-time copy of [`SubscribeMetrics`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub subscribe_requests: u64,
    pub unsubscribe_requests: u64,
    pub accepted: u64,
    pub header_errors: u64,
    pub body_errors: u64,
    pub acl_errors: u64,
    pub subscribe_errors: u64,
    pub notify_failures: u64,
    pub undelivered_responses: u64,
    pub reaped_groups: u64,
    pub latency_samples: u64,
    pub average_latency_us: f64,
}

impl MetricsSnapshot {
    pub fn rejected(&self) -> u64 {
        self.header_errors + self.body_errors + self.acl_errors + self.subscribe_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcomes_counted_per_code() {
        let metrics = SubscribeMetrics::new();
        for code in RetCode::ALL {
            metrics.record_outcome(code);
        }
        metrics.record_outcome(RetCode::BodyError);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.accepted, 1);
        assert_eq!(snapshot.body_errors, 2);
        assert_eq!(snapshot.rejected(), 5);
    }

    #[test]
    fn test_average_latency() {
        let metrics = SubscribeMetrics::new();
        assert_eq!(metrics.average_latency_us(), 0.0);
        metrics.record_completion(Duration::from_micros(100), true);
        metrics.record_completion(Duration::from_micros(300), false);
        assert_eq!(metrics.average_latency_us(), 200.0);
        assert_eq!(metrics.snapshot().undelivered_responses, 1);
    }
}
