//! Per-request pipeline state machine.
//!
//! ```text
//! RECEIVED → VALIDATED → AUTHORIZED → URL_CHECKED → REGISTERED → NOTIFIED → COMPLETED
//!     └──────────┴───────────┴────────────┴─────────────┴───────────┴──→ REJECTED
//! ```
//!
//! `COMPLETED` and `REJECTED` are terminal and mutually exclusive.

use std::fmt;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PipelineStage {
    Received,
    Validated,
    Authorized,
    UrlChecked,
    Registered,
    Notified,
    Completed,
    Rejected,
}

impl PipelineStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineStage::Completed | PipelineStage::Rejected)
    }

    /// Whether `next` directly follows `self`
    pub fn can_advance_to(self, next: PipelineStage) -> bool {
        use PipelineStage::*;
        match (self, next) {
            (Completed | Rejected, _) => false,
            (_, Rejected) => true,
            (Received, Validated)
            | (Validated, Authorized)
            | (Authorized, UrlChecked)
            | (UrlChecked, Registered)
            | (Registered, Notified)
            | (Notified, Completed) => true,
            _ => false,
        }
    }

    /// Unsubscribe skips the security gate: VALIDATED → REGISTERED is allowed there.
    fn can_skip_gate(self, next: PipelineStage) -> bool {
        self == PipelineStage::Validated && next == PipelineStage::Registered
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Received => "RECEIVED",
            PipelineStage::Validated => "VALIDATED",
            PipelineStage::Authorized => "AUTHORIZED",
            PipelineStage::UrlChecked => "URL_CHECKED",
            PipelineStage::Registered => "REGISTERED",
            PipelineStage::Notified => "NOTIFIED",
            PipelineStage::Completed => "COMPLETED",
            PipelineStage::Rejected => "REJECTED",
        };
        f.write_str(name)
    }
}

/// Invalid transition attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid pipeline transition {from} -> {to}")]
pub struct TransitionError {
    pub from: PipelineStage,
    pub to: PipelineStage,
}

/// Tracks the stage of one request
#[derive(Debug, Clone)]
pub struct RequestLifecycle {
    stage: PipelineStage,
    gate_optional: bool,
}

impl Default for RequestLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestLifecycle {
    pub fn new() -> Self {
        Self {
            stage: PipelineStage::Received,
            gate_optional: false,
        }
    }

    /// Lifecycle for requests that never pass the security gate
    pub fn without_gate() -> Self {
        Self {
            stage: PipelineStage::Received,
            gate_optional: true,
        }
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    pub fn try_advance(&mut self, next: PipelineStage) -> Result<(), TransitionError> {
        let allowed = self.stage.can_advance_to(next)
            || (self.gate_optional && self.stage.can_skip_gate(next));
        if !allowed {
            return Err(TransitionError {
                from: self.stage,
                to: next,
            });
        }
        debug!(from = %self.stage, to = %next, "Pipeline transition");
        self.stage = next;
        Ok(())
    }

    /// Advance, logging instead of failing on an invalid transition.
    pub fn advance(&mut self, next: PipelineStage) {
        if let Err(e) = self.try_advance(next) {
            error!(error = %e, "Pipeline stage out of order");
        }
    }

    /// Enter REJECTED unless already terminal.
    pub fn reject(&mut self) {
        if !self.stage.is_terminal() {
            self.advance(PipelineStage::Rejected);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PipelineStage::*;

    #[test]
    fn test_happy_path() {
        let mut lifecycle = RequestLifecycle::new();
        for stage in [
            Validated, Authorized, UrlChecked, Registered, Notified, Completed,
        ] {
            assert!(lifecycle.try_advance(stage).is_ok());
        }
        assert_eq!(lifecycle.stage(), Completed);
    }

    #[test]
    fn test_reject_from_any_non_terminal_stage() {
        for stage in [Received, Validated, Authorized, UrlChecked, Registered, Notified] {
            assert!(stage.can_advance_to(Rejected), "{stage}");
        }
    }

    #[test]
    fn test_terminal_states_are_exclusive() {
        assert!(!Completed.can_advance_to(Rejected));
        assert!(!Rejected.can_advance_to(Completed));
        assert!(!Rejected.can_advance_to(Rejected));
    }

    #[test]
    fn test_no_skipping_stages() {
        let mut lifecycle = RequestLifecycle::new();
        let err = lifecycle.try_advance(Registered).unwrap_err();
        assert_eq!(err.from, Received);
        assert_eq!(err.to, Registered);
        assert_eq!(lifecycle.stage(), Received);
    }

    #[test]
    fn test_gateless_lifecycle_skips_to_registered() {
        let mut lifecycle = RequestLifecycle::without_gate();
        lifecycle.try_advance(Validated).unwrap();
        lifecycle.try_advance(Registered).unwrap();
        lifecycle.try_advance(Notified).unwrap();
        lifecycle.try_advance(Completed).unwrap();
    }

    #[test]
    fn test_reject_is_idempotent_after_terminal() {
        let mut lifecycle = RequestLifecycle::new();
        lifecycle.reject();
        lifecycle.reject();
        assert_eq!(lifecycle.stage(), Rejected);
    }
}
