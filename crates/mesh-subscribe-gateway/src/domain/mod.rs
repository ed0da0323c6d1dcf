//! Domain layer: request types, return codes, configuration and pure checks.

pub mod config;
pub mod correlation;
pub mod error;
pub mod lifecycle;
pub mod outcome;
pub mod types;
pub mod validation;

pub use config::{ConfigError, GatewayConfig};
pub use correlation::CorrelationId;
pub use error::{codes, GatewayError, RetCode};
pub use lifecycle::{PipelineStage, RequestLifecycle, TransitionError};
pub use outcome::{Outcome, Rejection};
pub use types::*;
pub use validation::RequestValidator;
