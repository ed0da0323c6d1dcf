//! # Mesh Telemetry
//!
//! Process-wide logging for the event-mesh gateway.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mesh_telemetry::{init_logging, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env();
//! init_logging(&config)?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OTEL_SERVICE_NAME` | `eventmesh-gateway` | Service name in logs |
//! | `MESH_IDC` | `DEFAULT` | IDC label |
//! | `MESH_LOG_LEVEL` | `info` | Log level filter |
//! | `MESH_JSON_LOGS` | `false` | JSON output |

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::init_logging;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to install tracing subscriber: {0}")]
    SubscriberInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TelemetryError::Config("bad level".into());
        assert_eq!(err.to_string(), "Invalid configuration: bad level");
    }
}
