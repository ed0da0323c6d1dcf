//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for process-wide logging.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to every log line
    pub service_name: String,

    /// IDC this gateway instance runs in
    pub idc: String,

    /// Log level filter (trace, debug, info, warn, error)
    pub log_level: String,

    /// Whether to enable console output (for development)
    pub console_output: bool,

    /// Whether to enable JSON formatted logs
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "eventmesh-gateway".to_string(),
            idc: "DEFAULT".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `OTEL_SERVICE_NAME`: Service name (default: eventmesh-gateway)
    /// - `MESH_IDC`: IDC label (default: DEFAULT)
    /// - `MESH_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `MESH_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `MESH_JSON_LOGS`: Enable JSON logs (default: false in dev, true in containers)
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        Self {
            service_name: env::var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| "eventmesh-gateway".to_string()),

            idc: env::var("MESH_IDC").unwrap_or_else(|_| "DEFAULT".to_string()),

            log_level: env::var("MESH_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            console_output: env::var("MESH_CONSOLE_OUTPUT")
                .map(|v| parse_flag(&v, true))
                .unwrap_or(true),

            json_logs: env::var("MESH_JSON_LOGS")
                .map(|v| parse_flag(&v, false))
                .unwrap_or(is_container),
        }
    }

    /// Full service name including the IDC label.
    pub fn full_service_name(&self) -> String {
        if self.idc == "DEFAULT" {
            self.service_name.clone()
        } else {
            format!("{}-{}", self.service_name, self.idc.to_lowercase())
        }
    }
}

fn parse_flag(value: &str, default: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}
