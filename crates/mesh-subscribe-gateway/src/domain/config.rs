//! Gateway configuration with validation.
//!
//! Every section is `#[serde(default)]` so partial documents deserialize.
//! [`GatewayConfig::from_env`] overlays `MESH_*` variables on the defaults.

use ipnetwork::{Ipv4Network, Ipv6Network};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Main gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Identity of this gateway instance
    pub mesh: MeshConfig,
    /// ACL and webhook target protection
    pub security: SecurityConfig,
    /// Delivery-agreement handshake
    pub webhook: WebhookConfig,
    /// Request validation limits
    pub limits: LimitsConfig,
    /// Registry housekeeping
    pub registry: RegistryConfig,
    /// Request tracing
    pub trace: TraceConfig,
}

impl GatewayConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mesh.cluster.trim().is_empty() {
            return Err(ConfigError::Invalid("mesh.cluster cannot be blank".into()));
        }
        if self.mesh.webhook_origin.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "mesh.webhook_origin cannot be blank".into(),
            ));
        }

        self.security.ipv4_networks()?;
        self.security.ipv6_networks()?;

        if self.webhook.handshake_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "handshake_timeout cannot be 0".into(),
            ));
        }

        if self.limits.max_topics_per_request == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_topics_per_request cannot be 0".into(),
            ));
        }
        if self.limits.diagnostic_frames == 0 {
            return Err(ConfigError::InvalidLimit(
                "diagnostic_frames cannot be 0".into(),
            ));
        }

        if self.registry.cleanup_interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "cleanup_interval cannot be 0".into(),
            ));
        }
        if self.registry.client_idle_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "client_idle_timeout cannot be 0".into(),
            ));
        }

        Ok(())
    }

    /// Defaults overlaid with `MESH_*` environment variables.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `MESH_CLUSTER` | `mesh.cluster` |
    /// | `MESH_ENV` | `mesh.env` |
    /// | `MESH_IDC` | `mesh.idc` |
    /// | `MESH_LOCAL_IP` | `mesh.local_ip` |
    /// | `MESH_WEBHOOK_ORIGIN` | `mesh.webhook_origin` |
    /// | `MESH_ACL_ENABLED` | `security.acl_enabled` |
    /// | `MESH_IPV4_DENYLIST` | `security.ipv4_denylist` (comma separated) |
    /// | `MESH_IPV6_DENYLIST` | `security.ipv6_denylist` (comma separated) |
    /// | `MESH_HANDSHAKE_TIMEOUT` | `webhook.handshake_timeout` (`3s`, `500ms`) |
    /// | `MESH_TRACE_ENABLED` | `trace.enabled` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("MESH_CLUSTER") {
            config.mesh.cluster = v;
        }
        if let Some(v) = lookup("MESH_ENV") {
            config.mesh.env = v;
        }
        if let Some(v) = lookup("MESH_IDC") {
            config.mesh.idc = v;
        }
        if let Some(v) = lookup("MESH_LOCAL_IP") {
            config.mesh.local_ip = v
                .parse()
                .map_err(|_| ConfigError::InvalidEnv("MESH_LOCAL_IP", v))?;
        }
        if let Some(v) = lookup("MESH_WEBHOOK_ORIGIN") {
            config.mesh.webhook_origin = v;
        }
        if let Some(v) = lookup("MESH_ACL_ENABLED") {
            config.security.acl_enabled =
                parse_flag(&v).ok_or(ConfigError::InvalidEnv("MESH_ACL_ENABLED", v))?;
        }
        if let Some(v) = lookup("MESH_IPV4_DENYLIST") {
            config.security.ipv4_denylist = split_list(&v);
        }
        if let Some(v) = lookup("MESH_IPV6_DENYLIST") {
            config.security.ipv6_denylist = split_list(&v);
        }
        if let Some(v) = lookup("MESH_HANDSHAKE_TIMEOUT") {
            config.webhook.handshake_timeout = humantime_serde::parse_duration(&v)
                .map_err(|_| ConfigError::InvalidEnv("MESH_HANDSHAKE_TIMEOUT", v))?;
        }
        if let Some(v) = lookup("MESH_TRACE_ENABLED") {
            config.trace.enabled =
                parse_flag(&v).ok_or(ConfigError::InvalidEnv("MESH_TRACE_ENABLED", v))?;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Identity reported in every response header
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub cluster: String,
    pub env: String,
    pub idc: String,
    /// Address this gateway answers from
    pub local_ip: IpAddr,
    /// Origin presented to webhook targets during the handshake
    pub webhook_origin: String,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            cluster: "DEFAULT".to_string(),
            env: "PRD".to_string(),
            idc: "DEFAULT".to_string(),
            local_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            webhook_origin: "eventmesh.DEFAULT".to_string(),
        }
    }
}

/// ACL switch and SSRF denylists
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Run per-topic ACL checks
    pub acl_enabled: bool,
    /// IPv4 CIDRs webhook targets may not resolve into
    pub ipv4_denylist: Vec<String>,
    /// IPv6 CIDRs webhook targets may not resolve into
    pub ipv6_denylist: Vec<String>,
    /// Accept plain `http` webhook URLs (https is always accepted)
    pub allow_http: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            acl_enabled: false,
            ipv4_denylist: vec![
                "127.0.0.0/8".to_string(),
                "0.0.0.0/8".to_string(),
                "169.254.0.0/16".to_string(),
                "255.255.255.255/32".to_string(),
            ],
            ipv6_denylist: vec![
                "::1/128".to_string(),
                "::/128".to_string(),
                "fe80::/10".to_string(),
            ],
            allow_http: true,
        }
    }
}

impl SecurityConfig {
    /// Parsed IPv4 denylist
    pub fn ipv4_networks(&self) -> Result<Vec<Ipv4Network>, ConfigError> {
        self.ipv4_denylist
            .iter()
            .map(|cidr| {
                cidr.trim()
                    .parse::<Ipv4Network>()
                    .map_err(|e| ConfigError::InvalidCidr(cidr.clone(), e.to_string()))
            })
            .collect()
    }

    /// Parsed IPv6 denylist
    pub fn ipv6_networks(&self) -> Result<Vec<Ipv6Network>, ConfigError> {
        self.ipv6_denylist
            .iter()
            .map(|cidr| {
                cidr.trim()
                    .parse::<Ipv6Network>()
                    .map_err(|e| ConfigError::InvalidCidr(cidr.clone(), e.to_string()))
            })
            .collect()
    }
}

/// Delivery-agreement handshake settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Upper bound on DNS resolution plus handshake
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
    /// Resolve host names and check every address against the denylists
    pub resolve_hostnames: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(3),
            resolve_hostnames: true,
        }
    }
}

/// Request limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Max topics in one subscribe request
    pub max_topics_per_request: usize,
    /// Error-chain frames kept in a SUBSCRIBE_ERROR diagnostic
    pub diagnostic_frames: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_topics_per_request: crate::domain::validation::DEFAULT_MAX_TOPICS,
            diagnostic_frames: 2,
        }
    }
}

/// Idle client reaping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Members not refreshed for this long are reaped
    #[serde(with = "humantime_serde")]
    pub client_idle_timeout: Duration,
    /// How often the cleanup task runs
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            client_idle_timeout: Duration::from_secs(30 * 60),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Request tracing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    pub enabled: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Denylist entry is not a CIDR of the right family
    #[error("invalid CIDR {0:?}: {1}")]
    InvalidCidr(String, String),
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// Environment variable could not be parsed
    #[error("invalid value for {0}: {1:?}")]
    InvalidEnv(&'static str, String),
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Humantime serde module for Duration serialization
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() != 0 {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        } else {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        // "ms" before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(|_| "invalid minutes")
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}
