//! Request, response and identity types for the subscription pipeline.
//!
//! Field names follow the mesh HTTP protocol (`consumerGroup`, `passwd`, ...).

use crate::domain::error::RetCode;
use crate::domain::outcome::Rejection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Protocol request codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestCode {
    Heartbeat,
    Subscribe,
    Unsubscribe,
}

impl RequestCode {
    pub fn code(self) -> i32 {
        match self {
            RequestCode::Heartbeat => 203,
            RequestCode::Subscribe => 206,
            RequestCode::Unsubscribe => 207,
        }
    }
}

impl fmt::Display for RequestCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestCode::Heartbeat => write!(f, "HEARTBEAT({})", self.code()),
            RequestCode::Subscribe => write!(f, "SUBSCRIBE({})", self.code()),
            RequestCode::Unsubscribe => write!(f, "UNSUBSCRIBE({})", self.code()),
        }
    }
}

/// Delivery mode requested for a topic. Opaque to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionMode {
    Clustering,
    Broadcasting,
}

/// Whether the client wants synchronous or asynchronous delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionType {
    Sync,
    Async,
}

/// A topic plus its delivery mode
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionItem {
    pub topic: String,
    pub mode: SubscriptionMode,
    #[serde(rename = "type", default = "default_subscription_type")]
    pub sub_type: SubscriptionType,
}

fn default_subscription_type() -> SubscriptionType {
    SubscriptionType::Async
}

impl SubscriptionItem {
    pub fn new(topic: impl Into<String>, mode: SubscriptionMode) -> Self {
        Self {
            topic: topic.into(),
            mode,
            sub_type: SubscriptionType::Async,
        }
    }

    pub fn with_type(mut self, sub_type: SubscriptionType) -> Self {
        self.sub_type = sub_type;
        self
    }
}

/// Subscribe/unsubscribe request header
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscribeRequestHeader {
    pub env: String,
    pub idc: String,
    pub sys: String,
    pub pid: String,
    pub ip: String,
    pub username: String,
    pub passwd: String,
}

/// Subscribe request body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SubscribeRequestBody {
    pub url: String,
    pub consumer_group: String,
    pub topics: Vec<SubscriptionItem>,
}

impl SubscribeRequestBody {
    /// Topics with surrounding whitespace stripped from their names
    pub fn normalized_topics(&self) -> Vec<SubscriptionItem> {
        self.topics
            .iter()
            .map(|item| SubscriptionItem {
                topic: item.topic.trim().to_string(),
                ..item.clone()
            })
            .collect()
    }
}

/// Unsubscribe request body. Topics are names only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UnsubscribeRequestBody {
    pub url: String,
    pub consumer_group: String,
    pub topics: Vec<String>,
}

impl UnsubscribeRequestBody {
    /// Topic names with surrounding whitespace stripped
    pub fn normalized_topics(&self) -> Vec<String> {
        self.topics.iter().map(|t| t.trim().to_string()).collect()
    }
}

/// A subscribe request as handed over by the transport layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Peer address of the connection the request arrived on
    pub remote_addr: SocketAddr,
    pub header: SubscribeRequestHeader,
    pub body: SubscribeRequestBody,
}

/// An unsubscribe request as handed over by the transport layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribeRequest {
    pub remote_addr: SocketAddr,
    pub header: SubscribeRequestHeader,
    pub body: UnsubscribeRequestBody,
}

/// Liveness signal from a subscribed client. Carries no body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub remote_addr: SocketAddr,
    pub header: SubscribeRequestHeader,
}

/// Identity of a subscribing process.
///
/// Equality, hashing and ordering cover exactly (env, idc, sys, ip, pid).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientInfo {
    env: String,
    idc: String,
    sys: String,
    ip: String,
    pid: u64,
}

impl ClientInfo {
    pub fn new(
        env: impl Into<String>,
        idc: impl Into<String>,
        sys: impl Into<String>,
        ip: impl Into<String>,
        pid: u64,
    ) -> Self {
        Self {
            env: env.into(),
            idc: idc.into(),
            sys: sys.into(),
            ip: ip.into(),
            pid,
        }
    }

    /// Build from a request header. Fails with `HEADER_ERROR` when the pid
    /// is not a plain decimal number.
    pub fn from_header(header: &SubscribeRequestHeader) -> Result<Self, Rejection> {
        let pid = parse_pid(&header.pid)
            .map_err(|e| Rejection::header(format!("{e}: {}", header.pid.trim())))?;
        Ok(Self::new(
            header.env.trim(),
            header.idc.trim(),
            header.sys.trim(),
            header.ip.trim(),
            pid,
        ))
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    pub fn idc(&self) -> &str {
        &self.idc
    }

    pub fn sys(&self) -> &str {
        &self.sys
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn pid(&self) -> u64 {
        self.pid
    }
}

impl fmt::Display for ClientInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}",
            self.env, self.idc, self.sys, self.ip, self.pid
        )
    }
}

/// Why a pid header value was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PidError {
    NotNumeric,
    OutOfRange,
}

impl fmt::Display for PidError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PidError::NotNumeric => write!(f, "pid is not numeric"),
            PidError::OutOfRange => write!(f, "pid is out of range"),
        }
    }
}

/// Digits only, no sign, fits in u64.
pub(crate) fn parse_pid(raw: &str) -> Result<u64, PidError> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PidError::NotNumeric);
    }
    raw.parse().map_err(|_| PidError::OutOfRange)
}

/// Identity of the gateway instance answering a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseHeader {
    pub code: i32,
    pub cluster: String,
    pub ip: String,
    pub env: String,
    pub idc: String,
}

/// The single response produced for every request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshResponse {
    pub header: ResponseHeader,
    pub ret_code: i32,
    pub ret_msg: String,
    pub res_time: DateTime<Utc>,
}

impl MeshResponse {
    /// Decoded return code, if it is one of ours
    pub fn ret_code(&self) -> Option<RetCode> {
        RetCode::from_code(self.ret_code)
    }

    pub fn is_success(&self) -> bool {
        self.ret_code == RetCode::Success.code()
    }
}
