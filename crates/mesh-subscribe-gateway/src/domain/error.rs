//! Return codes and gateway-level error types.
//!
//! Every response carries a numeric return code from a fixed taxonomy. The
//! numeric values are part of the wire contract with mesh clients.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Return codes surfaced to subscribing clients
pub mod codes {
    pub const SUCCESS: i32 = 0;
    pub const HEADER_ERROR: i32 = 19;
    pub const BODY_ERROR: i32 = 20;
    pub const SUBSCRIBE_ERROR: i32 = 25;
    pub const ACL_ERROR: i32 = 38;
}

/// Outcome code taxonomy.
///
/// `HeaderError`, `BodyError` and `AclError` are decided before the registry
/// is touched. `SubscribeError` is only produced after a registry commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetCode {
    Success,
    HeaderError,
    BodyError,
    AclError,
    SubscribeError,
}

impl RetCode {
    /// Machine-readable numeric code
    pub fn code(self) -> i32 {
        match self {
            RetCode::Success => codes::SUCCESS,
            RetCode::HeaderError => codes::HEADER_ERROR,
            RetCode::BodyError => codes::BODY_ERROR,
            RetCode::AclError => codes::ACL_ERROR,
            RetCode::SubscribeError => codes::SUBSCRIBE_ERROR,
        }
    }

    /// Default human-readable message
    pub fn message(self) -> &'static str {
        match self {
            RetCode::Success => "success",
            RetCode::HeaderError => "eventMesh protocol[header] err, ",
            RetCode::BodyError => "eventMesh protocol[body] err, ",
            RetCode::AclError => "eventMesh acl err, ",
            RetCode::SubscribeError => "eventMesh subscribe err, ",
        }
    }

    /// Look up a code by its numeric value
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            codes::SUCCESS => Some(RetCode::Success),
            codes::HEADER_ERROR => Some(RetCode::HeaderError),
            codes::BODY_ERROR => Some(RetCode::BodyError),
            codes::ACL_ERROR => Some(RetCode::AclError),
            codes::SUBSCRIBE_ERROR => Some(RetCode::SubscribeError),
            _ => None,
        }
    }

    pub fn is_success(self) -> bool {
        self == RetCode::Success
    }

    /// Every code, in numeric order
    pub const ALL: [RetCode; 5] = [
        RetCode::Success,
        RetCode::HeaderError,
        RetCode::BodyError,
        RetCode::SubscribeError,
        RetCode::AclError,
    ];
}

impl fmt::Display for RetCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RetCode::Success => "SUCCESS",
            RetCode::HeaderError => "HEADER_ERROR",
            RetCode::BodyError => "BODY_ERROR",
            RetCode::AclError => "ACL_ERROR",
            RetCode::SubscribeError => "SUBSCRIBE_ERROR",
        };
        write!(f, "{}({})", name, self.code())
    }
}

/// Gateway-level errors (construction and wiring, never request-scoped)
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] crate::domain::config::ConfigError),

    /// HTTP client for webhook handshakes could not be built
    #[error("http client error: {0}")]
    HttpClient(String),

    /// Shutdown in progress
    #[error("shutdown in progress")]
    ShuttingDown,

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}
