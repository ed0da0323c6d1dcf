//! Uniform stage result.
//!
//! Each pipeline stage yields an [`Outcome`]. Stages are chained through
//! [`Outcome::into_result`] so the `?` operator short-circuits to the
//! response assembler on the first rejection.

use crate::domain::error::RetCode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A typed rejection: return code plus human-readable message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub code: RetCode,
    pub message: String,
}

impl Rejection {
    pub fn new(code: RetCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Header fields missing or malformed
    pub fn header(details: impl fmt::Display) -> Self {
        Self::new(
            RetCode::HeaderError,
            format!("{}{}", RetCode::HeaderError.message(), details),
        )
    }

    /// Body malformed, or the webhook target was refused
    pub fn body(details: impl fmt::Display) -> Self {
        Self::new(
            RetCode::BodyError,
            format!("{}{}", RetCode::BodyError.message(), details),
        )
    }

    /// Caller lacks permission; the collaborator's reason is passed through
    pub fn acl(reason: impl Into<String>) -> Self {
        Self::new(RetCode::AclError, reason)
    }

    /// Post-commit failure with a bounded diagnostic
    pub fn subscribe(diagnostic: impl fmt::Display) -> Self {
        Self::new(
            RetCode::SubscribeError,
            format!("{}{}", RetCode::SubscribeError.message(), diagnostic),
        )
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for Rejection {}

/// Result of a pipeline stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Accepted(T),
    Rejected(Rejection),
}

impl<T> Outcome<T> {
    pub fn rejected(code: RetCode, message: impl Into<String>) -> Self {
        Outcome::Rejected(Rejection::new(code, message))
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Outcome::Accepted(_))
    }

    /// The rejection code, if any
    pub fn code(&self) -> RetCode {
        match self {
            Outcome::Accepted(_) => RetCode::Success,
            Outcome::Rejected(rejection) => rejection.code,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Accepted(value) => Outcome::Accepted(f(value)),
            Outcome::Rejected(rejection) => Outcome::Rejected(rejection),
        }
    }

    pub fn and_then<U>(self, f: impl FnOnce(T) -> Outcome<U>) -> Outcome<U> {
        match self {
            Outcome::Accepted(value) => f(value),
            Outcome::Rejected(rejection) => Outcome::Rejected(rejection),
        }
    }

    pub fn into_result(self) -> Result<T, Rejection> {
        match self {
            Outcome::Accepted(value) => Ok(value),
            Outcome::Rejected(rejection) => Err(rejection),
        }
    }
}

impl<T> From<Result<T, Rejection>> for Outcome<T> {
    fn from(result: Result<T, Rejection>) -> Self {
        match result {
            Ok(value) => Outcome::Accepted(value),
            Err(rejection) => Outcome::Rejected(rejection),
        }
    }
}
