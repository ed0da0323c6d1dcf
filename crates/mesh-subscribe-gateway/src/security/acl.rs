//! Static, in-process ACL.
//!
//! Each rule grants one user (with its password) access to a set of topic
//! patterns for a set of request codes. A pattern is an exact topic name,
//! `*`, or a prefix ending in `*` (`orders.*`).

use crate::domain::types::RequestCode;
use crate::ports::{AclChecker, AclError};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tracing::debug;

/// One grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRule {
    pub username: String,
    pub passwd: String,
    /// Restrict to one subsystem; `None` matches any
    #[serde(default)]
    pub sys: Option<String>,
    pub topics: Vec<String>,
    /// Empty means every request code
    #[serde(default)]
    pub request_codes: Vec<RequestCode>,
}

impl AclRule {
    pub fn new(
        username: impl Into<String>,
        passwd: impl Into<String>,
        topics: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            username: username.into(),
            passwd: passwd.into(),
            sys: None,
            topics: topics.into_iter().map(Into::into).collect(),
            request_codes: Vec::new(),
        }
    }

    pub fn for_sys(mut self, sys: impl Into<String>) -> Self {
        self.sys = Some(sys.into());
        self
    }

    pub fn for_codes(mut self, codes: impl IntoIterator<Item = RequestCode>) -> Self {
        self.request_codes = codes.into_iter().collect();
        self
    }

    fn grants(&self, sys: &str, topic: &str, code: RequestCode) -> bool {
        if self.sys.as_deref().is_some_and(|s| s != sys) {
            return false;
        }
        if !self.request_codes.is_empty() && !self.request_codes.contains(&code) {
            return false;
        }
        self.topics.iter().any(|pattern| topic_matches(pattern, topic))
    }
}

fn topic_matches(pattern: &str, topic: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => topic.starts_with(prefix),
        None => pattern == topic,
    }
}

/// ACL backed by a fixed rule list
#[derive(Debug, Clone, Default)]
pub struct StaticAclChecker {
    rules: Vec<AclRule>,
}

impl StaticAclChecker {
    pub fn new(rules: Vec<AclRule>) -> Self {
        Self { rules }
    }

    pub fn with_rule(mut self, rule: AclRule) -> Self {
        self.rules.push(rule);
        self
    }
}

impl AclChecker for StaticAclChecker {
    fn check_permission(
        &self,
        remote_addr: SocketAddr,
        username: &str,
        passwd: &str,
        sys: &str,
        topic: &str,
        request_code: RequestCode,
    ) -> Result<(), AclError> {
        // Compare every candidate's password so timing does not reveal
        // which usernames exist.
        let mut authenticated = false;
        let mut granted = false;
        for rule in self.rules.iter().filter(|r| r.username == username) {
            if constant_time_compare(passwd, &rule.passwd) {
                authenticated = true;
                granted |= rule.grants(sys, topic, request_code);
            }
        }

        if !authenticated {
            debug!(remote_addr = %remote_addr, username, "ACL authentication failed");
            return Err(AclError::denied(format!(
                "access denied: bad credentials for user [{username}]"
            )));
        }
        if !granted {
            return Err(AclError::denied(format!(
                "access denied: user [{username}] sys [{sys}] may not {request_code} topic [{topic}]"
            )));
        }
        Ok(())
    }
}

/// Constant-time string comparison.
///
/// Lengths are compared in constant time as well; both inputs are padded
/// to the longer length with different bytes.
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    use subtle::ConstantTimeEq;

    let max_len = std::cmp::max(a.len(), b.len());
    let mut a_padded = vec![0u8; max_len];
    let mut b_padded = vec![0xFFu8; max_len];
    a_padded[..a.len()].copy_from_slice(a.as_bytes());
    b_padded[..b.len()].copy_from_slice(b.as_bytes());

    let lengths_equal = a.len().ct_eq(&b.len());
    let contents_equal = a_padded.ct_eq(&b_padded);
    (lengths_equal & contents_equal).into()
}
