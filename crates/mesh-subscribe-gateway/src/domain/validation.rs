//! Structural request validation.
//!
//! Rejects malformed requests at the gate, before any ACL lookup, network
//! call or registry access. Everything here is pure.

use crate::domain::outcome::{Outcome, Rejection};
use crate::domain::types::{
    parse_pid, SubscribeRequestBody, SubscribeRequestHeader, UnsubscribeRequestBody,
};

/// Upper bound on topics in one request
pub const DEFAULT_MAX_TOPICS: usize = 100;

/// Header and body checks for subscribe/unsubscribe requests
#[derive(Debug, Clone, Copy)]
pub struct RequestValidator {
    max_topics: usize,
}

impl Default for RequestValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TOPICS)
    }
}

impl RequestValidator {
    pub fn new(max_topics: usize) -> Self {
        Self { max_topics }
    }

    /// idc, pid and sys must be present and non-blank; pid must be numeric.
    pub fn validate_header(&self, header: &SubscribeRequestHeader) -> Outcome<()> {
        if is_blank(&header.idc) {
            return Outcome::Rejected(Rejection::header("idc is blank"));
        }
        if is_blank(&header.pid) {
            return Outcome::Rejected(Rejection::header("pid is blank"));
        }
        if let Err(e) = parse_pid(&header.pid) {
            return Outcome::Rejected(Rejection::header(e.to_string()));
        }
        if is_blank(&header.sys) {
            return Outcome::Rejected(Rejection::header("sys is blank"));
        }
        Outcome::Accepted(())
    }

    /// url non-blank, at least one topic, consumerGroup non-blank.
    pub fn validate_body(&self, body: &SubscribeRequestBody) -> Outcome<()> {
        if is_blank(&body.url) {
            return Outcome::Rejected(Rejection::body("url is blank"));
        }
        if body.topics.is_empty() {
            return Outcome::Rejected(Rejection::body("topics is empty"));
        }
        if is_blank(&body.consumer_group) {
            return Outcome::Rejected(Rejection::body("consumerGroup is blank"));
        }
        if let Some(item) = body.topics.iter().find(|item| is_blank(&item.topic)) {
            return Outcome::Rejected(Rejection::body(format!(
                "topic name is blank (mode {:?})",
                item.mode
            )));
        }
        self.check_topic_count(body.topics.len())
    }

    /// consumerGroup non-blank and at least one topic. The url is optional.
    pub fn validate_unsubscribe_body(&self, body: &UnsubscribeRequestBody) -> Outcome<()> {
        if body.topics.is_empty() {
            return Outcome::Rejected(Rejection::body("topics is empty"));
        }
        if is_blank(&body.consumer_group) {
            return Outcome::Rejected(Rejection::body("consumerGroup is blank"));
        }
        if body.topics.iter().any(|topic| is_blank(topic)) {
            return Outcome::Rejected(Rejection::body("topic name is blank"));
        }
        self.check_topic_count(body.topics.len())
    }

    fn check_topic_count(&self, count: usize) -> Outcome<()> {
        if count > self.max_topics {
            return Outcome::Rejected(Rejection::body(format!(
                "{} topics exceeds limit {}",
                count, self.max_topics
            )));
        }
        Outcome::Accepted(())
    }
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}
