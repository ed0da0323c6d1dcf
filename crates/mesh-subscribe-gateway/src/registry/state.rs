//! Consumer group state and the snapshots handed out of the registry.

use crate::domain::types::{ClientInfo, SubscriptionItem};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One client's membership in a group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSubscription {
    /// Push URL; last write wins
    pub url: String,
    /// Topics keyed by name
    pub topics: BTreeMap<String, SubscriptionItem>,
    /// Unix seconds of the last subscribe or heartbeat
    pub last_seen: u64,
}

impl MemberSubscription {
    fn new(url: String, now: u64) -> Self {
        Self {
            url,
            topics: BTreeMap::new(),
            last_seen: now,
        }
    }
}

/// Live state of one consumer group.
///
/// Invariants held between mutations:
/// - `members` is never empty for a group stored in the registry
/// - a topic name is in `topics` iff some member subscribes to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerGroupState {
    name: String,
    topics: BTreeMap<String, SubscriptionItem>,
    members: BTreeMap<ClientInfo, MemberSubscription>,
}

impl ConsumerGroupState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topics: BTreeMap::new(),
            members: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn has_member(&self, client: &ClientInfo) -> bool {
        self.members.contains_key(client)
    }

    pub fn member(&self, client: &ClientInfo) -> Option<&MemberSubscription> {
        self.members.get(client)
    }

    pub fn members(&self) -> impl Iterator<Item = (&ClientInfo, &MemberSubscription)> {
        self.members.iter()
    }

    /// Add the client (or refresh it), overwrite its URL and merge `topics`
    /// into its topic set. Other members are untouched.
    ///
    /// An empty `topics` is ignored so no member ever exists without topics.
    /// Returns whether anything was applied.
    pub fn register(
        &mut self,
        client: &ClientInfo,
        url: &str,
        topics: &[SubscriptionItem],
        now: u64,
    ) -> bool {
        if topics.is_empty() {
            return false;
        }
        let member = self
            .members
            .entry(client.clone())
            .or_insert_with(|| MemberSubscription::new(url.to_string(), now));
        member.url = url.to_string();
        member.last_seen = now;
        for item in topics {
            member.topics.insert(item.topic.clone(), item.clone());
        }
        true
    }

    /// Replace the member's topic set with `topics`. An empty list removes
    /// the member.
    pub fn set_member_topics(
        &mut self,
        client: &ClientInfo,
        url: &str,
        topics: &[SubscriptionItem],
        now: u64,
    ) {
        if topics.is_empty() {
            self.members.remove(client);
            return;
        }
        let member = self
            .members
            .entry(client.clone())
            .or_insert_with(|| MemberSubscription::new(url.to_string(), now));
        member.url = url.to_string();
        member.last_seen = now;
        member.topics = topics
            .iter()
            .map(|item| (item.topic.clone(), item.clone()))
            .collect();
    }

    /// Drop the named topics from the member. Returns true if anything changed.
    /// A member left without topics is removed.
    pub fn remove_member_topics(&mut self, client: &ClientInfo, topics: &[String]) -> bool {
        let Some(member) = self.members.get_mut(client) else {
            return false;
        };
        let before = member.topics.len();
        for topic in topics {
            member.topics.remove(topic);
        }
        let changed = member.topics.len() != before;
        if member.topics.is_empty() {
            self.members.remove(client);
        }
        changed
    }

    pub fn remove_member(&mut self, client: &ClientInfo) -> bool {
        self.members.remove(client).is_some()
    }

    pub fn touch(&mut self, client: &ClientInfo, now: u64) -> bool {
        match self.members.get_mut(client) {
            Some(member) => {
                member.last_seen = now;
                true
            }
            None => false,
        }
    }

    /// Recompute the group topic set as the union over all members.
    ///
    /// Only the topic name is a key. A topic already in the group keeps its
    /// existing item; a new topic takes the item of the first member (in
    /// client order) that subscribes to it.
    pub fn recompute_topics(&mut self) {
        let mut union = BTreeMap::new();
        for member in self.members.values() {
            for (name, item) in &member.topics {
                if union.contains_key(name) {
                    continue;
                }
                let kept = self.topics.get(name).unwrap_or(item).clone();
                union.insert(name.clone(), kept);
            }
        }
        self.topics = union;
    }

    /// Rebuild from a persisted snapshot; members are stamped with `now`.
    pub fn from_snapshot(snapshot: &GroupSnapshot, now: u64) -> Self {
        let mut state = Self::new(snapshot.group.clone());
        for member in &snapshot.members {
            state.set_member_topics(&member.client, &member.url, &member.topics, now);
        }
        state.topics = snapshot
            .topics
            .iter()
            .map(|item| (item.topic.clone(), item.clone()))
            .collect();
        state.recompute_topics();
        state
    }

    /// Deterministic, owned copy of the current state
    pub fn snapshot(&self) -> GroupSnapshot {
        let members: Vec<MemberSnapshot> = self
            .members
            .iter()
            .map(|(client, member)| MemberSnapshot {
                client: client.clone(),
                url: member.url.clone(),
                topics: member.topics.values().cloned().collect(),
            })
            .collect();

        let mut routes: BTreeMap<String, TopicRoute> = self
            .topics
            .keys()
            .map(|name| (name.clone(), TopicRoute::default()))
            .collect();
        for member in &members {
            for item in &member.topics {
                if let Some(route) = routes.get_mut(&item.topic) {
                    route
                        .idc_urls
                        .entry(member.client.idc().to_string())
                        .or_default()
                        .insert(member.url.clone());
                }
            }
        }

        GroupSnapshot {
            group: self.name.clone(),
            topics: self.topics.values().cloned().collect(),
            members,
            routes,
        }
    }
}

/// A member as seen in a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSnapshot {
    pub client: ClientInfo,
    pub url: String,
    /// Sorted by topic name
    pub topics: Vec<SubscriptionItem>,
}

/// Push URLs for one topic grouped by IDC
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicRoute {
    pub idc_urls: BTreeMap<String, BTreeSet<String>>,
}

impl TopicRoute {
    /// Every URL regardless of IDC
    pub fn urls(&self) -> BTreeSet<&str> {
        self.idc_urls
            .values()
            .flat_map(|urls| urls.iter().map(String::as_str))
            .collect()
    }
}

/// Consistent, fully-applied view of one consumer group.
///
/// Ordering is deterministic: topics by name, members by client identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub group: String,
    pub topics: Vec<SubscriptionItem>,
    pub members: Vec<MemberSnapshot>,
    /// topic → route
    pub routes: BTreeMap<String, TopicRoute>,
}

impl GroupSnapshot {
    pub fn topic_names(&self) -> BTreeSet<&str> {
        self.topics.iter().map(|item| item.topic.as_str()).collect()
    }

    pub fn member(&self, client: &ClientInfo) -> Option<&MemberSnapshot> {
        self.members.iter().find(|m| &m.client == client)
    }

    pub fn has_member(&self, client: &ClientInfo) -> bool {
        self.member(client).is_some()
    }
}

/// Effect of a mutation on one group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupChange {
    /// Group exists with a new state
    Updated(GroupSnapshot),
    /// Last member left; the group was pruned
    Removed { group: String },
    /// Nothing to do
    Unchanged { group: String },
}

impl GroupChange {
    pub fn group(&self) -> &str {
        match self {
            GroupChange::Updated(snapshot) => &snapshot.group,
            GroupChange::Removed { group } | GroupChange::Unchanged { group } => group,
        }
    }

    pub fn snapshot(&self) -> Option<&GroupSnapshot> {
        match self {
            GroupChange::Updated(snapshot) => Some(snapshot),
            _ => None,
        }
    }
}
