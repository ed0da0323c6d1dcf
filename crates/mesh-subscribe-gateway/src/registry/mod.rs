//! Subscription registry: client → consumer group → topics.
//!
//! The registry is one owned structure behind one lock. Every mutation
//! clones the affected group, applies the change to the staged copy and
//! swaps it in before the lock is released, so readers only ever see fully
//! applied states. Callers that must act on the committed state before any
//! other writer can interleave (the consumer-manager notification) pass a
//! closure to the `*_with` methods; it runs under the lock.
//!
//! No reference into the registry escapes: all reads return owned
//! [`GroupSnapshot`]s.

pub mod state;
pub mod store;

pub use state::{ConsumerGroupState, GroupChange, GroupSnapshot, MemberSnapshot, TopicRoute};
pub use store::{InMemoryRegistryStore, RegistryStore, StoreError};

use crate::domain::types::{ClientInfo, SubscriptionItem};
use crate::ports::{SystemTimeSource, TimeSource};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct RegistryInner {
    groups: HashMap<String, ConsumerGroupState>,
    /// Reverse index: client → groups it belongs to
    client_groups: HashMap<ClientInfo, BTreeSet<String>>,
}

impl RegistryInner {
    fn staged(&self, group: &str) -> ConsumerGroupState {
        self.groups
            .get(group)
            .cloned()
            .unwrap_or_else(|| ConsumerGroupState::new(group))
    }

    /// Swap a staged group in and bring the reverse index in step.
    fn commit(&mut self, staged: ConsumerGroupState) -> GroupChange {
        let name = staged.name().to_string();

        let departed: Vec<ClientInfo> = self
            .groups
            .get(&name)
            .map(|previous| {
                previous
                    .members()
                    .filter(|(client, _)| !staged.has_member(client))
                    .map(|(client, _)| client.clone())
                    .collect()
            })
            .unwrap_or_default();
        for client in &departed {
            self.unlink(client, &name);
        }
        for (client, _) in staged.members() {
            self.client_groups
                .entry(client.clone())
                .or_default()
                .insert(name.clone());
        }

        if staged.is_empty() {
            self.groups.remove(&name);
            GroupChange::Removed { group: name }
        } else {
            let snapshot = staged.snapshot();
            self.groups.insert(name, staged);
            GroupChange::Updated(snapshot)
        }
    }

    fn unlink(&mut self, client: &ClientInfo, group: &str) {
        if let Some(groups) = self.client_groups.get_mut(client) {
            groups.remove(group);
            if groups.is_empty() {
                self.client_groups.remove(client);
            }
        }
    }
}

/// Authoritative in-memory subscription state
pub struct SubscriptionRegistry {
    inner: Mutex<RegistryInner>,
    store: Arc<dyn RegistryStore>,
    time: Arc<dyn TimeSource>,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    /// Empty registry with an in-memory store and the system clock
    pub fn new() -> Self {
        Self::with_parts(
            Arc::new(InMemoryRegistryStore::new()),
            Arc::new(SystemTimeSource),
        )
    }

    pub fn with_parts(store: Arc<dyn RegistryStore>, time: Arc<dyn TimeSource>) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            store,
            time,
        }
    }

    /// Rebuild from whatever `store` holds. Members are stamped as seen now.
    pub fn restore(
        store: Arc<dyn RegistryStore>,
        time: Arc<dyn TimeSource>,
    ) -> Result<Self, StoreError> {
        let snapshots = store.load()?;
        let registry = Self::with_parts(store, time);
        let now = registry.time.now();
        {
            let mut inner = registry.inner.lock();
            for snapshot in &snapshots {
                let state = ConsumerGroupState::from_snapshot(snapshot, now);
                if state.is_empty() {
                    continue;
                }
                inner.commit(state);
            }
            info!(groups = inner.groups.len(), "Restored subscription registry");
        }
        Ok(registry)
    }

    /// Add `client` to `group` (idempotent), overwrite its URL and merge
    /// `topics` into its subscription. Other members are never affected.
    /// An empty `topics` leaves the registry unchanged.
    pub fn register_client(
        &self,
        client: &ClientInfo,
        group: &str,
        topics: &[SubscriptionItem],
        url: &str,
    ) -> GroupChange {
        self.subscribe(client, group, url, topics)
    }

    /// Replace the member's topic list and recompute the group union.
    /// An empty list removes the member.
    pub fn update_subscription(
        &self,
        client: &ClientInfo,
        group: &str,
        url: &str,
        topics: &[SubscriptionItem],
    ) -> GroupChange {
        let now = self.time.now();
        let mut inner = self.inner.lock();
        let mut staged = inner.staged(group);
        staged.set_member_topics(client, url, topics, now);
        staged.recompute_topics();
        let change = inner.commit(staged);
        self.persist(&change);
        change
    }

    /// Register and recompute atomically
    pub fn subscribe(
        &self,
        client: &ClientInfo,
        group: &str,
        url: &str,
        topics: &[SubscriptionItem],
    ) -> GroupChange {
        self.subscribe_with(client, group, url, topics, |_| ()).0
    }

    /// Register and recompute atomically, then run `on_commit` on the
    /// resulting change before the lock is released.
    pub fn subscribe_with<R>(
        &self,
        client: &ClientInfo,
        group: &str,
        url: &str,
        topics: &[SubscriptionItem],
        on_commit: impl FnOnce(&GroupChange) -> R,
    ) -> (GroupChange, R) {
        let now = self.time.now();
        let mut inner = self.inner.lock();

        let mut staged = inner.staged(group);
        let change = if staged.register(client, url, topics, now) {
            staged.recompute_topics();
            let change = inner.commit(staged);
            self.persist(&change);
            change
        } else {
            GroupChange::Unchanged {
                group: group.to_string(),
            }
        };
        if let Some(snapshot) = change.snapshot() {
            debug!(
                consumer_group = %group,
                client = %client,
                topics = snapshot.topics.len(),
                members = snapshot.members.len(),
                "Subscription committed"
            );
        }

        let result = on_commit(&change);
        (change, result)
    }

    pub fn unsubscribe(&self, client: &ClientInfo, group: &str, topics: &[String]) -> GroupChange {
        self.unsubscribe_with(client, group, topics, |_| ()).0
    }

    /// Drop `topics` from the member, prune it when it has none left and
    /// prune the group when it has no members left. `on_commit` runs under
    /// the lock.
    pub fn unsubscribe_with<R>(
        &self,
        client: &ClientInfo,
        group: &str,
        topics: &[String],
        on_commit: impl FnOnce(&GroupChange) -> R,
    ) -> (GroupChange, R) {
        let mut inner = self.inner.lock();

        let change = match inner.groups.get(group) {
            Some(current) if current.has_member(client) => {
                let mut staged = current.clone();
                if staged.remove_member_topics(client, topics) {
                    staged.recompute_topics();
                    let change = inner.commit(staged);
                    self.persist(&change);
                    change
                } else {
                    GroupChange::Unchanged {
                        group: group.to_string(),
                    }
                }
            }
            _ => GroupChange::Unchanged {
                group: group.to_string(),
            },
        };

        let result = on_commit(&change);
        (change, result)
    }

    /// Remove the client from every group it belongs to
    pub fn remove_client(&self, client: &ClientInfo) -> Vec<GroupChange> {
        self.remove_client_with(client, |_| {})
    }

    pub fn remove_client_with(
        &self,
        client: &ClientInfo,
        mut on_change: impl FnMut(&GroupChange),
    ) -> Vec<GroupChange> {
        let mut inner = self.inner.lock();
        let groups = inner.client_groups.get(client).cloned().unwrap_or_default();

        let mut changes = Vec::with_capacity(groups.len());
        for group in groups {
            let mut staged = inner.staged(&group);
            if !staged.remove_member(client) {
                continue;
            }
            staged.recompute_topics();
            let change = inner.commit(staged);
            self.persist(&change);
            on_change(&change);
            changes.push(change);
        }
        if !changes.is_empty() {
            debug!(client = %client, groups = changes.len(), "Client removed");
        }
        changes
    }

    /// Refresh `last_seen` on every membership of `client`.
    /// Returns the number of groups touched.
    pub fn heartbeat(&self, client: &ClientInfo) -> usize {
        let now = self.time.now();
        let mut inner = self.inner.lock();
        let groups = inner.client_groups.get(client).cloned().unwrap_or_default();
        groups
            .iter()
            .filter(|group| {
                inner
                    .groups
                    .get_mut(group.as_str())
                    .is_some_and(|state| state.touch(client, now))
            })
            .count()
    }

    pub fn reap_idle(&self, max_idle: Duration) -> Vec<GroupChange> {
        self.reap_idle_with(max_idle, |_| {})
    }

    /// Remove members whose `last_seen` is older than `max_idle`
    pub fn reap_idle_with(
        &self,
        max_idle: Duration,
        mut on_change: impl FnMut(&GroupChange),
    ) -> Vec<GroupChange> {
        let now = self.time.now();
        let max_idle = max_idle.as_secs();
        let mut inner = self.inner.lock();

        let mut stale: Vec<(String, Vec<ClientInfo>)> = inner
            .groups
            .values()
            .filter_map(|state| {
                let idle: Vec<ClientInfo> = state
                    .members()
                    .filter(|(_, member)| now.saturating_sub(member.last_seen) > max_idle)
                    .map(|(client, _)| client.clone())
                    .collect();
                (!idle.is_empty()).then(|| (state.name().to_string(), idle))
            })
            .collect();
        stale.sort_by(|a, b| a.0.cmp(&b.0));

        let mut changes = Vec::with_capacity(stale.len());
        for (group, clients) in stale {
            let mut staged = inner.staged(&group);
            for client in &clients {
                staged.remove_member(client);
            }
            staged.recompute_topics();
            let change = inner.commit(staged);
            self.persist(&change);
            info!(
                consumer_group = %group,
                reaped = clients.len(),
                "Reaped idle subscribers"
            );
            on_change(&change);
            changes.push(change);
        }
        changes
    }

    /// Consistent snapshot of one group
    pub fn group_state(&self, group: &str) -> Option<GroupSnapshot> {
        self.inner.lock().groups.get(group).map(|s| s.snapshot())
    }

    /// Group names, sorted
    pub fn groups(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().groups.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn client_groups(&self, client: &ClientInfo) -> BTreeSet<String> {
        self.inner
            .lock()
            .client_groups
            .get(client)
            .cloned()
            .unwrap_or_default()
    }

    pub fn group_count(&self) -> usize {
        self.inner.lock().groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().groups.is_empty()
    }

    fn persist(&self, change: &GroupChange) {
        let result = match change {
            GroupChange::Updated(snapshot) => self.store.save(snapshot),
            GroupChange::Removed { group } => self.store.remove(group),
            GroupChange::Unchanged { .. } => Ok(()),
        };
        if let Err(e) = result {
            warn!(consumer_group = %change.group(), error = %e, "Failed to persist group snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::SubscriptionMode;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct ManualClock(AtomicU64);

    impl ManualClock {
        fn at(secs: u64) -> Arc<Self> {
            Arc::new(Self(AtomicU64::new(secs)))
        }

        fn advance(&self, secs: u64) {
            self.0.fetch_add(secs, Ordering::SeqCst);
        }
    }

    impl TimeSource for ManualClock {
        fn now(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn client(pid: u64) -> ClientInfo {
        ClientInfo::new("PRD", "idc1", "sys1", "10.1.1.1", pid)
    }

    fn items(topics: &[&str]) -> Vec<SubscriptionItem> {
        topics
            .iter()
            .map(|t| SubscriptionItem::new(*t, SubscriptionMode::Clustering))
            .collect()
    }

    fn names(snapshot: &GroupSnapshot) -> Vec<&str> {
        snapshot.topic_names().into_iter().collect()
    }

    #[test]
    fn test_union_and_departure() {
        let registry = SubscriptionRegistry::new();
        let (a, b) = (client(1), client(2));

        registry.subscribe(&a, "g", "http://a", &items(&["t1", "t2"]));
        let change = registry.subscribe(&b, "g", "http://b", &items(&["t2", "t3"]));
        assert_eq!(names(change.snapshot().unwrap()), vec!["t1", "t2", "t3"]);

        let changes = registry.remove_client(&a);
        assert_eq!(changes.len(), 1);
        let snapshot = registry.group_state("g").unwrap();
        assert_eq!(names(&snapshot), vec!["t2", "t3"]);
        assert!(!snapshot.has_member(&a));
    }

    #[test]
    fn test_last_member_prunes_group() {
        let registry = SubscriptionRegistry::new();
        let a = client(1);
        registry.subscribe(&a, "g", "http://a", &items(&["t1"]));

        let change = registry.unsubscribe(&a, "g", &["t1".to_string()]);
        assert_eq!(change, GroupChange::Removed { group: "g".into() });
        assert!(registry.group_state("g").is_none());
        assert!(registry.client_groups(&a).is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unsubscribe_unknown_is_unchanged() {
        let registry = SubscriptionRegistry::new();
        let change = registry.unsubscribe(&client(1), "g", &["t1".to_string()]);
        assert!(matches!(change, GroupChange::Unchanged { .. }));
    }

    #[test]
    fn test_update_subscription_replaces_member_topics() {
        let registry = SubscriptionRegistry::new();
        let a = client(1);
        registry.subscribe(&a, "g", "http://a", &items(&["t1", "t2"]));

        let change = registry.update_subscription(&a, "g", "http://a", &items(&["t3"]));
        let snapshot = change.snapshot().unwrap();
        assert_eq!(names(snapshot), vec!["t3"]);

        let change = registry.update_subscription(&a, "g", "http://a", &[]);
        assert!(matches!(change, GroupChange::Removed { .. }));
    }

    #[test]
    fn test_register_client_overwrites_url_only_for_that_client() {
        let registry = SubscriptionRegistry::new();
        let (a, b) = (client(1), client(2));
        registry.register_client(&a, "g", &items(&["t1"]), "http://a");
        registry.register_client(&b, "g", &items(&["t1"]), "http://b");
        let change = registry.register_client(&a, "g", &items(&["t1"]), "http://a2");
        let snapshot = change.snapshot().unwrap();

        assert_eq!(snapshot.member(&a).unwrap().url, "http://a2");
        assert_eq!(snapshot.member(&b).unwrap().url, "http://b");
    }

    #[test]
    fn test_subscribe_with_runs_closure_on_committed_state() {
        let registry = SubscriptionRegistry::new();
        let (_, seen) = registry.subscribe_with(&client(1), "g", "http://a", &items(&["t1"]), |c| {
            c.snapshot().map(|s| s.members.len())
        });
        assert_eq!(seen, Some(1));
    }

    #[test]
    fn test_register_without_topics_is_noop() {
        let registry = SubscriptionRegistry::new();
        let (a, b) = (client(1), client(2));

        let change = registry.register_client(&a, "g", &[], "http://a");
        assert_eq!(change, GroupChange::Unchanged { group: "g".into() });
        assert!(registry.group_state("g").is_none());
        assert!(registry.client_groups(&a).is_empty());

        registry.subscribe(&b, "g", "http://b", &items(&["t1"]));
        let (change, seen) = registry.subscribe_with(&a, "g", "http://a", &[], |c| c.clone());
        assert_eq!(seen, change);
        assert!(matches!(change, GroupChange::Unchanged { .. }));
        let snapshot = registry.group_state("g").unwrap();
        assert!(!snapshot.has_member(&a));
        assert!(snapshot.members.iter().all(|m| !m.topics.is_empty()));
    }

    #[test]
    fn test_reap_idle() {
        let clock = ManualClock::at(1_000);
        let registry =
            SubscriptionRegistry::with_parts(Arc::new(InMemoryRegistryStore::new()), clock.clone());
        let (a, b) = (client(1), client(2));
        registry.subscribe(&a, "g", "http://a", &items(&["t1"]));
        clock.advance(50);
        registry.subscribe(&b, "g", "http://b", &items(&["t2"]));
        clock.advance(20);

        // a idle 70s, b idle 20s
        let mut notified = Vec::new();
        let changes = registry.reap_idle_with(Duration::from_secs(60), |c| {
            notified.push(c.group().to_string())
        });
        assert_eq!(changes.len(), 1);
        assert_eq!(notified, vec!["g"]);
        let snapshot = registry.group_state("g").unwrap();
        assert_eq!(names(&snapshot), vec!["t2"]);
    }

    #[test]
    fn test_heartbeat_keeps_member_alive() {
        let clock = ManualClock::at(0);
        let registry =
            SubscriptionRegistry::with_parts(Arc::new(InMemoryRegistryStore::new()), clock.clone());
        let a = client(1);
        registry.subscribe(&a, "g1", "http://a", &items(&["t1"]));
        registry.subscribe(&a, "g2", "http://a", &items(&["t1"]));
        clock.advance(100);
        assert_eq!(registry.heartbeat(&a), 2);
        clock.advance(10);

        assert!(registry.reap_idle(Duration::from_secs(60)).is_empty());
        assert_eq!(registry.group_count(), 2);
    }

    #[test]
    fn test_commits_are_persisted_and_restorable() {
        let store = Arc::new(InMemoryRegistryStore::new());
        let clock = ManualClock::at(5);
        let registry = SubscriptionRegistry::with_parts(store.clone(), clock.clone());
        registry.subscribe(&client(1), "g1", "http://a", &items(&["t1"]));
        registry.subscribe(&client(2), "g2", "http://b", &items(&["t2"]));
        registry.remove_client(&client(2));

        assert!(store.get("g1").is_some());
        assert!(store.get("g2").is_none());

        let restored = SubscriptionRegistry::restore(store, clock).unwrap();
        assert_eq!(restored.groups(), vec!["g1".to_string()]);
        assert_eq!(restored.group_state("g1"), registry.group_state("g1"));
        assert!(restored.client_groups(&client(1)).contains("g1"));
    }

    #[test]
    fn test_concurrent_disjoint_subscribers() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let handles: Vec<_> = (0..16u64)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let topic = format!("t{i}");
                    registry.subscribe(&client(i), "g", "http://x", &items(&[topic.as_str()]));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = registry.group_state("g").unwrap();
        assert_eq!(snapshot.topics.len(), 16);
        assert_eq!(snapshot.members.len(), 16);
    }

    fn topic_set() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec("t[0-9]", 1..6)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_group_topics_are_union_of_members(
            subs in prop::collection::vec((0u64..5, topic_set()), 1..12),
        ) {
            let registry = SubscriptionRegistry::new();
            for (pid, topics) in &subs {
                let refs: Vec<&str> = topics.iter().map(String::as_str).collect();
                registry.subscribe(&client(*pid), "g", "http://x", &items(&refs));
            }

            let snapshot = registry.group_state("g").unwrap();
            let union: BTreeSet<&str> = snapshot
                .members
                .iter()
                .flat_map(|m| m.topics.iter().map(|i| i.topic.as_str()))
                .collect();
            prop_assert_eq!(snapshot.topic_names(), union);
            prop_assert!(!snapshot.members.is_empty());
        }

        #[test]
        fn prop_subscribe_is_idempotent(pid in 0u64..100, topics in topic_set()) {
            let registry = SubscriptionRegistry::new();
            let refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            let first = registry.subscribe(&client(pid), "g", "http://x", &items(&refs));
            let second = registry.subscribe(&client(pid), "g", "http://x", &items(&refs));
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_removing_everyone_empties_registry(pids in prop::collection::vec(0u64..20, 1..10)) {
            let registry = SubscriptionRegistry::new();
            for pid in &pids {
                registry.subscribe(&client(*pid), "g", "http://x", &items(&["t1"]));
            }
            for pid in &pids {
                registry.remove_client(&client(*pid));
            }
            prop_assert!(registry.is_empty());
        }
    }
}
