//! Pluggable persistence for committed group snapshots.

use super::state::GroupSnapshot;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Store failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt snapshot for group {0}")]
    Corrupt(String),
}

/// Snapshot persistence.
///
/// Called with the registry lock held, after every commit.
pub trait RegistryStore: Send + Sync {
    fn load(&self) -> Result<Vec<GroupSnapshot>, StoreError>;

    fn save(&self, snapshot: &GroupSnapshot) -> Result<(), StoreError>;

    fn remove(&self, group: &str) -> Result<(), StoreError>;
}

/// Keeps snapshots in memory
#[derive(Debug, Default)]
pub struct InMemoryRegistryStore {
    groups: RwLock<HashMap<String, GroupSnapshot>>,
}

impl InMemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, group: &str) -> Option<GroupSnapshot> {
        self.groups.read().get(group).cloned()
    }

    pub fn len(&self) -> usize {
        self.groups.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.read().is_empty()
    }
}

impl RegistryStore for InMemoryRegistryStore {
    fn load(&self) -> Result<Vec<GroupSnapshot>, StoreError> {
        let mut snapshots: Vec<_> = self.groups.read().values().cloned().collect();
        snapshots.sort_by(|a, b| a.group.cmp(&b.group));
        Ok(snapshots)
    }

    fn save(&self, snapshot: &GroupSnapshot) -> Result<(), StoreError> {
        self.groups
            .write()
            .insert(snapshot.group.clone(), snapshot.clone());
        Ok(())
    }

    fn remove(&self, group: &str) -> Result<(), StoreError> {
        self.groups.write().remove(group);
        Ok(())
    }
}
