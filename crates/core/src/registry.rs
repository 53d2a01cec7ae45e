use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime};

use crate::instance::{Instance, InstanceStatus, ValidationError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceEntry {
    pub instance: Instance,
    pub status: InstanceStatus,
    pub last_latency: Option<Duration>,
    pub online_since: Option<SystemTime>,
    pub last_error: Option<String>,
}

impl InstanceEntry {
    fn offline(instance: Instance) -> Self {
        Self {
            instance,
            status: InstanceStatus::Offline,
            last_latency: None,
            online_since: None,
            last_error: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.instance.connection_name
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.status == InstanceStatus::Online
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
    Unchanged,
}

/// Shared table of configured instances keyed by connection name.
///
/// Cloning is cheap and every clone observes the same table.
#[derive(Debug, Clone, Default)]
pub struct InstanceRegistry {
    entries: Arc<RwLock<HashMap<String, InstanceEntry>>>,
}

impl InstanceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the record for `instance.connection_name`.
    ///
    /// Replacing a record with a different engine or DSN resets it to offline;
    /// an identical record keeps its connectivity state.
    pub fn upsert(&self, instance: Instance) -> Result<UpsertOutcome, ValidationError> {
        instance.validate()?;
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        match entries.get_mut(&instance.connection_name) {
            Some(existing) if existing.instance == instance => Ok(UpsertOutcome::Unchanged),
            Some(existing)
                if existing.instance.dbms == instance.dbms && existing.instance.dsn == instance.dsn =>
            {
                existing.instance = instance;
                Ok(UpsertOutcome::Replaced)
            }
            Some(existing) => {
                *existing = InstanceEntry::offline(instance);
                Ok(UpsertOutcome::Replaced)
            }
            None => {
                entries.insert(
                    instance.connection_name.clone(),
                    InstanceEntry::offline(instance),
                );
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    /// All entries, sorted by connection name.
    #[must_use]
    pub fn list(&self) -> Vec<InstanceEntry> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut listed = entries.values().cloned().collect::<Vec<_>>();
        listed.sort_unstable_by(|left, right| left.name().cmp(right.name()));
        listed
    }

    #[must_use]
    pub fn instances(&self) -> Vec<Instance> {
        self.list().into_iter().map(|entry| entry.instance).collect()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<InstanceEntry> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<InstanceEntry> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn online_names(&self) -> Vec<String> {
        self.names_with_status(InstanceStatus::Online)
    }

    #[must_use]
    pub fn offline_names(&self) -> Vec<String> {
        self.names_with_status(InstanceStatus::Offline)
    }

    #[must_use]
    pub fn online_count(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.values().filter(|entry| entry.is_online()).count()
    }

    fn names_with_status(&self, status: InstanceStatus) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut names = entries
            .values()
            .filter(|entry| entry.status == status)
            .map(|entry| entry.name().to_string())
            .collect::<Vec<_>>();
        names.sort_unstable();
        names
    }

    // Status is written only by the connection manager.

    pub(crate) fn mark_online(&self, name: &str, latency: Duration) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = entries.get_mut(name) else {
            return false;
        };
        if entry.status == InstanceStatus::Offline {
            entry.online_since = Some(SystemTime::now());
        }
        entry.status = InstanceStatus::Online;
        entry.last_latency = Some(latency);
        entry.last_error = None;
        true
    }

    pub(crate) fn mark_offline(&self, name: &str, reason: Option<String>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get_mut(name) {
            entry.status = InstanceStatus::Offline;
            entry.online_since = None;
            entry.last_latency = None;
            if reason.is_some() {
                entry.last_error = reason;
            }
        }
    }
}
