use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime};

use thiserror::Error;

use crate::metric::{MetricKind, MetricRow};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("fetch timed out after {}ms", .after.as_millis())]
    Timeout { after: Duration },
    #[error("instance is offline")]
    NotConnected,
    #[error("{0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotKey {
    pub instance: String,
    pub kind: MetricKind,
}

impl SnapshotKey {
    #[must_use]
    pub fn new(instance: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            instance: instance.into(),
            kind,
        }
    }
}

/// Latest result for one (instance, metric) pair.
///
/// `rows` and `fetched_at` describe the last successful fetch; a failed
/// attempt only sets `fetch_error` and `attempted_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSnapshot {
    pub instance_name: String,
    pub kind: MetricKind,
    pub rows: Arc<Vec<MetricRow>>,
    pub fetched_at: Option<SystemTime>,
    pub attempted_at: SystemTime,
    pub fetch_error: Option<FetchError>,
}

impl MetricSnapshot {
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.fetch_error.is_some()
    }
}

/// Concurrent map of the latest snapshot per (instance, metric).
///
/// Snapshots are immutable once published; writers swap a whole `Arc`, so a
/// reader holds either the previous snapshot or the new one.
#[derive(Debug, Clone, Default)]
pub struct MetricSnapshotStore {
    snapshots: Arc<RwLock<HashMap<SnapshotKey, Arc<MetricSnapshot>>>>,
}

impl MetricSnapshotStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, instance: &str, kind: MetricKind) -> Option<Arc<MetricSnapshot>> {
        let snapshots = self.snapshots.read().unwrap_or_else(PoisonError::into_inner);
        snapshots
            .get(&SnapshotKey::new(instance, kind))
            .map(Arc::clone)
    }

    /// Every known snapshot for `instance`, ordered by metric kind.
    #[must_use]
    pub fn get_all(&self, instance: &str) -> Vec<Arc<MetricSnapshot>> {
        let snapshots = self.snapshots.read().unwrap_or_else(PoisonError::into_inner);
        let mut found = snapshots
            .iter()
            .filter(|(key, _)| key.instance == instance)
            .map(|(_, snapshot)| Arc::clone(snapshot))
            .collect::<Vec<_>>();
        found.sort_unstable_by_key(|snapshot| snapshot.kind);
        found
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn publish_rows(
        &self,
        instance: &str,
        kind: MetricKind,
        rows: Vec<MetricRow>,
        at: SystemTime,
    ) {
        let snapshot = Arc::new(MetricSnapshot {
            instance_name: instance.to_string(),
            kind,
            rows: Arc::new(rows),
            fetched_at: Some(at),
            attempted_at: at,
            fetch_error: None,
        });
        self.swap(SnapshotKey::new(instance, kind), snapshot);
    }

    pub(crate) fn publish_error(
        &self,
        instance: &str,
        kind: MetricKind,
        error: FetchError,
        at: SystemTime,
    ) {
        let key = SnapshotKey::new(instance, kind);
        let mut snapshots = self.snapshots.write().unwrap_or_else(PoisonError::into_inner);
        let (rows, fetched_at) = snapshots.get(&key).map_or_else(
            || (Arc::new(Vec::new()), None),
            |previous| (Arc::clone(&previous.rows), previous.fetched_at),
        );
        snapshots.insert(
            key,
            Arc::new(MetricSnapshot {
                instance_name: instance.to_string(),
                kind,
                rows,
                fetched_at,
                attempted_at: at,
                fetch_error: Some(error),
            }),
        );
    }

    /// Flags a fresh snapshot as disconnected, keeping its rows. Returns
    /// false when there is no snapshot or it already carries an error.
    pub(crate) fn mark_disconnected(&self, instance: &str, kind: MetricKind, at: SystemTime) -> bool {
        let key = SnapshotKey::new(instance, kind);
        let mut snapshots = self.snapshots.write().unwrap_or_else(PoisonError::into_inner);
        let Some(previous) = snapshots.get(&key) else {
            return false;
        };
        if previous.fetch_error.is_some() {
            return false;
        }
        let stale = MetricSnapshot {
            attempted_at: at,
            fetch_error: Some(FetchError::NotConnected),
            ..previous.as_ref().clone()
        };
        snapshots.insert(key, Arc::new(stale));
        true
    }

    pub(crate) fn remove_instance(&self, instance: &str) -> usize {
        let mut snapshots = self.snapshots.write().unwrap_or_else(PoisonError::into_inner);
        let before = snapshots.len();
        snapshots.retain(|key, _| key.instance != instance);
        before - snapshots.len()
    }

    fn swap(&self, key: SnapshotKey, snapshot: Arc<MetricSnapshot>) {
        let mut snapshots = self.snapshots.write().unwrap_or_else(PoisonError::into_inner);
        snapshots.insert(key, snapshot);
    }
}
