use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::join_all;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::instance::Instance;
use crate::registry::InstanceRegistry;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    Authentication,
    Network,
    Unsupported,
    Query,
    Other,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Authentication => "authentication",
            Self::Network => "network",
            Self::Unsupported => "unsupported",
            Self::Query => "query",
            Self::Other => "other",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    kind: BackendErrorKind,
    message: String,
}

impl BackendError {
    #[must_use]
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> BackendErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Client library seam. Handles are cloned out for metric fetches, so they
/// must be cheap shared references (a pool, not a single socket).
#[async_trait]
pub trait ConnectionBackend: Send + Sync + 'static {
    type Connection: Clone + Send + Sync + 'static;

    async fn connect(&self, instance: &Instance) -> Result<Self::Connection, BackendError>;
    async fn ping(&self, connection: &Self::Connection) -> Result<(), BackendError>;
    async fn disconnect(&self, connection: Self::Connection) -> Result<(), BackendError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("instance `{name}` is not registered")]
    UnknownInstance { name: String },
    #[error("instance `{name}` is offline")]
    NotConnected { name: String },
    #[error("connection to `{name}` failed: {reason}")]
    Failed { name: String, reason: String },
    #[error("connection to `{name}` timed out after {}ms", .after.as_millis())]
    Timeout { name: String, after: Duration },
}

impl ConnectionError {
    #[must_use]
    pub fn instance_name(&self) -> &str {
        match self {
            Self::UnknownInstance { name }
            | Self::NotConnected { name }
            | Self::Failed { name, .. }
            | Self::Timeout { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectReport {
    pub name: String,
    pub result: Result<Duration, ConnectionError>,
}

type Slot<C> = Arc<AsyncMutex<Option<C>>>;

/// Owns every live handle. Lifecycle operations on one instance are
/// serialized through that instance's slot lock.
pub struct ConnectionManager<B: ConnectionBackend> {
    backend: B,
    registry: InstanceRegistry,
    slots: Mutex<HashMap<String, Slot<B::Connection>>>,
    timeout: Duration,
}

impl<B: ConnectionBackend> fmt::Debug for ConnectionManager<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("timeout", &self.timeout)
            .field("online", &self.registry.online_count())
            .finish_non_exhaustive()
    }
}

impl<B: ConnectionBackend> ConnectionManager<B> {
    #[must_use]
    pub fn new(backend: B, registry: InstanceRegistry, timeout: Duration) -> Self {
        Self {
            backend,
            registry,
            slots: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[must_use]
    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn slot(&self, name: &str) -> Slot<B::Connection> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(name.to_string()).or_default())
    }

    fn existing_slot(&self, name: &str) -> Option<Slot<B::Connection>> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(name).map(Arc::clone)
    }

    /// Redacts the instance's DSN out of a client message.
    #[must_use]
    pub fn scrub(&self, name: &str, message: &str) -> String {
        self.registry
            .get(name)
            .map_or_else(|| message.to_string(), |entry| entry.instance.dsn.scrub(message))
    }

    /// Opens and authenticates a handle for a registered instance, replacing
    /// any stale handle it still holds.
    pub async fn connect(&self, name: &str) -> Result<Duration, ConnectionError> {
        let entry = self
            .registry
            .get(name)
            .ok_or_else(|| ConnectionError::UnknownInstance {
                name: name.to_string(),
            })?;
        let instance = entry.instance;

        let slot = self.slot(name);
        let mut guard = slot.lock().await;
        if let Some(stale) = guard.take() {
            self.close_quietly(name, stale).await;
        }

        let started_at = Instant::now();
        let attempt = async {
            let handle = self.backend.connect(&instance).await?;
            if let Err(error) = self.backend.ping(&handle).await {
                let _ = self.backend.disconnect(handle).await;
                return Err(error);
            }
            Ok(handle)
        };

        match tokio::time::timeout(self.timeout, attempt).await {
            Ok(Ok(handle)) => {
                let latency = started_at.elapsed();
                if !self.registry.mark_online(name, latency) {
                    self.close_quietly(name, handle).await;
                    return Err(ConnectionError::UnknownInstance {
                        name: name.to_string(),
                    });
                }
                *guard = Some(handle);
                info!(
                    instance = name,
                    dsn = %instance.dsn,
                    latency_ms = latency.as_millis(),
                    "instance online"
                );
                Ok(latency)
            }
            Ok(Err(error)) => {
                let reason = instance.dsn.scrub(error.message());
                warn!(instance = name, kind = %error.kind(), reason = %reason, "connect failed");
                self.registry.mark_offline(name, Some(reason.clone()));
                Err(ConnectionError::Failed {
                    name: name.to_string(),
                    reason,
                })
            }
            Err(_elapsed) => {
                warn!(
                    instance = name,
                    kind = "timeout",
                    timeout_ms = self.timeout.as_millis(),
                    "connect timed out"
                );
                let error = ConnectionError::Timeout {
                    name: name.to_string(),
                    after: self.timeout,
                };
                self.registry.mark_offline(name, Some(error.to_string()));
                Err(error)
            }
        }
    }

    /// Liveness check. A failure drops the handle and marks the instance
    /// offline, as does finding no handle at all.
    pub async fn ping(&self, name: &str) -> Result<Duration, ConnectionError> {
        let not_connected = || {
            self.registry.mark_offline(name, None);
            ConnectionError::NotConnected {
                name: name.to_string(),
            }
        };
        let slot = self.existing_slot(name).ok_or_else(not_connected)?;
        let mut guard = slot.lock().await;
        let handle = guard.as_ref().cloned().ok_or_else(not_connected)?;

        let started_at = Instant::now();
        let error = match tokio::time::timeout(self.timeout, self.backend.ping(&handle)).await {
            Ok(Ok(())) => {
                let latency = started_at.elapsed();
                self.registry.mark_online(name, latency);
                debug!(instance = name, latency_ms = latency.as_millis(), "ping ok");
                return Ok(latency);
            }
            Ok(Err(error)) => {
                let reason = self.scrub(name, error.message());
                warn!(instance = name, kind = %error.kind(), reason = %reason, "ping failed");
                ConnectionError::Failed {
                    name: name.to_string(),
                    reason,
                }
            }
            Err(_elapsed) => {
                warn!(instance = name, kind = "timeout", "ping timed out");
                ConnectionError::Timeout {
                    name: name.to_string(),
                    after: self.timeout,
                }
            }
        };

        drop(handle);
        self.registry.mark_offline(name, Some(error.to_string()));
        if let Some(dead) = guard.take() {
            self.close_quietly(name, dead).await;
        }
        Err(error)
    }

    /// Attempts `connect` for every offline instance concurrently.
    pub async fn reconnect_all(&self) -> Vec<ReconnectReport> {
        let offline = self.registry.offline_names();
        let attempts = offline.into_iter().map(|name| async move {
            let result = self.connect(&name).await;
            ReconnectReport { name, result }
        });
        join_all(attempts).await
    }

    /// Clone of the live handle, if the instance is online.
    pub async fn handle(&self, name: &str) -> Option<B::Connection> {
        let slot = self.existing_slot(name)?;
        let guard = slot.lock().await;
        guard.clone()
    }

    pub async fn disconnect(&self, name: &str) {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.remove(name)
        };
        if let Some(slot) = slot {
            let mut guard = slot.lock().await;
            if let Some(handle) = guard.take() {
                self.close_quietly(name, handle).await;
            }
        }
        self.registry
            .mark_offline(name, Some("disconnected".to_string()));
    }

    /// Closes every open handle; used on process shutdown.
    pub async fn shutdown(&self) {
        let slots = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.drain().collect::<Vec<_>>()
        };
        let closing = slots.into_iter().map(|(name, slot)| async move {
            let mut guard = slot.lock().await;
            if let Some(handle) = guard.take() {
                self.close_quietly(&name, handle).await;
            }
            self.registry.mark_offline(&name, None);
        });
        join_all(closing).await;
    }

    async fn close_quietly(&self, name: &str, handle: B::Connection) {
        match tokio::time::timeout(self.timeout, self.backend.disconnect(handle)).await {
            Ok(Ok(())) => debug!(instance = name, "handle closed"),
            Ok(Err(error)) => {
                debug!(instance = name, reason = %self.scrub(name, error.message()), "close failed");
            }
            Err(_elapsed) => debug!(instance = name, "close timed out"),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::{BackendError, BackendErrorKind, ConnectionBackend, ConnectionError, ConnectionManager};
    use crate::instance::{DbmsKind, Dsn, Instance, InstanceStatus};
    use crate::metric::{MetricBackend, MetricKind, MetricRow};
    use crate::registry::InstanceRegistry;

    /// Scriptable backend shared by the core tests.
    #[derive(Debug, Default)]
    pub(crate) struct FakeBackend {
        pub(crate) refuse_connect: Mutex<HashSet<String>>,
        pub(crate) fail_ping: Mutex<HashSet<String>>,
        pub(crate) hang_connect: Mutex<HashSet<String>>,
        pub(crate) hang_fetch: Mutex<HashSet<(String, MetricKind)>>,
        pub(crate) fail_fetch: Mutex<HashSet<(String, MetricKind)>>,
        pub(crate) fetch_delay: Mutex<Option<Duration>>,
        pub(crate) rows_per_fetch: AtomicUsize,
        pub(crate) connect_calls: AtomicUsize,
        pub(crate) disconnect_calls: AtomicUsize,
        pub(crate) fetch_calls: AtomicUsize,
        pub(crate) concurrent_fetches: AtomicUsize,
        pub(crate) max_concurrent_fetches: AtomicUsize,
    }

    impl FakeBackend {
        pub(crate) fn refuse(&self, name: &str) {
            self.refuse_connect.lock().unwrap().insert(name.to_string());
        }

        pub(crate) fn allow(&self, name: &str) {
            self.refuse_connect.lock().unwrap().remove(name);
        }

        pub(crate) fn break_ping(&self, name: &str) {
            self.fail_ping.lock().unwrap().insert(name.to_string());
        }
    }

    #[derive(Debug, Clone)]
    pub(crate) struct FakeConnection {
        pub(crate) name: String,
    }

    #[async_trait::async_trait]
    impl ConnectionBackend for Arc<FakeBackend> {
        type Connection = FakeConnection;

        async fn connect(&self, instance: &Instance) -> Result<Self::Connection, BackendError> {
            self.connect_calls.fetch_add(1, Ordering::SeqCst);
            let name = instance.connection_name.clone();
            if self.hang_connect.lock().unwrap().contains(&name) {
                std::future::pending::<()>().await;
            }
            if self.refuse_connect.lock().unwrap().contains(&name) {
                return Err(BackendError::new(
                    BackendErrorKind::Authentication,
                    format!("Access denied for {}", instance.dsn.expose()),
                ));
            }
            Ok(FakeConnection { name })
        }

        async fn ping(&self, connection: &Self::Connection) -> Result<(), BackendError> {
            if self.fail_ping.lock().unwrap().contains(&connection.name) {
                return Err(BackendError::new(BackendErrorKind::Network, "connection reset"));
            }
            Ok(())
        }

        async fn disconnect(&self, _connection: Self::Connection) -> Result<(), BackendError> {
            self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl MetricBackend for Arc<FakeBackend> {
        async fn fetch_metric(
            &self,
            connection: &Self::Connection,
            kind: MetricKind,
        ) -> Result<Vec<MetricRow>, BackendError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            let running = self.concurrent_fetches.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent_fetches.fetch_max(running, Ordering::SeqCst);

            let key = (connection.name.clone(), kind);
            let hang = self.hang_fetch.lock().unwrap().contains(&key);
            let delay = *self.fetch_delay.lock().unwrap();
            if hang {
                std::future::pending::<()>().await;
            }
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.concurrent_fetches.fetch_sub(1, Ordering::SeqCst);

            if self.fail_fetch.lock().unwrap().contains(&key) {
                return Err(BackendError::new(BackendErrorKind::Network, "lost connection"));
            }
            let rows = self.rows_per_fetch.load(Ordering::SeqCst).max(1);
            Ok((0..rows)
                .map(|_| MetricRow::from_strs(&[&connection.name, kind.label()]))
                .collect())
        }
    }

    pub(crate) fn prod_instance() -> Instance {
        Instance::new("prod", DbmsKind::Mysql, Dsn::new("user:pass@tcp(host:3306)/db"))
    }

    fn manager_with(backend: &Arc<FakeBackend>) -> ConnectionManager<Arc<FakeBackend>> {
        let registry = InstanceRegistry::new();
        registry.upsert(prod_instance()).expect("upsert should succeed");
        ConnectionManager::new(Arc::clone(backend), registry, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn connect_marks_instance_online() {
        let backend = Arc::new(FakeBackend::default());
        let manager = manager_with(&backend);

        let latency = manager.connect("prod").await.expect("connect should succeed");
        assert!(latency >= Duration::ZERO);

        let entry = manager.registry().get("prod").expect("entry should exist");
        assert_eq!(entry.status, InstanceStatus::Online);
        assert!(entry.online_since.is_some());
        assert!(manager.handle("prod").await.is_some());
    }

    #[tokio::test]
    async fn failed_connect_is_redacted_and_leaves_instance_offline() {
        let backend = Arc::new(FakeBackend::default());
        backend.refuse("prod");
        let manager = manager_with(&backend);

        let err = manager.connect("prod").await.expect_err("connect should fail");
        let ConnectionError::Failed { reason, .. } = &err else {
            panic!("unexpected error: {err:?}");
        };
        assert!(!reason.contains("pass@"), "reason leaked credentials: {reason}");
        assert!(!err.to_string().contains(":pass"));

        let entry = manager.registry().get("prod").expect("entry should exist");
        assert_eq!(entry.status, InstanceStatus::Offline);
        assert!(manager.handle("prod").await.is_none());
    }

    #[tokio::test]
    async fn connect_unknown_instance_is_rejected() {
        let backend = Arc::new(FakeBackend::default());
        let manager = manager_with(&backend);

        let err = manager.connect("ghost").await.expect_err("connect should fail");
        assert!(matches!(err, ConnectionError::UnknownInstance { .. }));
        assert_eq!(backend.connect_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_connect_times_out() {
        let backend = Arc::new(FakeBackend::default());
        backend
            .hang_connect
            .lock()
            .unwrap()
            .insert("prod".to_string());
        let manager = manager_with(&backend);

        let err = manager.connect("prod").await.expect_err("connect should time out");
        assert!(matches!(err, ConnectionError::Timeout { .. }));
        assert_eq!(manager.registry().online_count(), 0);
    }

    #[tokio::test]
    async fn failed_ping_drops_handle_and_marks_offline() {
        let backend = Arc::new(FakeBackend::default());
        let manager = manager_with(&backend);
        manager.connect("prod").await.expect("connect should succeed");

        backend.break_ping("prod");
        let err = manager.ping("prod").await.expect_err("ping should fail");
        assert!(matches!(err, ConnectionError::Failed { .. }));

        assert!(manager.handle("prod").await.is_none());
        assert_eq!(backend.disconnect_calls.load(Ordering::SeqCst), 1);
        let entry = manager.registry().get("prod").expect("entry should exist");
        assert_eq!(entry.status, InstanceStatus::Offline);
        assert!(entry.last_error.is_some());
    }

    #[tokio::test]
    async fn ping_without_handle_reports_not_connected() {
        let backend = Arc::new(FakeBackend::default());
        let manager = manager_with(&backend);

        let err = manager.ping("prod").await.expect_err("ping should fail");
        assert!(matches!(err, ConnectionError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn reconnect_all_reports_partial_failure_per_instance() {
        let backend = Arc::new(FakeBackend::default());
        let manager = manager_with(&backend);
        manager
            .registry()
            .upsert(Instance::new("replica", DbmsKind::Mysql, Dsn::new("u:p@tcp(r)/")))
            .expect("upsert should succeed");
        backend.refuse("replica");

        let reports = manager.reconnect_all().await;
        assert_eq!(reports.len(), 2);
        let prod = reports.iter().find(|report| report.name == "prod").expect("prod report");
        let replica = reports
            .iter()
            .find(|report| report.name == "replica")
            .expect("replica report");
        assert!(prod.result.is_ok());
        assert!(replica.result.is_err());

        backend.allow("replica");
        let reports = manager.reconnect_all().await;
        assert_eq!(reports.len(), 1, "online instances are not reconnected");
        assert_eq!(manager.registry().online_count(), 2);
    }

    #[tokio::test]
    async fn shutdown_closes_every_handle() {
        let backend = Arc::new(FakeBackend::default());
        let manager = manager_with(&backend);
        manager.connect("prod").await.expect("connect should succeed");

        manager.shutdown().await;
        assert_eq!(backend.disconnect_calls.load(Ordering::SeqCst), 1);
        assert!(manager.handle("prod").await.is_none());
        assert_eq!(manager.registry().online_count(), 0);
    }

    #[tokio::test]
    async fn reconnecting_replaces_the_stale_handle() {
        let backend = Arc::new(FakeBackend::default());
        let manager = manager_with(&backend);
        manager.connect("prod").await.expect("first connect should succeed");
        manager.connect("prod").await.expect("second connect should succeed");

        assert_eq!(backend.connect_calls.load(Ordering::SeqCst), 2);
        assert_eq!(backend.disconnect_calls.load(Ordering::SeqCst), 1);
    }
}
