use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::config::Settings;
use crate::connection_manager::ConnectionManager;
use crate::metric::{MetricBackend, MetricKind, MetricRow};
use crate::shutdown::ShutdownToken;
use crate::snapshot::{FetchError, MetricSnapshotStore, SnapshotKey};

pub const DEFAULT_TICK: Duration = Duration::from_secs(1);
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingConfig {
    pub tick: Duration,
    pub fetch_timeout: Duration,
    /// Per-kind refresh cadence; kinds without an entry refresh every tick.
    pub cadence: BTreeMap<MetricKind, Duration>,
    /// Maximum rows kept per snapshot; kinds without an entry are unbounded.
    pub row_limits: BTreeMap<MetricKind, usize>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            cadence: BTreeMap::new(),
            row_limits: BTreeMap::new(),
        }
    }
}

impl PollingConfig {
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        let refresh = settings.refresh_interval();
        let errlog = settings.errlog_refresh_interval();

        let mut cadence = BTreeMap::new();
        cadence.insert(MetricKind::ErrorLog, errlog);

        let mut row_limits = BTreeMap::new();
        if settings.max_processlist_len > 0 {
            row_limits.insert(MetricKind::Processlist, settings.max_processlist_len);
        }
        if settings.max_errlog_len > 0 {
            row_limits.insert(MetricKind::ErrorLog, settings.max_errlog_len);
        }

        Self {
            tick: refresh.min(errlog),
            fetch_timeout: settings.fetch_timeout(),
            cadence: MetricKind::ALL
                .into_iter()
                .map(|kind| (kind, cadence.get(&kind).copied().unwrap_or(refresh)))
                .collect(),
            row_limits,
        }
    }

    #[must_use]
    pub fn cadence_for(&self, kind: MetricKind) -> Duration {
        self.cadence.get(&kind).copied().unwrap_or(self.tick)
    }

    #[must_use]
    pub fn row_limit(&self, kind: MetricKind) -> Option<usize> {
        self.row_limits.get(&kind).copied()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub spawned: usize,
    pub skipped_in_flight: usize,
    pub skipped_not_due: usize,
    /// Snapshots of offline instances flagged as disconnected this cycle.
    pub marked_offline: usize,
}

#[derive(Debug)]
struct InFlight {
    generation: u64,
    abort: AbortHandle,
}

#[derive(Debug, Default)]
struct PairState {
    in_flight: HashMap<SnapshotKey, InFlight>,
    last_started: HashMap<SnapshotKey, Instant>,
}

struct Shared<B: MetricBackend> {
    connections: Arc<ConnectionManager<B>>,
    store: MetricSnapshotStore,
    config: PollingConfig,
    active_kinds: Mutex<BTreeSet<MetricKind>>,
    pairs: Mutex<PairState>,
    generation: AtomicU64,
}

impl<B: MetricBackend> Shared<B> {
    fn pairs(&self) -> MutexGuard<'_, PairState> {
        self.pairs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, key: &SnapshotKey, generation: u64) {
        let mut pairs = self.pairs();
        if pairs
            .in_flight
            .get(key)
            .is_some_and(|flight| flight.generation == generation)
        {
            pairs.in_flight.remove(key);
        }
    }
}

/// Fans metric fetches out across online instances on every tick.
///
/// Each (instance, metric) pair has at most one fetch in flight. Fetches are
/// bounded by `fetch_timeout` and run as independent tasks, so one slow
/// instance never delays another.
pub struct PollingScheduler<B: MetricBackend> {
    shared: Arc<Shared<B>>,
}

impl<B: MetricBackend> Clone for PollingScheduler<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<B: MetricBackend> fmt::Debug for PollingScheduler<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingScheduler")
            .field("config", &self.shared.config)
            .field("active_kinds", &self.active_kinds())
            .field("in_flight", &self.in_flight_count())
            .finish_non_exhaustive()
    }
}

impl<B: MetricBackend> PollingScheduler<B> {
    #[must_use]
    pub fn new(
        connections: Arc<ConnectionManager<B>>,
        store: MetricSnapshotStore,
        config: PollingConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                connections,
                store,
                config,
                active_kinds: Mutex::new(BTreeSet::new()),
                pairs: Mutex::new(PairState::default()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &PollingConfig {
        &self.shared.config
    }

    #[must_use]
    pub fn store(&self) -> &MetricSnapshotStore {
        &self.shared.store
    }

    #[must_use]
    pub fn active_kinds(&self) -> BTreeSet<MetricKind> {
        self.shared
            .active_kinds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.shared.pairs().in_flight.len()
    }

    /// Replaces the polled metric set and aborts fetches for kinds that
    /// dropped out. Returns how many fetches were cancelled.
    pub fn set_active_kinds(&self, kinds: impl IntoIterator<Item = MetricKind>) -> usize {
        let next = kinds.into_iter().collect::<BTreeSet<_>>();
        *self
            .shared
            .active_kinds
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = next.clone();

        let cancelled = self.cancel_where(|key| !next.contains(&key.kind));
        if cancelled > 0 {
            debug!(cancelled, "cancelled fetches for inactive metrics");
        }
        cancelled
    }

    pub fn cancel_instance(&self, instance: &str) -> usize {
        self.cancel_where(|key| key.instance == instance)
    }

    pub fn cancel_all(&self) -> usize {
        self.cancel_where(|_| true)
    }

    fn cancel_where(&self, mut predicate: impl FnMut(&SnapshotKey) -> bool) -> usize {
        let mut pairs = self.shared.pairs();
        let mut cancelled = 0;
        pairs.in_flight.retain(|key, flight| {
            if predicate(key) {
                flight.abort.abort();
                cancelled += 1;
                false
            } else {
                true
            }
        });
        // Re-activated pairs fetch on the next tick instead of waiting out their cadence.
        pairs.last_started.retain(|key, _| !predicate(key));
        cancelled
    }

    /// Runs one polling cycle. Must be called from within a tokio runtime.
    pub fn run_cycle(&self) -> CycleReport {
        self.run_cycle_at(Instant::now())
    }

    pub fn run_cycle_at(&self, now: Instant) -> CycleReport {
        let mut report = CycleReport::default();
        let kinds = self.active_kinds();
        if kinds.is_empty() {
            return report;
        }
        let registry = self.shared.connections.registry();
        self.mark_offline_snapshots(&registry.offline_names(), &kinds, &mut report);
        let online = registry.online_names();

        // Held across spawning so a fast task cannot finish before its entry exists.
        let mut pairs = self.shared.pairs();
        for instance in &online {
            for &kind in &kinds {
                let key = SnapshotKey::new(instance.as_str(), kind);
                if pairs.in_flight.contains_key(&key) {
                    report.skipped_in_flight += 1;
                    continue;
                }
                let cadence = self.shared.config.cadence_for(kind);
                if pairs
                    .last_started
                    .get(&key)
                    .is_some_and(|last| now.saturating_duration_since(*last) < cadence)
                {
                    report.skipped_not_due += 1;
                    continue;
                }

                let generation = self.shared.generation.fetch_add(1, Ordering::Relaxed);
                let task = tokio::spawn(fetch_pair(
                    Arc::clone(&self.shared),
                    key.clone(),
                    generation,
                ));
                pairs.in_flight.insert(
                    key.clone(),
                    InFlight {
                        generation,
                        abort: task.abort_handle(),
                    },
                );
                pairs.last_started.insert(key, now);
                report.spawned += 1;
            }
        }
        report
    }

    fn mark_offline_snapshots(
        &self,
        offline: &[String],
        kinds: &BTreeSet<MetricKind>,
        report: &mut CycleReport,
    ) {
        let at = SystemTime::now();
        for instance in offline {
            for &kind in kinds {
                if self.shared.store.mark_disconnected(instance, kind, at) {
                    report.marked_offline += 1;
                }
            }
        }
        if report.marked_offline > 0 {
            debug!(marked = report.marked_offline, "flagged snapshots of offline instances");
        }
    }

    /// Ticks until `shutdown` fires, then aborts in-flight fetches and closes
    /// every connection.
    pub async fn run(self, shutdown: ShutdownToken) {
        let mut ticker = tokio::time::interval(self.shared.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            tick_ms = self.shared.config.tick.as_millis(),
            fetch_timeout_ms = self.shared.config.fetch_timeout.as_millis(),
            "polling scheduler started"
        );

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                tick = ticker.tick() => {
                    let report = self.run_cycle_at(tick.into_std());
                    trace!(
                        spawned = report.spawned,
                        skipped_in_flight = report.skipped_in_flight,
                        skipped_not_due = report.skipped_not_due,
                        marked_offline = report.marked_offline,
                        "polling cycle"
                    );
                }
            }
        }

        let cancelled = self.cancel_all();
        self.shared.connections.shutdown().await;
        info!(cancelled, "polling scheduler stopped");
    }
}

async fn fetch_pair<B: MetricBackend>(shared: Arc<Shared<B>>, key: SnapshotKey, generation: u64) {
    let fetch_timeout = shared.config.fetch_timeout;
    let outcome = tokio::time::timeout(fetch_timeout, fetch_once(&shared, &key))
        .await
        .unwrap_or(Err(FetchError::Timeout {
            after: fetch_timeout,
        }));

    let at = SystemTime::now();
    match outcome {
        Ok(mut rows) => {
            if let Some(limit) = shared.config.row_limit(key.kind) {
                rows.truncate(limit);
            }
            trace!(instance = %key.instance, metric = %key.kind, rows = rows.len(), "metric fetched");
            shared.store.publish_rows(&key.instance, key.kind, rows, at);
        }
        Err(error) => {
            warn!(instance = %key.instance, metric = %key.kind, error = %error, "metric fetch failed");
            shared
                .store
                .publish_error(&key.instance, key.kind, error, at);
            // Detect a dead connection now rather than on the next failure.
            let _ = shared.connections.ping(&key.instance).await;
        }
    }

    shared.finish(&key, generation);
}

async fn fetch_once<B: MetricBackend>(
    shared: &Shared<B>,
    key: &SnapshotKey,
) -> Result<Vec<MetricRow>, FetchError> {
    let handle = shared
        .connections
        .handle(&key.instance)
        .await
        .ok_or(FetchError::NotConnected)?;
    shared
        .connections
        .backend()
        .fetch_metric(&handle, key.kind)
        .await
        .map_err(|error| FetchError::Backend(shared.connections.scrub(&key.instance, error.message())))
}
