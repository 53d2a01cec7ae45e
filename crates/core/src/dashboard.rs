use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{ConfigError, ConfigStore, Settings};
use crate::connection_manager::ConnectionManager;
use crate::governor::{ActionClass, InputGovernor};
use crate::instance::{Dsn, Instance};
use crate::metric::{MetricBackend, MetricKind};
use crate::registry::{InstanceEntry, InstanceRegistry};
use crate::scheduler::{PollingConfig, PollingScheduler};
use crate::shutdown::ShutdownToken;
use crate::snapshot::{MetricSnapshot, MetricSnapshotStore};
use crate::view::{TransitionError, ViewSnapshot, ViewState, ViewStateMachine};

/// Raw text from the connection setup form.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectionDraft {
    pub dbms: String,
    pub dsn: String,
    pub name: String,
    pub group: String,
}

impl fmt::Debug for ConnectionDraft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDraft")
            .field("dbms", &self.dbms)
            .field("dsn", &Dsn::new(self.dsn.as_str()))
            .field("name", &self.name)
            .field("group", &self.group)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    SubmitConnection(ConnectionDraft),
    SwitchView(ViewState),
    ReconnectAll,
    GoBack,
    OpenSetup,
    RemoveInstance(String),
    Quit,
}

impl Intent {
    /// Rate-limiter class; `None` is never throttled.
    #[must_use]
    pub fn action_class(&self) -> Option<ActionClass> {
        match self {
            Self::SubmitConnection(_) | Self::RemoveInstance(_) => Some(ActionClass::Submission),
            Self::ReconnectAll => Some(ActionClass::Reconnect),
            Self::SwitchView(_) | Self::GoBack | Self::OpenSetup => Some(ActionClass::ViewSwitch),
            Self::Quit => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Dropped by the input governor.
    Throttled,
    Info(String),
    Warning(String),
    Error(String),
    Quit,
}

impl Outcome {
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Info(message) | Self::Warning(message) | Self::Error(message) => Some(message),
            Self::Throttled | Self::Quit => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupReport {
    pub loaded: usize,
    pub rejected: Vec<String>,
    pub connected: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub persist_error: Option<String>,
    pub view: Option<ViewState>,
    /// Set when the move off the setup screen was rejected.
    pub view_error: Option<String>,
}

/// Everything the renderer needs for one redraw.
#[derive(Debug, Clone)]
pub struct RenderFrame {
    pub view: ViewSnapshot,
    pub instances: Vec<InstanceEntry>,
    pub focused: Option<String>,
    pub snapshots: Vec<Arc<MetricSnapshot>>,
    pub case_sensitive_filters: bool,
}

impl RenderFrame {
    #[must_use]
    pub fn snapshot(&self, kind: MetricKind) -> Option<&MetricSnapshot> {
        self.snapshots
            .iter()
            .find(|snapshot| snapshot.kind == kind)
            .map(Arc::as_ref)
    }

    #[must_use]
    pub fn online_count(&self) -> usize {
        self.instances.iter().filter(|entry| entry.is_online()).count()
    }
}

/// Owned application context: registry, connections, poller, views and
/// input gating, plus the config store that persists instance changes.
pub struct Dashboard<B: MetricBackend> {
    registry: InstanceRegistry,
    connections: Arc<ConnectionManager<B>>,
    scheduler: PollingScheduler<B>,
    views: ViewStateMachine,
    governor: InputGovernor,
    config: Mutex<Box<dyn ConfigStore + Send>>,
    settings: Settings,
}

impl<B: MetricBackend> fmt::Debug for Dashboard<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dashboard")
            .field("view", &self.views.current())
            .field("instances", &self.registry.len())
            .field("online", &self.registry.online_count())
            .finish_non_exhaustive()
    }
}

impl<B: MetricBackend> Dashboard<B> {
    #[must_use]
    pub fn new(backend: B, config: Box<dyn ConfigStore + Send>) -> Self {
        let settings = config.settings().clone();
        let registry = InstanceRegistry::new();
        let connections = Arc::new(ConnectionManager::new(
            backend,
            registry.clone(),
            settings.connect_timeout(),
        ));
        let scheduler = PollingScheduler::new(
            Arc::clone(&connections),
            MetricSnapshotStore::new(),
            PollingConfig::from_settings(&settings),
        );

        Self {
            registry,
            connections,
            scheduler,
            views: ViewStateMachine::new(),
            governor: InputGovernor::new(settings.rate_limit()),
            config: Mutex::new(config),
            settings,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    #[must_use]
    pub fn connections(&self) -> &ConnectionManager<B> {
        &self.connections
    }

    #[must_use]
    pub fn scheduler(&self) -> &PollingScheduler<B> {
        &self.scheduler
    }

    #[must_use]
    pub fn store(&self) -> &MetricSnapshotStore {
        self.scheduler.store()
    }

    #[must_use]
    pub fn views(&self) -> &ViewStateMachine {
        &self.views
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Registers persisted instances plus the one given on the command line,
    /// then connects all of them concurrently.
    pub async fn startup(&self, cli_instance: Option<Instance>) -> StartupReport {
        let mut report = StartupReport::default();

        let persisted = {
            let config = self.config.lock().unwrap_or_else(PoisonError::into_inner);
            config.load_instances()
        };
        let persisted = persisted.unwrap_or_else(|error| {
            warn!(error = %error, "persisted instances unavailable");
            Vec::new()
        });

        for instance in persisted {
            let name = instance.connection_name.clone();
            match self.registry.upsert(instance) {
                Ok(_) => report.loaded += 1,
                Err(error) => {
                    warn!(instance = %name, error = %error, "skipping persisted instance");
                    report.rejected.push(name);
                }
            }
        }

        if let Some(instance) = cli_instance {
            let name = instance.connection_name.clone();
            match self.registry.upsert(instance) {
                Ok(_) => {
                    if let Err(error) = self.persist() {
                        report.persist_error = Some(error.to_string());
                    }
                }
                Err(error) => report.rejected.push(format!("{name}: {error}")),
            }
        }

        for attempt in self.connections.reconnect_all().await {
            match attempt.result {
                Ok(_) => report.connected.push(attempt.name),
                Err(error) => report.failed.push((attempt.name, error.to_string())),
            }
        }

        if let Err(error) = self.enter_after_connect() {
            report.view_error = Some(error.to_string());
        }
        let view = self.views.current();
        report.view = Some(view);

        info!(
            loaded = report.loaded,
            connected = report.connected.len(),
            failed = report.failed.len(),
            view = %view,
            "startup complete"
        );
        report
    }

    pub async fn handle_intent(&self, intent: Intent) -> Outcome {
        if let Some(class) = intent.action_class() {
            if !self.governor.allow(class) {
                return Outcome::Throttled;
            }
        }

        match intent {
            Intent::SubmitConnection(draft) => self.submit_connection(draft).await,
            Intent::SwitchView(target) => {
                let online = self.registry.online_count();
                self.finish_transition(self.views.switch_to(target, online))
            }
            Intent::GoBack => {
                let online = self.registry.online_count();
                self.finish_transition(self.views.go_back(online))
            }
            Intent::OpenSetup => {
                let online = self.registry.online_count();
                self.finish_transition(self.views.request_setup(online))
            }
            Intent::ReconnectAll => self.reconnect_all().await,
            Intent::RemoveInstance(name) => self.remove_instance(&name).await,
            Intent::Quit => Outcome::Quit,
        }
    }

    async fn submit_connection(&self, draft: ConnectionDraft) -> Outcome {
        let group = match draft.group.trim() {
            "" => self.settings.default_group(),
            group => Some(group),
        };
        let instance = match Instance::parse(&draft.name, &draft.dbms, &draft.dsn, group) {
            Ok(instance) => instance,
            Err(error) => return Outcome::Error(format!("Invalid connection: {error}")),
        };
        let name = instance.connection_name.clone();
        if let Err(error) = self.registry.upsert(instance) {
            return Outcome::Error(format!("Invalid connection: {error}"));
        }
        let persisted = self.persist();

        let outcome = match self.connections.connect(&name).await {
            Ok(latency) => {
                let message = format!("Connected to `{name}` in {}ms", latency.as_millis());
                match self.enter_after_connect() {
                    Ok(_) => Outcome::Info(message),
                    Err(error) => Outcome::Warning(format!("{message} (view unchanged: {error})")),
                }
            }
            Err(error) => Outcome::Error(error.to_string()),
        };

        match (persisted, outcome) {
            (Err(error), Outcome::Info(message) | Outcome::Warning(message)) => {
                Outcome::Warning(format!("{message} (save failed: {error})"))
            }
            (_, outcome) => outcome,
        }
    }

    async fn reconnect_all(&self) -> Outcome {
        let reports = self.connections.reconnect_all().await;
        let view_note = self
            .enter_after_connect()
            .err()
            .map(|error| format!(" (view unchanged: {error})"))
            .unwrap_or_default();
        if reports.is_empty() {
            return if view_note.is_empty() {
                Outcome::Info("Every instance is already online".to_string())
            } else {
                Outcome::Warning(format!("Every instance is already online{view_note}"))
            };
        }

        let failed = reports
            .iter()
            .filter_map(|report| report.result.as_ref().err())
            .map(ToString::to_string)
            .collect::<Vec<_>>();

        if failed.is_empty() && view_note.is_empty() {
            Outcome::Info(format!("Reconnected {} instance(s)", reports.len()))
        } else if failed.is_empty() {
            Outcome::Warning(format!("Reconnected {} instance(s){view_note}", reports.len()))
        } else {
            Outcome::Warning(format!(
                "Reconnected {} of {}: {}{view_note}",
                reports.len() - failed.len(),
                reports.len(),
                failed.join("; ")
            ))
        }
    }

    async fn remove_instance(&self, name: &str) -> Outcome {
        self.scheduler.cancel_instance(name);
        self.connections.disconnect(name).await;
        if self.registry.remove(name).is_none() {
            return Outcome::Warning(format!("No instance named `{name}`"));
        }
        self.store().remove_instance(name);

        match self.persist() {
            Ok(()) => Outcome::Info(format!("Removed `{name}`")),
            Err(error) => Outcome::Warning(format!("Removed `{name}` (save failed: {error})")),
        }
    }

    fn finish_transition(&self, result: Result<ViewState, TransitionError>) -> Outcome {
        match result {
            Ok(view) => {
                self.activate(view);
                Outcome::Info(format!("Switched to {view}"))
            }
            Err(error) => {
                warn!(error = %error, "view transition rejected");
                Outcome::Warning(error.to_string())
            }
        }
    }

    /// Leaves setup once something is online. Polling follows the current
    /// view whether or not the transition went through.
    fn enter_after_connect(&self) -> Result<ViewState, TransitionError> {
        let result = self.views.on_instance_connected(self.registry.online_count());
        if let Err(error) = &result {
            warn!(error = %error, "view change after connect rejected");
        }
        self.activate(self.views.current());
        result
    }

    fn activate(&self, view: ViewState) {
        self.scheduler
            .set_active_kinds(view.required_metrics().iter().copied());
    }

    /// Writes the current registry contents to the config store.
    pub fn persist(&self) -> Result<(), ConfigError> {
        let instances = self.registry.instances();
        let mut config = self.config.lock().unwrap_or_else(PoisonError::into_inner);
        config.save_instances(&instances)
    }

    /// Starts the polling loop on the current runtime.
    pub fn spawn_polling(&self, shutdown: ShutdownToken) -> JoinHandle<()> {
        tokio::spawn(self.scheduler.clone().run(shutdown))
    }

    pub async fn shutdown(&self) {
        self.scheduler.cancel_all();
        self.connections.shutdown().await;
    }

    /// Falls back to the first online instance (then the first instance) when
    /// `focused` is not registered.
    #[must_use]
    pub fn frame(&self, focused: Option<&str>) -> RenderFrame {
        let instances = self.registry.list();
        let focused = focused
            .filter(|name| instances.iter().any(|entry| entry.name() == *name))
            .map(str::to_string)
            .or_else(|| {
                instances
                    .iter()
                    .find(|entry| entry.is_online())
                    .or_else(|| instances.first())
                    .map(|entry| entry.name().to_string())
            });
        let snapshots = focused
            .as_deref()
            .map(|name| self.store().get_all(name))
            .unwrap_or_default();

        RenderFrame {
            view: self.views.snapshot(),
            instances,
            focused,
            snapshots,
            case_sensitive_filters: self.settings.case_sensitive_filters,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use super::{ConnectionDraft, Dashboard, Intent, Outcome};
    use crate::config::{ConfigError, ConfigStore, Settings};
    use crate::connection_manager::tests::FakeBackend;
    use crate::instance::{DbmsKind, Dsn, Instance, InstanceStatus};
    use crate::metric::MetricKind;
    use crate::snapshot::FetchError;
    use crate::view::{TransitionError, ViewState};

    #[derive(Debug, Default)]
    struct MemoryStore {
        settings: Settings,
        saved: Arc<Mutex<Vec<Instance>>>,
        saves: Arc<Mutex<usize>>,
    }

    impl ConfigStore for MemoryStore {
        fn load_instances(&self) -> Result<Vec<Instance>, ConfigError> {
            Ok(self.saved.lock().unwrap().clone())
        }

        fn save_instances(&mut self, instances: &[Instance]) -> Result<(), ConfigError> {
            *self.saved.lock().unwrap() = instances.to_vec();
            *self.saves.lock().unwrap() += 1;
            Ok(())
        }

        fn get_setting(&self, name: &str) -> Option<String> {
            self.settings.get(name)
        }

        fn settings(&self) -> &Settings {
            &self.settings
        }
    }

    fn settings() -> Settings {
        Settings {
            rate_limiter: 0,
            ..Settings::default()
        }
    }

    fn dashboard_with(
        backend: &Arc<FakeBackend>,
        store: MemoryStore,
    ) -> Dashboard<Arc<FakeBackend>> {
        Dashboard::new(Arc::clone(backend), Box::new(store))
    }

    fn prod_draft() -> ConnectionDraft {
        ConnectionDraft {
            dbms: "MYSQL".to_string(),
            dsn: "user:pass@tcp(host:3306)/db".to_string(),
            name: "prod".to_string(),
            group: String::new(),
        }
    }

    async fn settle(dashboard: &Dashboard<Arc<FakeBackend>>) {
        for _ in 0..100 {
            if dashboard.scheduler().in_flight_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("fetches did not settle");
    }

    #[tokio::test]
    async fn connecting_prod_moves_to_menu_and_polls_processlist() {
        let backend = Arc::new(FakeBackend::default());
        let dashboard = dashboard_with(&backend, MemoryStore {
            settings: settings(),
            ..MemoryStore::default()
        });

        let outcome = dashboard
            .handle_intent(Intent::SubmitConnection(prod_draft()))
            .await;
        assert!(matches!(outcome, Outcome::Info(_)), "{outcome:?}");
        assert_eq!(dashboard.views().current(), ViewState::InstanceMenu);

        dashboard
            .handle_intent(Intent::SwitchView(ViewState::Processlist))
            .await;
        assert_eq!(dashboard.scheduler().run_cycle().spawned, 1);
        settle(&dashboard).await;

        let online_since = dashboard
            .registry()
            .get("prod")
            .and_then(|entry| entry.online_since)
            .expect("prod should be online");
        let frame = dashboard.frame(None);
        assert_eq!(frame.focused.as_deref(), Some("prod"));
        let snapshot = frame
            .snapshot(MetricKind::Processlist)
            .expect("processlist snapshot");
        assert!(snapshot.fetch_error.is_none());
        assert!(snapshot.fetched_at.expect("fetched_at") >= online_since);
    }

    #[tokio::test]
    async fn prod_going_offline_keeps_rows_and_blocks_setup() {
        let backend = Arc::new(FakeBackend::default());
        let dashboard = dashboard_with(&backend, MemoryStore {
            settings: settings(),
            ..MemoryStore::default()
        });
        dashboard
            .handle_intent(Intent::SubmitConnection(prod_draft()))
            .await;
        dashboard
            .handle_intent(Intent::SwitchView(ViewState::Processlist))
            .await;
        let start = Instant::now();
        dashboard.scheduler().run_cycle_at(start);
        settle(&dashboard).await;

        backend
            .fail_fetch
            .lock()
            .unwrap()
            .insert(("prod".to_string(), MetricKind::Processlist));
        backend.break_ping("prod");
        dashboard
            .scheduler()
            .run_cycle_at(start + Duration::from_secs(1));
        settle(&dashboard).await;

        let entry = dashboard.registry().get("prod").expect("entry");
        assert_eq!(entry.status, InstanceStatus::Offline);
        let snapshot = dashboard
            .store()
            .get("prod", MetricKind::Processlist)
            .expect("snapshot");
        assert!(matches!(snapshot.fetch_error, Some(FetchError::Backend(_))));
        assert_eq!(snapshot.rows.len(), 1);

        let outcome = dashboard.handle_intent(Intent::OpenSetup).await;
        let guard_message = TransitionError::GuardRejected {
            from: ViewState::Processlist,
            to: ViewState::ConnectionSetup,
        }
        .to_string();
        assert_eq!(outcome, Outcome::Warning(guard_message));
        assert_eq!(dashboard.views().current(), ViewState::Processlist);
    }

    #[tokio::test]
    async fn connect_during_a_running_transition_reports_the_unchanged_view() {
        let backend = Arc::new(FakeBackend::default());
        let dashboard = dashboard_with(&backend, MemoryStore {
            settings: settings(),
            ..MemoryStore::default()
        });

        let held = dashboard.views().begin().expect("transition should start");
        let outcome = dashboard
            .handle_intent(Intent::SubmitConnection(prod_draft()))
            .await;
        drop(held);

        let Outcome::Warning(message) = outcome else {
            panic!("expected a warning, got {outcome:?}");
        };
        assert!(message.contains("Connected to `prod`"), "{message}");
        assert!(
            message.contains(&TransitionError::InProgress.to_string()),
            "{message}"
        );
        assert_eq!(dashboard.views().current(), ViewState::ConnectionSetup);
        assert!(dashboard.registry().get("prod").is_some_and(|entry| entry.is_online()));

        let outcome = dashboard.handle_intent(Intent::ReconnectAll).await;
        assert!(matches!(outcome, Outcome::Info(_)), "{outcome:?}");
        assert_eq!(dashboard.views().current(), ViewState::InstanceMenu);
    }

    #[tokio::test]
    async fn go_back_into_setup_with_nothing_online_is_rejected() {
        let backend = Arc::new(FakeBackend::default());
        let dashboard = dashboard_with(&backend, MemoryStore {
            settings: settings(),
            ..MemoryStore::default()
        });
        dashboard
            .handle_intent(Intent::SubmitConnection(prod_draft()))
            .await;
        dashboard.connections().disconnect("prod").await;

        let outcome = dashboard.handle_intent(Intent::GoBack).await;
        assert!(matches!(outcome, Outcome::Warning(_)));
        assert_eq!(dashboard.views().current(), ViewState::InstanceMenu);
    }

    #[tokio::test]
    async fn burst_of_submissions_connects_once() {
        let backend = Arc::new(FakeBackend::default());
        let dashboard = dashboard_with(&backend, MemoryStore {
            settings: Settings {
                rate_limiter: 60_000,
                ..Settings::default()
            },
            ..MemoryStore::default()
        });

        let first = dashboard
            .handle_intent(Intent::SubmitConnection(prod_draft()))
            .await;
        let second = dashboard
            .handle_intent(Intent::SubmitConnection(prod_draft()))
            .await;
        assert!(matches!(first, Outcome::Info(_)));
        assert_eq!(second, Outcome::Throttled);
        assert_eq!(
            backend.connect_calls.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
        assert_eq!(dashboard.handle_intent(Intent::Quit).await, Outcome::Quit);
    }

    #[tokio::test]
    async fn invalid_dbms_is_rejected_before_the_registry_changes() {
        let backend = Arc::new(FakeBackend::default());
        let saves = Arc::new(Mutex::new(0));
        let dashboard = dashboard_with(&backend, MemoryStore {
            settings: settings(),
            saves: Arc::clone(&saves),
            ..MemoryStore::default()
        });

        let outcome = dashboard
            .handle_intent(Intent::SubmitConnection(ConnectionDraft {
                dbms: "oracle".to_string(),
                ..prod_draft()
            }))
            .await;
        assert!(matches!(outcome, Outcome::Error(message) if message.contains("oracle")));
        assert!(dashboard.registry().is_empty());
        assert_eq!(*saves.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_connect_reports_redacted_error_and_keeps_record() {
        let backend = Arc::new(FakeBackend::default());
        backend.refuse("prod");
        let saved = Arc::new(Mutex::new(Vec::new()));
        let dashboard = dashboard_with(&backend, MemoryStore {
            settings: settings(),
            saved: Arc::clone(&saved),
            ..MemoryStore::default()
        });

        let outcome = dashboard
            .handle_intent(Intent::SubmitConnection(prod_draft()))
            .await;
        let Outcome::Error(message) = outcome else {
            panic!("expected error outcome");
        };
        assert!(!message.contains(":pass"), "{message}");
        assert_eq!(dashboard.views().current(), ViewState::ConnectionSetup);
        assert_eq!(saved.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn submission_without_group_uses_default_group() {
        let backend = Arc::new(FakeBackend::default());
        let dashboard = dashboard_with(&backend, MemoryStore {
            settings: Settings {
                rate_limiter: 0,
                default_group: "eu-west".to_string(),
                ..Settings::default()
            },
            ..MemoryStore::default()
        });

        dashboard
            .handle_intent(Intent::SubmitConnection(prod_draft()))
            .await;
        let entry = dashboard.registry().get("prod").expect("entry");
        assert_eq!(entry.instance.group.as_deref(), Some("eu-west"));
    }

    #[tokio::test]
    async fn startup_connects_persisted_and_cli_instances() {
        let backend = Arc::new(FakeBackend::default());
        backend.refuse("broken");
        let saved = Arc::new(Mutex::new(vec![
            Instance::new("replica", DbmsKind::Mariadb, Dsn::new("u:p@tcp(r)/")),
            Instance::new("broken", DbmsKind::Mysql, Dsn::new("u:p@tcp(b)/")),
        ]));
        let dashboard = dashboard_with(&backend, MemoryStore {
            settings: settings(),
            saved: Arc::clone(&saved),
            ..MemoryStore::default()
        });

        let cli = Instance::new("cli", DbmsKind::Mysql, Dsn::new("root@tcp(localhost)/"));
        let report = dashboard.startup(Some(cli)).await;

        assert_eq!(report.loaded, 2);
        assert_eq!(report.connected, vec!["cli".to_string(), "replica".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.view, Some(ViewState::InstanceMenu));
        assert_eq!(saved.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn startup_with_nothing_online_stays_in_setup() {
        let backend = Arc::new(FakeBackend::default());
        let dashboard = dashboard_with(&backend, MemoryStore {
            settings: settings(),
            ..MemoryStore::default()
        });

        let report = dashboard.startup(None).await;
        assert_eq!(report.view, Some(ViewState::ConnectionSetup));
        assert!(report.connected.is_empty());
    }

    #[tokio::test]
    async fn reconnect_all_reports_partial_failure() {
        let backend = Arc::new(FakeBackend::default());
        backend.refuse("broken");
        let saved = Arc::new(Mutex::new(vec![
            Instance::new("replica", DbmsKind::Mysql, Dsn::new("u:p@tcp(r)/")),
            Instance::new("broken", DbmsKind::Mysql, Dsn::new("u:secret@tcp(b)/")),
        ]));
        let dashboard = dashboard_with(&backend, MemoryStore {
            settings: settings(),
            saved,
            ..MemoryStore::default()
        });
        dashboard.startup(None).await;

        let outcome = dashboard.handle_intent(Intent::ReconnectAll).await;
        let Outcome::Warning(message) = outcome else {
            panic!("expected warning outcome");
        };
        assert!(message.contains("broken"));
        assert!(!message.contains("secret"));

        backend.allow("broken");
        let outcome = dashboard.handle_intent(Intent::ReconnectAll).await;
        assert!(matches!(outcome, Outcome::Info(_)));
        assert_eq!(dashboard.registry().online_count(), 2);
    }

    #[tokio::test]
    async fn removing_an_instance_drops_snapshots_and_persists() {
        let backend = Arc::new(FakeBackend::default());
        let saved = Arc::new(Mutex::new(Vec::new()));
        let dashboard = dashboard_with(&backend, MemoryStore {
            settings: settings(),
            saved: Arc::clone(&saved),
            ..MemoryStore::default()
        });
        dashboard
            .handle_intent(Intent::SubmitConnection(prod_draft()))
            .await;
        dashboard
            .handle_intent(Intent::SwitchView(ViewState::Locks))
            .await;
        dashboard.scheduler().run_cycle();
        settle(&dashboard).await;
        assert!(!dashboard.store().is_empty());

        let outcome = dashboard
            .handle_intent(Intent::RemoveInstance("prod".to_string()))
            .await;
        assert!(matches!(outcome, Outcome::Info(_)));
        assert!(dashboard.registry().is_empty());
        assert!(dashboard.store().is_empty());
        assert!(saved.lock().unwrap().is_empty());
        assert_eq!(
            backend.disconnect_calls.load(std::sync::atomic::Ordering::SeqCst),
            1
        );

        let again = dashboard
            .handle_intent(Intent::RemoveInstance("prod".to_string()))
            .await;
        assert!(matches!(again, Outcome::Warning(_)));
    }

    #[tokio::test]
    async fn switching_views_changes_polled_metrics() {
        let backend = Arc::new(FakeBackend::default());
        let dashboard = dashboard_with(&backend, MemoryStore {
            settings: settings(),
            ..MemoryStore::default()
        });
        dashboard
            .handle_intent(Intent::SubmitConnection(prod_draft()))
            .await;
        assert!(dashboard.scheduler().active_kinds().is_empty());

        dashboard
            .handle_intent(Intent::SwitchView(ViewState::Memory))
            .await;
        assert_eq!(
            dashboard.scheduler().active_kinds().len(),
            ViewState::Memory.required_metrics().len()
        );

        dashboard.handle_intent(Intent::GoBack).await;
        assert_eq!(dashboard.views().current(), ViewState::InstanceMenu);
        assert!(dashboard.scheduler().active_kinds().is_empty());
    }

    #[tokio::test]
    async fn repeated_saves_do_not_duplicate_instances() {
        let backend = Arc::new(FakeBackend::default());
        let saved = Arc::new(Mutex::new(Vec::new()));
        let dashboard = dashboard_with(&backend, MemoryStore {
            settings: settings(),
            saved: Arc::clone(&saved),
            ..MemoryStore::default()
        });

        for _ in 0..3 {
            dashboard
                .handle_intent(Intent::SubmitConnection(prod_draft()))
                .await;
        }
        dashboard.persist().expect("persist should succeed");
        assert_eq!(saved.lock().unwrap().len(), 1);
    }

    #[test]
    fn draft_debug_output_hides_the_password() {
        let rendered = format!("{:?}", Intent::SubmitConnection(prod_draft()));
        assert!(rendered.contains("user:***@tcp(host:3306)/db"), "{rendered}");
        assert!(!rendered.contains("pass@"));
    }
}
