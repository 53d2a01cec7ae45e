use std::sync::Arc;
use std::time::Duration;

use nextop_adapters::MysqlBackend;
use nextop_core::connection_manager::{ConnectionBackend, ConnectionError, ConnectionManager};
use nextop_core::instance::{DbmsKind, Dsn, Instance, InstanceStatus};
use nextop_core::metric::{MetricBackend, MetricKind};
use nextop_core::registry::InstanceRegistry;
use nextop_core::scheduler::{PollingConfig, PollingScheduler};
use nextop_core::snapshot::MetricSnapshotStore;

fn mysql_integration_enabled() -> bool {
    matches!(
        std::env::var("NEXTOP_RUN_MYSQL_INTEGRATION").ok().as_deref(),
        Some("1")
    )
}

fn integration_instance(name: &str) -> Instance {
    let host = std::env::var("NEXTOP_TEST_DB_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let user = std::env::var("NEXTOP_TEST_DB_USER").unwrap_or_else(|_| "root".to_string());
    let port = std::env::var("NEXTOP_TEST_DB_PORT")
        .ok()
        .and_then(|raw| raw.parse::<u16>().ok())
        .unwrap_or(3306);

    // The password comes from NEXTOP_DB_PASSWORD when set.
    Instance::new(
        name,
        DbmsKind::Mysql,
        Dsn::new(format!("{user}@tcp({host}:{port})/")),
    )
}

#[tokio::test(flavor = "current_thread")]
async fn backend_connects_pings_and_fetches_every_metric() {
    if !mysql_integration_enabled() {
        return;
    }

    let backend = MysqlBackend;
    let handle = backend
        .connect(&integration_instance("integration"))
        .await
        .expect("connect should succeed");
    backend.ping(&handle).await.expect("ping should succeed");

    let processlist = backend
        .fetch_metric(&handle, MetricKind::Processlist)
        .await
        .expect("processlist should be readable");
    assert!(!processlist.is_empty(), "our own session is listed");
    assert!(processlist
        .iter()
        .all(|row| row.values.len() == MetricKind::Processlist.columns().len()));

    let memory = backend
        .fetch_metric(&handle, MetricKind::MemoryGlobal)
        .await
        .expect("global memory should be readable");
    assert_eq!(memory.len(), 1);

    backend
        .disconnect(handle)
        .await
        .expect("disconnect should succeed");
}

#[tokio::test(flavor = "current_thread")]
async fn wrong_password_leaves_instance_offline_with_redacted_reason() {
    if !mysql_integration_enabled() {
        return;
    }

    let mut instance = integration_instance("bad-password");
    let raw = instance.dsn.expose().replacen('@', ":definitely-wrong@", 1);
    instance.dsn = Dsn::new(raw);

    let registry = InstanceRegistry::new();
    registry.upsert(instance).expect("instance should be valid");
    let manager = ConnectionManager::new(MysqlBackend, registry, Duration::from_secs(5));

    let err = manager
        .connect("bad-password")
        .await
        .expect_err("connect should fail");
    assert!(matches!(err, ConnectionError::Failed { .. }));
    assert!(!err.to_string().contains("definitely-wrong"));
    let entry = manager.registry().get("bad-password").expect("entry");
    assert_eq!(entry.status, InstanceStatus::Offline);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scheduler_publishes_snapshots_from_a_live_server() {
    if !mysql_integration_enabled() {
        return;
    }

    let registry = InstanceRegistry::new();
    registry
        .upsert(integration_instance("live"))
        .expect("instance should be valid");
    let manager = Arc::new(ConnectionManager::new(
        MysqlBackend,
        registry,
        Duration::from_secs(5),
    ));
    manager.connect("live").await.expect("connect should succeed");

    let scheduler = PollingScheduler::new(
        Arc::clone(&manager),
        MetricSnapshotStore::new(),
        PollingConfig::default(),
    );
    scheduler.set_active_kinds([MetricKind::Processlist, MetricKind::StatementCounts]);
    scheduler.run_cycle();

    for _ in 0..50 {
        if scheduler.in_flight_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let snapshot = scheduler
        .store()
        .get("live", MetricKind::Processlist)
        .expect("processlist snapshot");
    assert!(snapshot.fetch_error.is_none(), "{:?}", snapshot.fetch_error);
    manager.shutdown().await;
}
