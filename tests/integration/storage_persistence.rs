//! Integration tests for storage persistence
//!
//! These tests verify that:
//! - Runs, scores and composites are persisted to the SQLite backend
//! - Admin edits survive a restart and seeds do not overwrite them
//! - Last-run summaries are restored with the collectors
//! - Retention cleanup removes old scores but keeps the execution log

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dbvitals::{
    actors::messages::{TriggerOutcome, TriggerRequest},
    model::{Category, ExecutionFilter, RunStatus},
    registry::CollectorUpdate,
    storage::{QueryRange, StorageBackend, retention::run_cleanup, sqlite::SqliteBackend},
};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use crate::helpers::{
    ScriptedProbe, eventually, fleet_bundles, instance, not_due, start_engine, wait_for_execution,
};

const SLOW_TICK: Duration = Duration::from_secs(3600);

#[tokio::test]
async fn test_run_results_are_persisted() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("dbvitals.db");

    let store: Arc<dyn StorageBackend> = Arc::new(SqliteBackend::new(&db_path).await.unwrap());
    let engine = start_engine(
        store.clone(),
        ScriptedProbe::fleet(),
        vec![instance("sql-01", "16.0"), instance("sql-02", "16.0")],
        fleet_bundles().into_iter().map(not_due).collect(),
        SLOW_TICK,
    )
    .await;

    let TriggerOutcome::Accepted { execution_id } = engine
        .scheduler
        .trigger("memory", TriggerRequest::default())
        .await
        .unwrap()
    else {
        panic!("trigger rejected");
    };
    let entry = wait_for_execution(&store, execution_id).await;
    assert_eq!(entry.status, RunStatus::Completed);
    assert_eq!(entry.success_count, 2);
    assert!(entry.duration_ms.is_some());

    let range = QueryRange {
        instance_id: "sql-01".to_string(),
        start: Utc::now() - chrono::Duration::hours(1),
        end: Utc::now() + chrono::Duration::minutes(1),
        limit: None,
    };
    let history = store
        .query_category_scores(&range, Category::Memory)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].score, 60);

    let store_ref = &store;
    let composite = eventually(|| async move {
        store_ref.latest_composite("sql-02").await.unwrap()
    })
    .await;
    assert_eq!(composite.composite, 60.0);
    assert_eq!(composite.detail.missing.len(), 4);

    engine.shutdown().await.unwrap();
    store.close().await.unwrap();
}

#[tokio::test]
async fn test_admin_edits_survive_restart() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("dbvitals.db");

    {
        let store: Arc<dyn StorageBackend> =
            Arc::new(SqliteBackend::new(&db_path).await.unwrap());
        let engine = start_engine(
            store.clone(),
            ScriptedProbe::fleet(),
            vec![instance("sql-01", "16.0")],
            fleet_bundles().into_iter().map(not_due).collect(),
            SLOW_TICK,
        )
        .await;

        let view = engine
            .scheduler
            .update_collector(
                "disk",
                CollectorUpdate {
                    weight: Some(35),
                    interval_secs: Some(120),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(view.bundle.config.weight, 35);

        let TriggerOutcome::Accepted { execution_id } = engine
            .scheduler
            .trigger("disk", TriggerRequest::default())
            .await
            .unwrap()
        else {
            panic!("trigger rejected");
        };
        wait_for_execution(&store, execution_id).await;

        // Wait until the scheduler recorded the last run
        let scheduler = &engine.scheduler;
        eventually(|| async move {
            let view = scheduler.get_collector("disk").await.unwrap()?;
            view.bundle.config.last_run.status.map(|_| ())
        })
        .await;

        engine.shutdown().await.unwrap();
        store.close().await.unwrap();
    }

    // Restart with the same seeds: stored configuration wins
    let store: Arc<dyn StorageBackend> = Arc::new(SqliteBackend::new(&db_path).await.unwrap());
    let engine = start_engine(
        store.clone(),
        ScriptedProbe::fleet(),
        vec![instance("sql-01", "16.0")],
        fleet_bundles().into_iter().map(not_due).collect(),
        SLOW_TICK,
    )
    .await;

    let disk = engine.scheduler.get_collector("disk").await.unwrap().unwrap();
    assert_eq!(disk.bundle.config.weight, 35);
    assert_eq!(disk.bundle.config.interval_secs, 120);
    assert_eq!(disk.bundle.config.last_run.status, Some(RunStatus::Completed));
    assert_eq!(disk.bundle.config.last_run.instances_processed, 1);
    assert_eq!(disk.bundle.rules.len(), 2);

    let log = store
        .query_executions(&ExecutionFilter {
            collector: Some("disk".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(log.len(), 1);
}

#[tokio::test]
async fn test_retention_keeps_execution_log() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("dbvitals.db");

    let store: Arc<dyn StorageBackend> = Arc::new(SqliteBackend::new(&db_path).await.unwrap());
    let engine = start_engine(
        store.clone(),
        ScriptedProbe::fleet(),
        vec![instance("sql-01", "16.0")],
        fleet_bundles().into_iter().map(not_due).collect(),
        SLOW_TICK,
    )
    .await;

    let TriggerOutcome::Accepted { execution_id } = engine
        .scheduler
        .trigger("cpu", TriggerRequest::default())
        .await
        .unwrap()
    else {
        panic!("trigger rejected");
    };
    wait_for_execution(&store, execution_id).await;

    // Nothing is older than a day yet
    assert_eq!(run_cleanup(store.as_ref(), 1).await, 0);
    assert_eq!(store.latest_category_scores("sql-01").await.unwrap().len(), 1);

    // Zero retention purges every score row
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(run_cleanup(store.as_ref(), 0).await >= 1);
    assert!(store.latest_category_scores("sql-01").await.unwrap().is_empty());
    assert!(store.get_execution(execution_id).await.unwrap().is_some());
}
