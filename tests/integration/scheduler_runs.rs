//! Integration tests for scheduling and manual triggers
//!
//! These tests verify that:
//! - A second trigger while a run is in progress is rejected
//! - Exactly one log entry is written per accepted run
//! - Disabled collectors only run when forced
//! - Overlapping ticks are counted and flagged
//! - A panicking run is still finalized and releases its collector

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use dbvitals::{
    actors::messages::{SchedulerError, TriggerOutcome, TriggerRequest},
    model::{Category, ExecutionFilter, RunStatus, TriggerType},
    registry::CollectorUpdate,
    storage::{MemoryBackend, StorageBackend},
};
use pretty_assertions::assert_eq;
use tokio_test::assert_ok;

use crate::helpers::{
    ScriptedProbe, fleet_bundles, instance, not_due, start_engine, wait_for_execution,
};

const SLOW_TICK: Duration = Duration::from_secs(3600);

fn cpu_only() -> Vec<dbvitals::registry::CollectorBundle> {
    fleet_bundles()
        .into_iter()
        .filter(|b| b.name() == "cpu")
        .map(not_due)
        .collect()
}

#[tokio::test]
async fn test_second_trigger_rejected_while_running() {
    let store: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let (probe, gate) = ScriptedProbe::fleet().gated();
    let engine = start_engine(
        store.clone(),
        probe,
        vec![instance("sql-01", "16.0")],
        cpu_only(),
        SLOW_TICK,
    )
    .await;

    let first = assert_ok!(
        engine
            .scheduler
            .trigger(
                "cpu",
                TriggerRequest {
                    triggered_by: Some("alice".to_string()),
                    ..Default::default()
                },
            )
            .await
    );
    let TriggerOutcome::Accepted { execution_id } = first else {
        panic!("expected the first trigger to be accepted, got {first:?}");
    };

    let second = engine
        .scheduler
        .trigger("cpu", TriggerRequest::default())
        .await
        .unwrap();
    assert_eq!(second, TriggerOutcome::AlreadyRunning { execution_id });

    let view = engine.scheduler.get_collector("cpu").await.unwrap().unwrap();
    assert_eq!(view.running.map(|m| m.execution_id), Some(execution_id));

    gate.add_permits(1);
    let entry = wait_for_execution(&store, execution_id).await;
    assert_eq!(entry.status, RunStatus::Completed);
    assert_eq!(entry.trigger, TriggerType::Manual);
    assert_eq!(entry.triggered_by.as_deref(), Some("alice"));
    assert_eq!(entry.success_count, 1);

    let all = store
        .query_executions(&ExecutionFilter {
            collector: Some("cpu".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn test_collector_released_after_run() {
    let store: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let engine = start_engine(
        store.clone(),
        ScriptedProbe::fleet(),
        vec![instance("sql-01", "16.0")],
        cpu_only(),
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

    let scheduler = &engine.scheduler;
    let view = crate::helpers::eventually(|| async move {
        let view = scheduler.get_collector("cpu").await.unwrap()?;
        view.running.is_none().then_some(view)
    })
    .await;
    assert_eq!(view.bundle.config.last_run.status, Some(RunStatus::Completed));
    assert_eq!(view.bundle.config.last_run.instances_processed, 1);

    let again = engine
        .scheduler
        .trigger("cpu", TriggerRequest::default())
        .await
        .unwrap();
    assert_matches!(again, TriggerOutcome::Accepted { execution_id: id } if id != execution_id);
}

#[tokio::test]
async fn test_disabled_collector_requires_force() {
    let store: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let mut seeds = cpu_only();
    seeds[0].config.enabled = false;

    let engine = start_engine(
        store.clone(),
        ScriptedProbe::fleet(),
        vec![instance("sql-01", "16.0")],
        seeds,
        SLOW_TICK,
    )
    .await;

    let plain = engine
        .scheduler
        .trigger("cpu", TriggerRequest::default())
        .await
        .unwrap();
    assert_eq!(plain, TriggerOutcome::Disabled);

    let forced = engine
        .scheduler
        .trigger(
            "cpu",
            TriggerRequest {
                force: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let TriggerOutcome::Accepted { execution_id } = forced else {
        panic!("forced trigger rejected: {forced:?}");
    };
    assert_eq!(
        wait_for_execution(&store, execution_id).await.status,
        RunStatus::Completed
    );
}

#[tokio::test]
async fn test_trigger_errors() {
    let store: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let engine = start_engine(
        store.clone(),
        ScriptedProbe::fleet(),
        vec![instance("sql-01", "16.0")],
        cpu_only(),
        SLOW_TICK,
    )
    .await;

    let unknown = engine
        .scheduler
        .trigger("nope", TriggerRequest::default())
        .await;
    assert_matches!(unknown, Err(SchedulerError::UnknownCollector(name)) if name == "nope");

    let bad_pattern = engine
        .scheduler
        .trigger(
            "cpu",
            TriggerRequest {
                name_pattern: Some("sql-(".to_string()),
                ..Default::default()
            },
        )
        .await;
    assert_matches!(bad_pattern, Err(SchedulerError::InvalidFilter(_)));

    // Rejected triggers leave no trace in the log
    assert!(
        store
            .query_executions(&ExecutionFilter::default())
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_trigger_filters_instances() {
    let store: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let engine = start_engine(
        store.clone(),
        ScriptedProbe::fleet(),
        vec![
            instance("sql-01", "16.0"),
            instance("sql-02", "16.0"),
            instance("dw-01", "15.0"),
        ],
        cpu_only(),
        SLOW_TICK,
    )
    .await;

    let TriggerOutcome::Accepted { execution_id } = engine
        .scheduler
        .trigger(
            "cpu",
            TriggerRequest {
                name_pattern: Some("^sql-".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap()
    else {
        panic!("trigger rejected");
    };

    let entry = wait_for_execution(&store, execution_id).await;
    assert_eq!(entry.success_count, 2);

    let scored = store.latest_category_scores("dw-01").await.unwrap();
    assert!(scored.is_empty());
}

#[tokio::test]
async fn test_overlapping_ticks_are_flagged() {
    let store: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let (probe, gate) = ScriptedProbe::fleet().gated();

    let mut seeds: Vec<_> = fleet_bundles()
        .into_iter()
        .filter(|b| b.name() == "cpu")
        .collect();
    seeds[0].config.interval_secs = 1;

    let engine = start_engine(
        store.clone(),
        probe,
        vec![instance("sql-01", "16.0")],
        seeds,
        Duration::from_millis(100),
    )
    .await;

    // The first tick starts the run, every tick after one interval overlaps
    let scheduler = &engine.scheduler;
    let view = crate::helpers::eventually(|| async move {
        let view = scheduler.get_collector("cpu").await.unwrap()?;
        view.overlap_warning.then_some(view)
    })
    .await;
    assert!(view.consecutive_overlaps >= 3);
    let execution_id = view.running.map(|m| m.execution_id).unwrap();

    // A manual trigger is not queued behind the scheduled run
    let manual = engine
        .scheduler
        .trigger("cpu", TriggerRequest::default())
        .await
        .unwrap();
    assert_eq!(manual, TriggerOutcome::AlreadyRunning { execution_id });

    let running = store
        .query_executions(&ExecutionFilter {
            status: Some(RunStatus::Running),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(running.len(), 1);

    gate.add_permits(1);
    let entry = wait_for_execution(&store, execution_id).await;
    assert_eq!(entry.trigger, TriggerType::Scheduled);

    let scheduler = &engine.scheduler;
    crate::helpers::eventually(|| async move {
        let view = scheduler.get_collector("cpu").await.unwrap()?;
        (view.running.map(|m| m.execution_id) != Some(execution_id)).then_some(())
    })
    .await;

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_panicking_run_is_finalized() {
    let store: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let engine = start_engine(
        store.clone(),
        ScriptedProbe::fleet(),
        vec![instance("boom", "16.0")],
        cpu_only(),
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

    let entry = wait_for_execution(&store, execution_id).await;
    assert_eq!(entry.status, RunStatus::Error);
    assert!(entry.finished_at.is_some());
    assert!(
        entry
            .error_message
            .as_deref()
            .is_some_and(|msg| msg.contains("run task failed")),
        "unexpected message: {:?}",
        entry.error_message
    );

    let scheduler = &engine.scheduler;
    let view = crate::helpers::eventually(|| async move {
        let view = scheduler.get_collector("cpu").await.unwrap()?;
        view.running.is_none().then_some(view)
    })
    .await;
    assert_eq!(view.bundle.config.last_run.status, Some(RunStatus::Error));
}

#[tokio::test]
async fn test_enabling_second_collector_for_category_rejected() {
    let store: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let mut waits = not_due(crate::helpers::bundle("cpu_waits", Category::Cpu, 10, vec![]));
    waits.config.enabled = false;
    let mut seeds = cpu_only();
    seeds.push(waits);

    let engine = start_engine(
        store.clone(),
        ScriptedProbe::fleet(),
        vec![instance("sql-01", "16.0")],
        seeds,
        SLOW_TICK,
    )
    .await;

    let result = engine
        .scheduler
        .update_collector(
            "cpu_waits",
            CollectorUpdate {
                enabled: Some(true),
                ..Default::default()
            },
        )
        .await;
    assert_matches!(result, Err(SchedulerError::Invalid(msg)) if msg.contains("'cpu'"));

    let view = engine.scheduler.get_collector("cpu_waits").await.unwrap().unwrap();
    assert!(!view.bundle.config.enabled);

    let stored = store.load_collectors().await.unwrap();
    let waits = stored.iter().find(|b| b.name() == "cpu_waits").unwrap();
    assert!(!waits.config.enabled);
}
