//! Integration tests for the scoring pipeline
//!
//! These tests verify that:
//! - Scheduled runs score every instance and feed the composite
//! - Rule order decides the category score (first match wins)
//! - Weighted composites land in the right band
//! - Failures and configuration gaps are counted, not fatal
//! - Score and execution events reach subscribers

use std::sync::Arc;
use std::time::Duration;

use dbvitals::{
    actors::messages::{ScoreEvent, TriggerOutcome, TriggerRequest},
    model::{Category, CompareOp, HealthStatus, RunStatus},
    registry::CollectorUpdate,
    storage::{MemoryBackend, StorageBackend},
};
use pretty_assertions::assert_eq;

use crate::helpers::{
    ScriptedProbe, bundle, eventually, fleet_bundles, instance, not_due, rule, start_engine,
    wait_for_execution,
};

const FAST_TICK: Duration = Duration::from_millis(100);
const SLOW_TICK: Duration = Duration::from_secs(3600);

async fn trigger(engine: &dbvitals::actors::Engine, collector: &str) -> i64 {
    match engine
        .scheduler
        .trigger(collector, TriggerRequest::default())
        .await
        .unwrap()
    {
        TriggerOutcome::Accepted { execution_id } => execution_id,
        other => panic!("trigger of {collector} rejected: {other:?}"),
    }
}

#[tokio::test]
async fn test_scheduled_fleet_reaches_composite() {
    let store: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let engine = start_engine(
        store.clone(),
        ScriptedProbe::fleet(),
        vec![instance("sql-01", "16.0"), instance("sql-02", "15.0")],
        fleet_bundles(),
        FAST_TICK,
    )
    .await;

    let store_ref = &store;
    let composite = eventually(|| async move {
        let composite = store_ref.latest_composite("sql-01").await.unwrap()?;
        composite.detail.missing.is_empty().then_some(composite)
    })
    .await;

    assert_eq!(composite.composite, 68.0);
    assert_eq!(composite.status, HealthStatus::Risk);
    assert_eq!(composite.detail.weight_coverage, 100.0);
    assert_eq!(composite.detail.contributions.len(), 5);

    let fleet = eventually(|| async move {
        let fleet = store_ref.latest_composites().await.unwrap();
        (fleet.len() == 2).then_some(fleet)
    })
    .await;
    assert!(fleet.iter().all(|c| c.status == HealthStatus::Risk));

    let summary = engine.scheduler.summary().await.unwrap();
    assert_eq!(summary.total, 5);
    assert_eq!(summary.enabled, 5);
    assert!(summary.last_global_execution.is_some());

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_weighted_pair_composite() {
    let store: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let seeds = vec![
        not_due(bundle(
            "cpu",
            Category::Cpu,
            60,
            vec![rule("busy", 1, CompareOp::Gt, 70.0, 80)],
        )),
        not_due(bundle(
            "memory",
            Category::Memory,
            40,
            vec![rule("pressure", 1, CompareOp::Gt, 85.0, 50)],
        )),
    ];
    let engine = start_engine(
        store.clone(),
        ScriptedProbe::new(&[("cpu", 75.0), ("memory", 88.0)]),
        vec![instance("sql-01", "16.0")],
        seeds,
        SLOW_TICK,
    )
    .await;

    for collector in ["cpu", "memory"] {
        let id = trigger(&engine, collector).await;
        assert_eq!(wait_for_execution(&store, id).await.status, RunStatus::Completed);
    }

    let composite = engine
        .aggregator
        .recompute_now("sql-01")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(composite.composite, 68.0);
    assert_eq!(composite.status, HealthStatus::Risk);
}

#[tokio::test]
async fn test_first_matching_rule_wins() {
    let store: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let backups = bundle(
        "backups",
        Category::Backups,
        100,
        vec![
            rule("day_old", 1, CompareOp::Gt, 24.0, 40),
            rule("hours_old", 2, CompareOp::Gt, 4.0, 80),
        ],
    );
    let engine = start_engine(
        store.clone(),
        ScriptedProbe::new(&[
            ("stale/backups", 30.0),
            ("recent/backups", 10.0),
            ("fresh/backups", 1.0),
        ]),
        vec![
            instance("stale", "16.0"),
            instance("recent", "16.0"),
            instance("fresh", "16.0"),
        ],
        vec![not_due(backups)],
        SLOW_TICK,
    )
    .await;

    let id = trigger(&engine, "backups").await;
    let entry = wait_for_execution(&store, id).await;
    assert_eq!(entry.success_count, 3);

    for (instance_id, expected, matched) in [
        ("stale", 40, Some("day_old")),
        ("recent", 80, Some("hours_old")),
        ("fresh", 100, None),
    ] {
        let scores = store.latest_category_scores(instance_id).await.unwrap();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].score, expected, "score of {instance_id}");
        assert_eq!(scores[0].groups[0].matched_rule.as_deref(), matched);
    }
}

#[tokio::test]
async fn test_failures_and_gaps_are_counted() {
    let store: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let engine = start_engine(
        store.clone(),
        ScriptedProbe::fleet(),
        vec![
            instance("sql-01", "16.0"),
            instance("down", "16.0"),
            // No query covers versions before 13
            instance("legacy", "12.0"),
        ],
        fleet_bundles().into_iter().map(not_due).collect(),
        SLOW_TICK,
    )
    .await;

    let id = trigger(&engine, "cpu").await;
    let entry = wait_for_execution(&store, id).await;

    assert_eq!(entry.status, RunStatus::Completed);
    assert_eq!(entry.success_count, 1);
    assert_eq!(entry.error_count, 1);
    assert_eq!(entry.skipped_count, 1);
    assert_eq!(entry.not_attempted_count, 0);
    assert_eq!(
        entry.error_message.as_deref(),
        Some("1 of 3 instances failed, last error: down: instance unreachable: connection refused")
    );

    assert!(store.latest_category_scores("down").await.unwrap().is_empty());
    assert!(store.latest_category_scores("legacy").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_disabled_category_is_excluded() {
    let store: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let engine = start_engine(
        store.clone(),
        ScriptedProbe::fleet(),
        vec![instance("sql-01", "16.0")],
        fleet_bundles().into_iter().map(not_due).collect(),
        SLOW_TICK,
    )
    .await;

    for collector in ["backups", "cpu", "disk", "memory", "availability"] {
        let id = trigger(&engine, collector).await;
        wait_for_execution(&store, id).await;
    }

    engine
        .scheduler
        .update_collector(
            "cpu",
            CollectorUpdate {
                enabled: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let composite = engine
        .aggregator
        .recompute_now("sql-01")
        .await
        .unwrap()
        .unwrap();

    // (40 + 70 + 60 + 90) / 4
    assert_eq!(composite.composite, 65.0);
    assert_eq!(composite.detail.excluded, vec![Category::Cpu]);
    assert!(composite.detail.missing.is_empty());
}

#[tokio::test]
async fn test_events_reach_subscribers() {
    let store: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let engine = start_engine(
        store.clone(),
        ScriptedProbe::fleet(),
        vec![instance("sql-01", "16.0")],
        fleet_bundles().into_iter().map(not_due).collect(),
        SLOW_TICK,
    )
    .await;
    let mut events = engine.publisher.subscribe();

    let id = trigger(&engine, "disk").await;

    let mut seen_category = false;
    let mut seen_composite = false;
    let mut seen_execution = false;

    tokio::time::timeout(Duration::from_secs(5), async {
        while !(seen_category && seen_composite && seen_execution) {
            match events.recv().await.unwrap() {
                ScoreEvent::Category(score) => {
                    assert_eq!(score.category, Category::Disk);
                    assert_eq!(score.score, 70);
                    seen_category = true;
                }
                ScoreEvent::Composite(composite) => {
                    assert_eq!(composite.instance_id, "sql-01");
                    seen_composite = true;
                }
                ScoreEvent::Execution(entry) => {
                    assert_eq!(entry.id, id);
                    assert_eq!(entry.status, RunStatus::Completed);
                    seen_execution = true;
                }
            }
        }
    })
    .await
    .expect("not every event kind was published");
}
