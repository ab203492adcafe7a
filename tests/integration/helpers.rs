//! Helper functions for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dbvitals::{
    actors::{Engine, EngineOptions},
    model::{
        Category, CollectorConfig, CompareOp, ExecutionId, ExecutionLogEntry, GroupCombine,
        Instance, LastRunSummary, RuleAction, ThresholdRule, VersionQuery, now_millis,
    },
    probe::{MetricProbe, ProbeError, ProbeOutput},
    registry::CollectorBundle,
    storage::StorageBackend,
};
use tokio::sync::Semaphore;

pub fn instance(id: &str, version: &str) -> Instance {
    Instance {
        id: id.to_string(),
        display: Some(format!("Instance {id}")),
        engine_version: version.parse().unwrap(),
        active: true,
    }
}

pub fn rule(name: &str, order: i32, operator: CompareOp, threshold: f64, score: u8) -> ThresholdRule {
    ThresholdRule {
        name: name.to_string(),
        threshold,
        operator,
        score,
        action: if score < 50 {
            RuleAction::Alert
        } else {
            RuleAction::Warn
        },
        default_score: None,
        evaluation_order: order,
        group: None,
        active: true,
    }
}

/// Collector whose query template is its own name
pub fn bundle(name: &str, category: Category, weight: u32, rules: Vec<ThresholdRule>) -> CollectorBundle {
    CollectorBundle {
        config: CollectorConfig {
            name: name.to_string(),
            display_name: name.to_uppercase(),
            enabled: true,
            interval_secs: 3600,
            timeout_secs: 30,
            weight,
            parallel_degree: 4,
            category,
            execution_order: 0,
            default_score: 100,
            group_combine: GroupCombine::Minimum,
            last_run: LastRunSummary::default(),
        },
        rules,
        queries: vec![VersionQuery {
            min_version: "13".parse().unwrap(),
            max_version: None,
            template: name.to_string(),
            priority: 0,
            active: true,
        }],
    }
}

/// Mark a bundle as just run, so the first tick does not start it
pub fn not_due(mut bundle: CollectorBundle) -> CollectorBundle {
    bundle.config.last_run.started_at = Some(now_millis());
    bundle
}

/// The five collectors of the reference fleet, 20% weight each
pub fn fleet_bundles() -> Vec<CollectorBundle> {
    vec![
        bundle(
            "backups",
            Category::Backups,
            20,
            vec![
                rule("critical", 1, CompareOp::Gt, 48.0, 0),
                rule("stale", 2, CompareOp::Gt, 24.0, 40),
            ],
        ),
        bundle(
            "cpu",
            Category::Cpu,
            20,
            vec![
                rule("saturated", 1, CompareOp::Gt, 90.0, 25),
                rule("busy", 2, CompareOp::Gt, 70.0, 80),
            ],
        ),
        bundle(
            "disk",
            Category::Disk,
            20,
            vec![
                rule("full", 1, CompareOp::Lt, 5.0, 10),
                rule("low", 2, CompareOp::Lt, 20.0, 70),
            ],
        ),
        bundle(
            "memory",
            Category::Memory,
            20,
            vec![
                rule("exhausted", 1, CompareOp::Gt, 95.0, 20),
                rule("pressure", 2, CompareOp::Gt, 85.0, 60),
            ],
        ),
        bundle(
            "availability",
            Category::Availability,
            20,
            vec![
                rule("degraded", 1, CompareOp::Ge, 2.0, 50),
                rule("impaired", 2, CompareOp::Ge, 1.0, 90),
            ],
        ),
    ]
}

/// Probe answering `{"value": x}` where x is looked up by `instance/query`,
/// then by query template alone
///
/// An optional gate holds every probe call until a permit is released.
/// Instances named `boom` make the probe panic, `down` make it fail.
#[derive(Default)]
pub struct ScriptedProbe {
    values: HashMap<String, f64>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedProbe {
    pub fn new(values: &[(&str, f64)]) -> Self {
        Self {
            values: values
                .iter()
                .map(|(query, value)| (query.to_string(), *value))
                .collect(),
            gate: None,
        }
    }

    /// Values of the reference fleet: composite 68, status risk
    pub fn fleet() -> Self {
        Self::new(&[
            ("backups", 30.0),
            ("cpu", 75.0),
            ("disk", 15.0),
            ("memory", 88.0),
            ("availability", 1.0),
        ])
    }

    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(gate.clone());
        (self, gate)
    }
}

#[async_trait]
impl MetricProbe for ScriptedProbe {
    async fn probe(&self, instance: &Instance, query: &str) -> Result<ProbeOutput, ProbeError> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        match instance.id.as_str() {
            "boom" => panic!("probe exploded"),
            "down" => return Err(ProbeError::Unreachable("connection refused".to_string())),
            _ => {}
        }

        self.values
            .get(&format!("{}/{query}", instance.id))
            .or_else(|| self.values.get(query))
            .map(|value| ProbeOutput::value("value", *value))
            .ok_or_else(|| ProbeError::Rejected(format!("unknown query {query}")))
    }
}

pub async fn start_engine(
    store: Arc<dyn StorageBackend>,
    probe: impl MetricProbe + 'static,
    instances: Vec<Instance>,
    seeds: Vec<CollectorBundle>,
    tick: Duration,
) -> Engine {
    Engine::start(EngineOptions {
        store,
        probe: Arc::new(probe),
        instances,
        seeds,
        tick,
        event_capacity: 256,
    })
    .await
    .unwrap()
}

/// Poll until the execution is finalized
pub async fn wait_for_execution(
    store: &Arc<dyn StorageBackend>,
    id: ExecutionId,
) -> ExecutionLogEntry {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(entry) = store.get_execution(id).await.unwrap()
                && entry.status.is_terminal()
            {
                return entry;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("execution was not finalized in time")
}

/// Poll an async condition until it yields a value
pub async fn eventually<T, F, Fut>(mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(value) = check().await {
                return value;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not met in time")
}
