//! CollectorRun - one execution of a collector against the fleet
//!
//! ## Message Flow
//!
//! ```text
//! for each instance (at most `parallel_degree` in flight):
//!     resolve query → probe → evaluate → persist score → publish + notify aggregator
//! ```
//!
//! Instances fail independently: a probe error marks that instance as errored
//! and the run continues. The whole run is bounded by `timeout_secs`; when the
//! deadline fires the probe stream is dropped, which cancels in-flight and
//! pending probes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, instrument, trace, warn};

use super::aggregator::AggregatorHandle;
use super::messages::ScoreEvent;
use super::publisher::Publisher;
use crate::detail::CategoryDetail;
use crate::model::{CategoryScore, ExecutionId, ExecutionOutcome, Instance, RunStatus, now_millis};
use crate::probe::MetricProbe;
use crate::registry::CollectorBundle;
use crate::scoring::{QueryResolver, ThresholdEvaluator};
use crate::storage::{StorageBackend, StorageResult};

/// Shared collaborators of every run
#[derive(Clone)]
pub struct RunContext {
    pub store: Arc<dyn StorageBackend>,
    pub probe: Arc<dyn MetricProbe>,
    pub aggregator: AggregatorHandle,
    pub publisher: Publisher,
}

/// What happened to one instance
#[derive(Debug, Clone, PartialEq)]
pub enum InstanceOutcome {
    Success,
    /// Configuration gap: no query for the engine version or no evaluable metric
    Skipped,
    Error(String),
}

/// Running counts of a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunTally {
    pub total: u32,
    pub success: u32,
    pub error: u32,
    pub skipped: u32,
    pub timed_out: bool,
    /// The run task died before reporting
    pub aborted: bool,
    pub last_error: Option<String>,
}

impl RunTally {
    pub fn new(total: usize) -> Self {
        Self {
            total: total as u32,
            ..Default::default()
        }
    }

    /// Tally of a run task that died before reporting
    pub fn aborted(total: u32, reason: String) -> Self {
        Self {
            total,
            aborted: true,
            last_error: Some(reason),
            ..Default::default()
        }
    }

    pub fn record(&mut self, outcome: InstanceOutcome) {
        match outcome {
            InstanceOutcome::Success => self.success += 1,
            InstanceOutcome::Skipped => self.skipped += 1,
            InstanceOutcome::Error(message) => {
                self.error += 1;
                self.last_error = Some(message);
            }
        }
    }

    /// Instances without an outcome when the deadline fired
    ///
    /// An instance whose score insert was already under way still counts
    /// here, although its score is stored and aggregated.
    pub fn not_attempted(&self) -> u32 {
        self.total
            .saturating_sub(self.success + self.error + self.skipped)
    }

    /// Overall status of the run
    ///
    /// `TimedOut` if the deadline fired, `Error` if instances failed and none
    /// succeeded or the task died, `Completed` otherwise.
    pub fn status(&self) -> RunStatus {
        if self.timed_out {
            RunStatus::TimedOut
        } else if self.aborted || (self.error > 0 && self.success == 0) {
            RunStatus::Error
        } else {
            RunStatus::Completed
        }
    }

    pub fn outcome(&self, finished_at: DateTime<Utc>) -> ExecutionOutcome {
        let status = self.status();
        let error_message = match (&self.last_error, status) {
            (Some(last), _) if self.error > 0 => Some(format!(
                "{} of {} instances failed, last error: {last}",
                self.error, self.total
            )),
            (Some(reason), _) => Some(reason.clone()),
            (None, RunStatus::TimedOut) => Some(format!(
                "run timed out with {} instances not attempted",
                self.not_attempted()
            )),
            (None, _) => None,
        };

        ExecutionOutcome {
            finished_at,
            status: Some(status),
            success_count: self.success,
            error_count: self.error,
            skipped_count: self.skipped,
            not_attempted_count: self.not_attempted(),
            error_message,
        }
    }
}

/// One accepted run of a collector
pub struct CollectorRun {
    bundle: CollectorBundle,
    instances: Vec<Instance>,
    execution_id: ExecutionId,
    ctx: RunContext,
}

impl CollectorRun {
    pub fn new(
        bundle: CollectorBundle,
        instances: Vec<Instance>,
        execution_id: ExecutionId,
        ctx: RunContext,
    ) -> Self {
        Self {
            bundle,
            instances,
            execution_id,
            ctx,
        }
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Process every instance within the deadline and return the tally
    ///
    /// The caller finalizes the execution log entry.
    #[instrument(skip(self), fields(collector = %self.bundle.name(), execution = self.execution_id))]
    pub async fn execute(self) -> RunTally {
        let config = &self.bundle.config;
        let deadline = Instant::now() + Duration::from_secs(config.timeout_secs);
        let evaluator = self.bundle.evaluator();
        let resolver = self.bundle.resolver();

        debug!(
            "running against {} instances, parallel degree {}",
            self.instances.len(),
            config.parallel_degree
        );

        let mut tally = RunTally::new(self.instances.len());

        let pending: Vec<_> = self
            .instances
            .iter()
            .map(|instance| self.process_instance(instance, &evaluator, &resolver))
            .collect();
        let mut outcomes = stream::iter(pending).buffer_unordered(config.parallel_degree.max(1));

        let drain = async {
            while let Some(outcome) = outcomes.next().await {
                tally.record(outcome);
            }
        };

        if timeout_at(deadline, drain).await.is_err() {
            tally.timed_out = true;
            warn!(
                "run timed out after {}s, {} instances not attempted",
                config.timeout_secs,
                tally.not_attempted()
            );
        }

        debug!(
            "run done: {} ok, {} errors, {} skipped",
            tally.success, tally.error, tally.skipped
        );
        tally
    }

    #[instrument(skip_all, fields(instance = %instance.id))]
    async fn process_instance(
        &self,
        instance: &Instance,
        evaluator: &ThresholdEvaluator,
        resolver: &QueryResolver,
    ) -> InstanceOutcome {
        let config = &self.bundle.config;

        let Some(query) = resolver.resolve(&instance.engine_version) else {
            debug!("no query for engine version {}, skipping", instance.engine_version);
            return InstanceOutcome::Skipped;
        };

        let output = match self.ctx.probe.probe(instance, &query.template).await {
            Ok(output) => output,
            Err(e) => {
                warn!("probe failed: {e}");
                return InstanceOutcome::Error(format!("{}: {e}", instance.id));
            }
        };

        let Some(evaluation) = evaluator.evaluate(&output.values) else {
            debug!("no evaluable metric in probe output, skipping");
            return InstanceOutcome::Skipped;
        };

        let detail = match output.detail {
            Some(detail) if detail.fits(config.category) => detail,
            Some(_) | None => CategoryDetail::Generic {
                values: output.values,
            },
        };

        let score = CategoryScore {
            instance_id: instance.id.clone(),
            category: config.category,
            collector: config.name.clone(),
            collected_at: now_millis(),
            score: evaluation.score,
            breached: evaluation.breached(),
            groups: evaluation.groups,
            detail,
        };

        trace!("scored {} ({})", score.score, evaluation.action.as_str());

        // Detached from the run: once the insert starts, the aggregator is
        // notified even if the deadline fires meanwhile
        match tokio::spawn(persist_score(self.ctx.clone(), score)).await {
            Ok(Ok(())) => InstanceOutcome::Success,
            Ok(Err(e)) => {
                warn!("failed to persist category score: {e}");
                InstanceOutcome::Error(format!("{}: {e}", instance.id))
            }
            Err(e) => InstanceOutcome::Error(format!("{}: persist task failed: {e}", instance.id)),
        }
    }
}

/// Store a category score, then notify the aggregator and subscribers
async fn persist_score(ctx: RunContext, score: CategoryScore) -> StorageResult<()> {
    ctx.store.insert_category_score(&score).await?;
    ctx.aggregator.notify(&score.instance_id);
    ctx.publisher.publish(ScoreEvent::Category(score));
    Ok(())
}
