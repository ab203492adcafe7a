//! SchedulerActor - decides when collectors run
//!
//! The scheduler is the single owner of the collector registry and of the
//! per-collector run markers. Every tick it starts the collectors that are
//! due; manual triggers and admin edits arrive as commands on the same
//! channel, so they never race with run bookkeeping.
//!
//! ## Run lifecycle
//!
//! ```text
//! Idle ──(due / trigger)──> Running ──(run task ends)──> {Completed, Error, TimedOut} ──> Idle
//!          │                                                   │
//!          └─ start_execution (log entry opened)               └─ finish_execution + RunFinished
//! ```
//!
//! The run task is wrapped in a supervising task, so a panicking run still
//! finalizes its log entry (status `Error`) and releases the collector.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument, warn};

use super::collector::{CollectorRun, RunContext, RunTally};
use super::messages::{
    CollectorView, InstanceFilter, RunMarker, ScoreEvent, SchedulerCommand, SchedulerError,
    SchedulerSummary, TriggerOutcome, TriggerRequest,
};
use crate::model::{
    CollectorConfig, ExecutionLogEntry, Instance, LastRunSummary, NewExecution, ThresholdRule,
    TriggerType, VersionQuery, now_millis,
};
use crate::registry::{CollectorBundle, CollectorRegistry, CollectorUpdate};
use crate::scoring::WeightTable;

/// Consecutive overlaps after which a collector is flagged
pub const OVERLAP_WARNING_THRESHOLD: u32 = 3;

/// Default supervisory tick
pub const DEFAULT_TICK: Duration = Duration::from_secs(5);

/// Whether a collector should start on this tick
pub fn is_due(config: &CollectorConfig, running: bool, now: DateTime<Utc>) -> bool {
    config.enabled && !running && interval_elapsed(config, now)
}

fn interval_elapsed(config: &CollectorConfig, now: DateTime<Utc>) -> bool {
    config.last_run.started_at.is_none_or(|started| {
        now - started >= chrono::Duration::seconds(config.interval_secs as i64)
    })
}

#[derive(Debug, Default)]
struct CollectorState {
    running: Option<RunMarker>,
    consecutive_overlaps: u32,
}

pub struct SchedulerActor {
    registry: CollectorRegistry,
    states: HashMap<String, CollectorState>,
    instances: Vec<Instance>,
    ctx: RunContext,

    /// Publishes the weight table to the aggregator
    weights_tx: watch::Sender<WeightTable>,

    command_rx: mpsc::Receiver<SchedulerCommand>,

    /// Used by run tasks to report completion, weak so that dropping every
    /// handle still closes the channel
    completion_tx: mpsc::WeakSender<SchedulerCommand>,

    tick: Duration,
    last_global_execution: Option<DateTime<Utc>>,
}

impl SchedulerActor {
    pub fn new(
        registry: CollectorRegistry,
        instances: Vec<Instance>,
        ctx: RunContext,
        weights_tx: watch::Sender<WeightTable>,
        command_rx: mpsc::Receiver<SchedulerCommand>,
        completion_tx: mpsc::WeakSender<SchedulerCommand>,
        tick: Duration,
    ) -> Self {
        let last_global_execution = registry
            .ordered()
            .iter()
            .filter_map(|bundle| bundle.config.last_run.started_at)
            .max();

        Self {
            registry,
            states: HashMap::new(),
            instances,
            ctx,
            weights_tx,
            command_rx,
            completion_tx,
            tick,
            last_global_execution,
        }
    }

    /// Run the actor's main loop
    ///
    /// This runs until a Shutdown command is received or every handle is
    /// dropped. Runs in progress keep going and finalize their log entries.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        info!(
            "starting scheduler with {} collectors and {} instances",
            self.registry.len(),
            self.instances.len()
        );

        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_due(now_millis()).await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    if !self.handle_command(cmd).await {
                        break;
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("scheduler actor stopped");
    }

    /// Returns false when the actor should stop
    async fn handle_command(&mut self, cmd: SchedulerCommand) -> bool {
        match cmd {
            SchedulerCommand::Trigger {
                collector,
                request,
                respond_to,
            } => {
                let result = self.trigger(&collector, request).await;
                let _ = respond_to.send(result);
            }

            SchedulerCommand::RunFinished { entry } => self.run_finished(entry).await,

            SchedulerCommand::ListCollectors { respond_to } => {
                let views = self
                    .registry
                    .ordered()
                    .into_iter()
                    .map(|bundle| self.view(bundle))
                    .collect();
                let _ = respond_to.send(views);
            }

            SchedulerCommand::GetCollector { name, respond_to } => {
                let view = self.registry.get(&name).map(|bundle| self.view(bundle));
                let _ = respond_to.send(view);
            }

            SchedulerCommand::Summary { respond_to } => {
                let _ = respond_to.send(self.summary());
            }

            SchedulerCommand::UpdateCollector {
                name,
                update,
                respond_to,
            } => {
                let result = self.edit(&name, |bundle| update.apply(&mut bundle.config)).await;
                let _ = respond_to.send(result);
            }

            SchedulerCommand::ReplaceRules {
                name,
                rules,
                respond_to,
            } => {
                let result = self.edit(&name, |bundle| bundle.rules = rules).await;
                let _ = respond_to.send(result);
            }

            SchedulerCommand::UpsertRule {
                name,
                rule,
                respond_to,
            } => {
                let result = self
                    .edit(&name, |bundle| {
                        match bundle.rules.iter_mut().find(|r| r.name == rule.name) {
                            Some(existing) => *existing = rule,
                            None => bundle.rules.push(rule),
                        }
                    })
                    .await;
                let _ = respond_to.send(result);
            }

            SchedulerCommand::ReplaceQueries {
                name,
                queries,
                respond_to,
            } => {
                let result = self.edit(&name, |bundle| bundle.queries = queries).await;
                let _ = respond_to.send(result);
            }

            SchedulerCommand::Shutdown => {
                debug!("received shutdown command");
                return false;
            }
        }
        true
    }

    /// Start every due collector, in execution order
    async fn run_due(&mut self, now: DateTime<Utc>) {
        // (name, overlapping): due collectors plus the ones that would be due
        // if their previous run had finished
        let candidates: Vec<(String, bool)> = self
            .registry
            .ordered()
            .iter()
            .filter_map(|bundle| {
                let running = self.is_running(bundle.name());
                if is_due(&bundle.config, running, now) {
                    Some((bundle.name().to_string(), false))
                } else if running && is_due(&bundle.config, false, now) {
                    Some((bundle.name().to_string(), true))
                } else {
                    None
                }
            })
            .collect();

        for (name, overlapping) in candidates {
            if overlapping {
                self.record_overlap(&name);
                continue;
            }

            if let Err(e) = self
                .start_run(&name, TriggerType::Scheduled, None, &InstanceFilter::default())
                .await
            {
                // Retried on the next tick
                error!("failed to start scheduled run of {name}: {e}");
            }
        }
    }

    fn record_overlap(&mut self, name: &str) {
        let state = self.states.entry(name.to_string()).or_default();
        state.consecutive_overlaps += 1;

        if state.consecutive_overlaps >= OVERLAP_WARNING_THRESHOLD {
            warn!(
                "{name} is still running, skipped {} ticks in a row",
                state.consecutive_overlaps
            );
        } else {
            debug!("{name} is still running, skipping this tick");
        }
    }

    fn is_running(&self, name: &str) -> bool {
        self.states
            .get(name)
            .is_some_and(|state| state.running.is_some())
    }

    async fn trigger(
        &mut self,
        name: &str,
        request: TriggerRequest,
    ) -> Result<TriggerOutcome, SchedulerError> {
        let bundle = self
            .registry
            .get(name)
            .ok_or_else(|| SchedulerError::UnknownCollector(name.to_string()))?;

        let filter = InstanceFilter::new(request.instance_ids, request.name_pattern.as_deref())?;

        if !bundle.config.enabled && !request.force {
            debug!("manual trigger of disabled collector {name} rejected");
            return Ok(TriggerOutcome::Disabled);
        }

        if let Some(marker) = self.states.get(name).and_then(|s| s.running.as_ref()) {
            return Ok(TriggerOutcome::AlreadyRunning {
                execution_id: marker.execution_id,
            });
        }

        let entry = self
            .start_run(name, TriggerType::Manual, request.triggered_by, &filter)
            .await?;

        info!("manual run #{} of {name} accepted", entry.id);
        Ok(TriggerOutcome::Accepted {
            execution_id: entry.id,
        })
    }

    /// Open the log entry, mark the collector running and spawn the run task
    #[instrument(skip(self, filter))]
    async fn start_run(
        &mut self,
        name: &str,
        trigger: TriggerType,
        triggered_by: Option<String>,
        filter: &InstanceFilter,
    ) -> Result<ExecutionLogEntry, SchedulerError> {
        let bundle = self
            .registry
            .get_mut(name)
            .ok_or_else(|| SchedulerError::UnknownCollector(name.to_string()))?;

        let new = NewExecution {
            collector: name.to_string(),
            started_at: now_millis(),
            trigger,
            triggered_by,
        };
        let entry = self.ctx.store.start_execution(&new).await?;

        bundle.config.last_run.started_at = Some(entry.started_at);
        let snapshot = bundle.clone();

        self.last_global_execution = Some(entry.started_at);
        self.states.entry(name.to_string()).or_default().running = Some(RunMarker {
            execution_id: entry.id,
            started_at: entry.started_at,
            trigger,
        });

        let instances: Vec<Instance> = self
            .instances
            .iter()
            .filter(|instance| instance.active && filter.matches(instance))
            .cloned()
            .collect();

        debug!(
            "starting run #{} against {} instances",
            entry.id,
            instances.len()
        );

        let run = CollectorRun::new(snapshot, instances, entry.id, self.ctx.clone());
        self.spawn_supervised(run, entry.clone());

        Ok(entry)
    }

    fn spawn_supervised(&self, run: CollectorRun, entry: ExecutionLogEntry) {
        let ctx = self.ctx.clone();
        let completion_tx = self.completion_tx.clone();
        let total = run.instance_count() as u32;

        tokio::spawn(async move {
            let tally = match tokio::spawn(run.execute()).await {
                Ok(tally) => tally,
                Err(e) => {
                    error!("run #{} of {} died: {e}", entry.id, entry.collector);
                    RunTally::aborted(total, format!("run task failed: {e}"))
                }
            };

            let outcome = tally.outcome(now_millis());
            let mut finished = entry.clone();
            finished.finalize(&outcome);

            match ctx.store.finish_execution(entry.id, &outcome).await {
                Ok(stored) => finished = stored,
                Err(e) => error!("failed to finalize execution #{}: {e}", entry.id),
            }

            ctx.publisher.publish(ScoreEvent::Execution(finished.clone()));

            match completion_tx.upgrade() {
                Some(tx) => {
                    if tx
                        .send(SchedulerCommand::RunFinished { entry: finished })
                        .await
                        .is_err()
                    {
                        debug!("scheduler stopped before run #{} finished", entry.id);
                    }
                }
                None => debug!("scheduler gone, run #{} not reported", entry.id),
            }
        });
    }

    async fn run_finished(&mut self, entry: ExecutionLogEntry) {
        let state = self.states.entry(entry.collector.clone()).or_default();
        if state
            .running
            .as_ref()
            .is_some_and(|marker| marker.execution_id == entry.id)
        {
            state.running = None;
        }
        state.consecutive_overlaps = 0;

        let summary = LastRunSummary {
            started_at: Some(entry.started_at),
            finished_at: entry.finished_at,
            duration_ms: entry.duration_ms,
            instances_processed: entry.instances_processed(),
            status: Some(entry.status),
            last_error: entry.error_message.clone(),
        };

        info!(
            "run #{} of {} finished: {} ({} ok, {} errors, {} skipped, {} not attempted)",
            entry.id,
            entry.collector,
            entry.status,
            entry.success_count,
            entry.error_count,
            entry.skipped_count,
            entry.not_attempted_count
        );

        if let Some(bundle) = self.registry.get_mut(&entry.collector) {
            bundle.config.last_run = summary.clone();
        }

        if let Err(e) = self.ctx.store.record_last_run(&entry.collector, &summary).await {
            error!("failed to record last run of {}: {e}", entry.collector);
        }
    }

    /// Validate, persist, then apply an edit of one collector
    async fn edit<F>(&mut self, name: &str, change: F) -> Result<CollectorView, SchedulerError>
    where
        F: FnOnce(&mut CollectorBundle),
    {
        let mut candidate = self
            .registry
            .get(name)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownCollector(name.to_string()))?;

        change(&mut candidate);
        self.registry.admit(&candidate)?;

        self.ctx.store.save_collector(&candidate).await?;
        self.registry.replace(candidate)?;
        self.weights_tx.send_replace(self.registry.weights());

        info!("collector {name} updated");

        let bundle = self
            .registry
            .get(name)
            .ok_or_else(|| SchedulerError::UnknownCollector(name.to_string()))?;
        Ok(self.view(bundle))
    }

    fn view(&self, bundle: &CollectorBundle) -> CollectorView {
        let state = self.states.get(bundle.name());
        let consecutive_overlaps = state.map(|s| s.consecutive_overlaps).unwrap_or_default();

        CollectorView {
            bundle: bundle.clone(),
            running: state.and_then(|s| s.running.clone()),
            consecutive_overlaps,
            overlap_warning: consecutive_overlaps >= OVERLAP_WARNING_THRESHOLD,
        }
    }

    fn summary(&self) -> SchedulerSummary {
        let bundles = self.registry.ordered();
        SchedulerSummary {
            total: bundles.len(),
            enabled: bundles.iter().filter(|b| b.config.enabled).count(),
            running: self.states.values().filter(|s| s.running.is_some()).count(),
            last_global_execution: self.last_global_execution,
        }
    }
}

/// Handle for controlling a SchedulerActor
///
/// This handle provides a typed API for sending commands to the actor.
/// It can be cloned and shared across threads.
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Spawn a new scheduler actor
    pub fn spawn(
        registry: CollectorRegistry,
        instances: Vec<Instance>,
        ctx: RunContext,
        weights_tx: watch::Sender<WeightTable>,
        tick: Duration,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        let actor = SchedulerActor::new(
            registry,
            instances,
            ctx,
            weights_tx,
            cmd_rx,
            cmd_tx.downgrade(),
            tick,
        );
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SchedulerCommand,
    ) -> Result<T, SchedulerError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| SchedulerError::Unavailable)?;
        rx.await.map_err(|_| SchedulerError::Unavailable)
    }

    /// Trigger an immediate run of a collector
    pub async fn trigger(
        &self,
        collector: &str,
        request: TriggerRequest,
    ) -> Result<TriggerOutcome, SchedulerError> {
        self.request(|respond_to| SchedulerCommand::Trigger {
            collector: collector.to_string(),
            request,
            respond_to,
        })
        .await?
    }

    pub async fn list_collectors(&self) -> Result<Vec<CollectorView>, SchedulerError> {
        self.request(|respond_to| SchedulerCommand::ListCollectors { respond_to })
            .await
    }

    pub async fn get_collector(&self, name: &str) -> Result<Option<CollectorView>, SchedulerError> {
        self.request(|respond_to| SchedulerCommand::GetCollector {
            name: name.to_string(),
            respond_to,
        })
        .await
    }

    pub async fn summary(&self) -> Result<SchedulerSummary, SchedulerError> {
        self.request(|respond_to| SchedulerCommand::Summary { respond_to })
            .await
    }

    pub async fn update_collector(
        &self,
        name: &str,
        update: CollectorUpdate,
    ) -> Result<CollectorView, SchedulerError> {
        self.request(|respond_to| SchedulerCommand::UpdateCollector {
            name: name.to_string(),
            update,
            respond_to,
        })
        .await?
    }

    pub async fn replace_rules(
        &self,
        name: &str,
        rules: Vec<ThresholdRule>,
    ) -> Result<CollectorView, SchedulerError> {
        self.request(|respond_to| SchedulerCommand::ReplaceRules {
            name: name.to_string(),
            rules,
            respond_to,
        })
        .await?
    }

    pub async fn upsert_rule(
        &self,
        name: &str,
        rule: ThresholdRule,
    ) -> Result<CollectorView, SchedulerError> {
        self.request(|respond_to| SchedulerCommand::UpsertRule {
            name: name.to_string(),
            rule,
            respond_to,
        })
        .await?
    }

    pub async fn replace_queries(
        &self,
        name: &str,
        queries: Vec<VersionQuery>,
    ) -> Result<CollectorView, SchedulerError> {
        self.request(|respond_to| SchedulerCommand::ReplaceQueries {
            name: name.to_string(),
            queries,
            respond_to,
        })
        .await?
    }

    /// Gracefully shut down the scheduler
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(SchedulerCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
