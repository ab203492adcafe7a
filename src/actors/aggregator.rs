//! AggregatorActor - recomputes composite scores
//!
//! Every persisted category score sends a `Recompute` for its instance. The
//! actor loads the newest score per category, composes them with the current
//! weight table (published by the scheduler on a `watch` channel), persists
//! the composite and publishes it. Composites are eventually consistent with
//! the category scores.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, instrument, trace, warn};

use super::messages::{AggregatorCommand, ScoreEvent};
use super::publisher::Publisher;
use crate::model::{CompositeScore, now_millis};
use crate::scoring::{WeightTable, compose};
use crate::storage::{StorageBackend, StorageResult};

pub struct AggregatorActor {
    store: Arc<dyn StorageBackend>,

    /// Current category weights of the enabled collectors
    weights: watch::Receiver<WeightTable>,

    publisher: Publisher,

    command_rx: mpsc::UnboundedReceiver<AggregatorCommand>,
}

impl AggregatorActor {
    pub fn new(
        store: Arc<dyn StorageBackend>,
        weights: watch::Receiver<WeightTable>,
        publisher: Publisher,
        command_rx: mpsc::UnboundedReceiver<AggregatorCommand>,
    ) -> Self {
        Self {
            store,
            weights,
            publisher,
            command_rx,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting aggregator actor");

        while let Some(cmd) = self.command_rx.recv().await {
            match cmd {
                AggregatorCommand::Recompute { instance_id } => {
                    if let Err(e) = self.recompute(&instance_id).await {
                        error!("failed to recompute composite for {instance_id}: {e}");
                    }
                }

                AggregatorCommand::RecomputeNow {
                    instance_id,
                    respond_to,
                } => {
                    let result = self.recompute(&instance_id).await;
                    let _ = respond_to.send(result);
                }

                AggregatorCommand::Shutdown => {
                    debug!("received shutdown command");
                    break;
                }
            }
        }

        debug!("aggregator actor stopped");
    }

    async fn recompute(&self, instance_id: &str) -> StorageResult<Option<CompositeScore>> {
        let scores = self.store.latest_category_scores(instance_id).await?;
        let weights = self.weights.borrow().clone();

        let Some(composite) = compose(instance_id, &scores, &weights, now_millis()) else {
            trace!("no contributing category for {instance_id}, composite not produced");
            return Ok(None);
        };

        if !composite.detail.missing.is_empty() {
            debug!(
                "composite for {instance_id} is missing {:?} ({}% weight coverage)",
                composite.detail.missing, composite.detail.weight_coverage
            );
        }

        self.store.insert_composite_score(&composite).await?;
        self.publisher
            .publish(ScoreEvent::Composite(composite.clone()));

        trace!(
            "composite for {instance_id}: {} ({})",
            composite.composite, composite.status
        );
        Ok(Some(composite))
    }
}

/// Handle for controlling an AggregatorActor
#[derive(Clone)]
pub struct AggregatorHandle {
    sender: mpsc::UnboundedSender<AggregatorCommand>,
}

impl AggregatorHandle {
    pub fn spawn(
        store: Arc<dyn StorageBackend>,
        weights: watch::Receiver<WeightTable>,
        publisher: Publisher,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let actor = AggregatorActor::new(store, weights, publisher, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Schedule a recomputation, never blocks
    pub fn notify(&self, instance_id: &str) {
        let cmd = AggregatorCommand::Recompute {
            instance_id: instance_id.to_string(),
        };
        if self.sender.send(cmd).is_err() {
            warn!("aggregator is gone, composite for {instance_id} not recomputed");
        }
    }

    /// Recompute and wait for the resulting composite
    pub async fn recompute_now(&self, instance_id: &str) -> Result<Option<CompositeScore>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AggregatorCommand::RecomputeNow {
                instance_id: instance_id.to_string(),
                respond_to: tx,
            })
            .context("failed to send RecomputeNow command")?;

        Ok(rx.await.context("failed to receive response")??)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.sender
            .send(AggregatorCommand::Shutdown)
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
