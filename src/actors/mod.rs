//! Actor-based scoring engine
//!
//! Each actor runs as an independent async task communicating via Tokio
//! channels.
//!
//! ## Architecture Overview
//!
//! ```text
//!                 +-------------------+
//!                 |  SchedulerActor   |  owns registry + run markers
//!                 +---------+---------+
//!                           | spawns (one task per run)
//!              +------------+------------+
//!              |                         |
//!      +-------v-------+         +-------v-------+
//!      | CollectorRun  |   ...   | CollectorRun  |
//!      +-------+-------+         +-------+-------+
//!              |  category scores        |
//!              +------------+------------+
//!                           |
//!           +---------------+----------------+
//!           |                                |
//!  +--------v---------+            +---------v--------+
//!  | AggregatorActor  |            |    Publisher     |
//!  | (composites)     +----------->| (broadcast)      |
//!  +------------------+            +---------+--------+
//!                                            | subscribe
//!                                   +--------v--------+
//!                                   |  API websocket  |
//!                                   +-----------------+
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: the scheduler and aggregator take mpsc command channels
//! 2. **Events**: score and execution events fan out through the publisher
//! 3. **Request/Response**: oneshot channels for admin queries and triggers
//! 4. **Shared state**: the weight table is published on a `watch` channel

pub mod aggregator;
pub mod collector;
pub mod messages;
pub mod publisher;
pub mod scheduler;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::model::Instance;
use crate::probe::MetricProbe;
use crate::registry::{CollectorBundle, CollectorRegistry};
use crate::storage::StorageBackend;

use aggregator::AggregatorHandle;
use collector::RunContext;
use publisher::Publisher;
use scheduler::SchedulerHandle;

/// Running engine: scheduler, aggregator and publisher
#[derive(Clone)]
pub struct Engine {
    pub scheduler: SchedulerHandle,
    pub aggregator: AggregatorHandle,
    pub publisher: Publisher,
    pub store: Arc<dyn StorageBackend>,
}

/// Everything needed to start an [`Engine`]
pub struct EngineOptions {
    pub store: Arc<dyn StorageBackend>,
    pub probe: Arc<dyn MetricProbe>,
    pub instances: Vec<Instance>,

    /// Collector bundles written to storage when absent
    pub seeds: Vec<CollectorBundle>,

    pub tick: Duration,
    pub event_capacity: usize,
}

impl Engine {
    /// Load collectors, seed missing ones and spawn the actors
    pub async fn start(options: EngineOptions) -> Result<Self> {
        let EngineOptions {
            store,
            probe,
            instances,
            seeds,
            tick,
            event_capacity,
        } = options;

        let mut bundles = store
            .load_collectors()
            .await
            .context("failed to load collectors")?;

        for seed in seeds {
            if bundles.iter().any(|b| b.name() == seed.name()) {
                debug!("collector {} already stored, seed ignored", seed.name());
                continue;
            }

            seed.validate()
                .with_context(|| format!("invalid seed collector {}", seed.name()))?;
            store
                .save_collector(&seed)
                .await
                .with_context(|| format!("failed to seed collector {}", seed.name()))?;

            info!("seeded collector {}", seed.name());
            bundles.push(seed);
        }

        let registry = CollectorRegistry::new(bundles).context("invalid collector registry")?;
        let (weights_tx, weights_rx) = watch::channel(registry.weights());

        let publisher = Publisher::spawn(event_capacity);
        let aggregator = AggregatorHandle::spawn(store.clone(), weights_rx, publisher.clone());

        let ctx = RunContext {
            store: store.clone(),
            probe,
            aggregator: aggregator.clone(),
            publisher: publisher.clone(),
        };
        let scheduler = SchedulerHandle::spawn(registry, instances, ctx, weights_tx, tick);

        Ok(Self {
            scheduler,
            aggregator,
            publisher,
            store,
        })
    }

    /// Stop the scheduler and the aggregator
    pub async fn shutdown(&self) -> Result<()> {
        self.scheduler.shutdown().await?;
        self.aggregator.shutdown()?;
        Ok(())
    }
}
