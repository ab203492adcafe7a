//! API shared state containing engine handles

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::actors::Engine;
use crate::actors::publisher::Publisher;
use crate::actors::scheduler::SchedulerHandle;
use crate::storage::StorageBackend;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Handle to the scheduler for collector state, edits and triggers
    pub scheduler: SchedulerHandle,

    /// Storage backend for score and history queries
    pub store: Arc<dyn StorageBackend>,

    /// Event publisher (for WebSocket streaming)
    pub publisher: Publisher,

    pub started_at: DateTime<Utc>,
}

impl ApiState {
    pub fn new(engine: &Engine) -> Self {
        Self {
            scheduler: engine.scheduler.clone(),
            store: engine.store.clone(),
            publisher: engine.publisher.clone(),
            started_at: Utc::now(),
        }
    }
}
