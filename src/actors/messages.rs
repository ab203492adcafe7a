//! Message types for actor communication
//!
//! This module defines all message types used for communication between actors.
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to specific actors via mpsc
//! 2. **Events**: Broadcast notifications published to multiple subscribers
//! 3. **Immutability**: All events are cloneable for multi-subscriber patterns

use std::fmt;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::model::{
    CategoryScore, CompositeScore, ExecutionId, ExecutionLogEntry, Instance, ThresholdRule,
    TriggerType, VersionQuery,
};
use crate::registry::{CollectorBundle, CollectorUpdate, RegistryError};
use crate::storage::StorageError;

/// Event fanned out to real-time subscribers
///
/// Delivery is best-effort and at-most-once. Slow subscribers lag and drop
/// events, they never block collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScoreEvent {
    /// A category score was persisted
    Category(CategoryScore),

    /// A composite score was persisted
    Composite(CompositeScore),

    /// A run was finalized
    Execution(ExecutionLogEntry),
}

/// Parameters of a manual trigger
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerRequest {
    /// Restrict the run to these instance ids
    #[serde(default)]
    pub instance_ids: Option<Vec<String>>,

    /// Regular expression matched against instance id and display name
    #[serde(default)]
    pub name_pattern: Option<String>,

    /// Run even when the collector is disabled
    #[serde(default)]
    pub force: bool,

    #[serde(default)]
    pub triggered_by: Option<String>,
}

/// Compiled instance selection of a trigger
#[derive(Debug, Clone, Default)]
pub struct InstanceFilter {
    instance_ids: Option<Vec<String>>,
    name_pattern: Option<Regex>,
}

impl InstanceFilter {
    pub fn new(
        instance_ids: Option<Vec<String>>,
        name_pattern: Option<&str>,
    ) -> Result<Self, SchedulerError> {
        let name_pattern = name_pattern
            .map(|pattern| {
                Regex::new(pattern)
                    .map_err(|e| SchedulerError::InvalidFilter(format!("{pattern}: {e}")))
            })
            .transpose()?;

        Ok(Self {
            instance_ids,
            name_pattern,
        })
    }

    pub fn matches(&self, instance: &Instance) -> bool {
        let id_match = self
            .instance_ids
            .as_ref()
            .is_none_or(|ids| ids.iter().any(|id| id == &instance.id));

        let name_match = self.name_pattern.as_ref().is_none_or(|pattern| {
            pattern.is_match(&instance.id) || pattern.is_match(instance.display_name())
        });

        id_match && name_match
    }
}

/// Result of a manual trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerOutcome {
    /// A run was started
    Accepted { execution_id: ExecutionId },

    /// A run of this collector is already in progress
    AlreadyRunning { execution_id: ExecutionId },

    /// The collector is disabled and the trigger was not forced
    Disabled,
}

/// Marker of an in-progress run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMarker {
    pub execution_id: ExecutionId,
    pub started_at: DateTime<Utc>,
    pub trigger: TriggerType,
}

/// Collector bundle with its runtime state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorView {
    #[serde(flatten)]
    pub bundle: CollectorBundle,

    /// Current run, `None` when idle
    pub running: Option<RunMarker>,

    /// Scheduled ticks in a row that found the previous run still going
    pub consecutive_overlaps: u32,

    /// Set once `consecutive_overlaps` reaches the warning threshold
    pub overlap_warning: bool,
}

/// Rolled-up scheduler state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSummary {
    pub total: usize,
    pub enabled: usize,
    pub running: usize,
    pub last_global_execution: Option<DateTime<Utc>>,
}

/// Errors returned by scheduler commands
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerError {
    /// No collector with this name
    UnknownCollector(String),

    /// Rejected configuration change
    Invalid(String),

    /// The trigger's name pattern is not a valid regular expression
    InvalidFilter(String),

    /// Storage rejected the operation
    Storage(String),

    /// The scheduler actor is gone
    Unavailable,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::UnknownCollector(name) => write!(f, "unknown collector '{name}'"),
            SchedulerError::Invalid(msg) => write!(f, "invalid configuration: {msg}"),
            SchedulerError::InvalidFilter(msg) => write!(f, "invalid instance filter: {msg}"),
            SchedulerError::Storage(msg) => write!(f, "storage error: {msg}"),
            SchedulerError::Unavailable => write!(f, "scheduler is not running"),
        }
    }
}

impl std::error::Error for SchedulerError {}

impl From<RegistryError> for SchedulerError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownCollector(name) => SchedulerError::UnknownCollector(name),
            RegistryError::Duplicate(name) => {
                SchedulerError::Invalid(format!("duplicate collector '{name}'"))
            }
            RegistryError::CategoryTaken { .. } => SchedulerError::Invalid(err.to_string()),
            RegistryError::Invalid(msg) => SchedulerError::Invalid(msg),
        }
    }
}

impl From<StorageError> for SchedulerError {
    fn from(err: StorageError) -> Self {
        SchedulerError::Storage(err.to_string())
    }
}

pub type SchedulerReply<T> = oneshot::Sender<Result<T, SchedulerError>>;

/// Commands that can be sent to the SchedulerActor
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Start a run immediately
    Trigger {
        collector: String,
        request: TriggerRequest,
        respond_to: SchedulerReply<TriggerOutcome>,
    },

    /// A run task finished and its log entry is final
    RunFinished { entry: ExecutionLogEntry },

    ListCollectors {
        respond_to: oneshot::Sender<Vec<CollectorView>>,
    },

    GetCollector {
        name: String,
        respond_to: oneshot::Sender<Option<CollectorView>>,
    },

    Summary {
        respond_to: oneshot::Sender<SchedulerSummary>,
    },

    /// Partial update of a collector's configuration
    UpdateCollector {
        name: String,
        update: CollectorUpdate,
        respond_to: SchedulerReply<CollectorView>,
    },

    /// Replace all threshold rules of a collector
    ReplaceRules {
        name: String,
        rules: Vec<ThresholdRule>,
        respond_to: SchedulerReply<CollectorView>,
    },

    /// Insert or replace one threshold rule by name
    UpsertRule {
        name: String,
        rule: ThresholdRule,
        respond_to: SchedulerReply<CollectorView>,
    },

    /// Replace all version queries of a collector
    ReplaceQueries {
        name: String,
        queries: Vec<VersionQuery>,
        respond_to: SchedulerReply<CollectorView>,
    },

    /// Gracefully shut down the scheduler
    ///
    /// Runs in progress finish and finalize their log entries.
    Shutdown,
}

/// Commands that can be sent to the AggregatorActor
#[derive(Debug)]
pub enum AggregatorCommand {
    /// A category score was persisted for the instance
    Recompute { instance_id: String },

    /// Recompute and report the resulting composite
    RecomputeNow {
        instance_id: String,
        respond_to: oneshot::Sender<Result<Option<CompositeScore>, StorageError>>,
    },

    /// Gracefully shut down the aggregator
    Shutdown,
}
