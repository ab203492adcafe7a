//! API request and response types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::actors::messages::{SchedulerSummary, TriggerOutcome};
use crate::model::{CategoryScore, CompositeScore, ExecutionId};

/// Default window of history endpoints
pub const DEFAULT_HISTORY_HOURS: i64 = 24;

/// Longest window a history endpoint accepts (one year)
pub const MAX_HISTORY_HOURS: i64 = 24 * 365;

/// Default and maximum page size of the execution log
pub const DEFAULT_EXECUTION_LIMIT: usize = 100;
pub const MAX_EXECUTION_LIMIT: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub storage_healthy: bool,
    pub storage_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub timestamp: String,
    pub uptime_secs: i64,
    pub storage: String,
    pub collectors: SchedulerSummary,
}

/// `?hours=N` window of history endpoints
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HoursQuery {
    pub hours: Option<i64>,
}

impl HoursQuery {
    /// Start of the window ending at `end`
    pub fn start(&self, end: DateTime<Utc>) -> Result<DateTime<Utc>, String> {
        let hours = self.hours.unwrap_or(DEFAULT_HISTORY_HOURS);
        if !(1..=MAX_HISTORY_HOURS).contains(&hours) {
            return Err(format!(
                "hours must be between 1 and {MAX_HISTORY_HOURS}, got {hours}"
            ));
        }
        Ok(end - Duration::hours(hours))
    }
}

/// Query parameters of the execution log
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionQuery {
    pub collector: Option<String>,
    pub status: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Response of a manual trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub accepted: bool,

    /// The new run, or the run already in progress
    pub execution_id: Option<ExecutionId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<TriggerOutcome> for TriggerResponse {
    fn from(outcome: TriggerOutcome) -> Self {
        match outcome {
            TriggerOutcome::Accepted { execution_id } => Self {
                accepted: true,
                execution_id: Some(execution_id),
                reason: None,
            },
            TriggerOutcome::AlreadyRunning { execution_id } => Self {
                accepted: false,
                execution_id: Some(execution_id),
                reason: Some("already running".to_string()),
            },
            TriggerOutcome::Disabled => Self {
                accepted: false,
                execution_id: None,
                reason: Some("collector is disabled".to_string()),
            },
        }
    }
}

/// Latest scores of one instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceScoresResponse {
    pub instance_id: String,
    pub composite: Option<CompositeScore>,
    pub categories: Vec<CategoryScore>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetScoresResponse {
    pub count: usize,
    pub scores: Vec<CompositeScore>,
}
