//! Core domain types shared by the scheduler, the scoring engine and storage
//!
//! Everything the engine persists or publishes is defined here so that the
//! storage backends, the API and the actors agree on one representation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::detail::CategoryDetail;

/// Identifier of an execution log entry
pub type ExecutionId = i64;

/// Current time at millisecond precision, the resolution of stored timestamps
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

// ============================================================================
// Instances
// ============================================================================

/// Version of a database engine (e.g. `15.0.4153.1`)
///
/// Versions compare component-wise, missing trailing components count as 0,
/// so `16` and `16.0.0` are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EngineVersion(Vec<u32>);

impl EngineVersion {
    pub fn new(components: impl Into<Vec<u32>>) -> Self {
        let mut components = components.into();
        while components.len() > 1 && components.last() == Some(&0) {
            components.pop();
        }
        Self(components)
    }

    pub fn major(&self) -> u32 {
        self.0.first().copied().unwrap_or_default()
    }
}

impl Ord for EngineVersion {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let len = self.0.len().max(other.0.len());
        (0..len)
            .map(|i| {
                let lhs = self.0.get(i).copied().unwrap_or_default();
                let rhs = other.0.get(i).copied().unwrap_or_default();
                lhs.cmp(&rhs)
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    }
}

impl PartialOrd for EngineVersion {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for EngineVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("engine version must not be empty".to_string());
        }

        let components = trimmed
            .split('.')
            .map(|part| {
                part.parse::<u32>()
                    .map_err(|_| format!("invalid engine version '{trimmed}'"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(components))
    }
}

impl TryFrom<String> for EngineVersion {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EngineVersion> for String {
    fn from(value: EngineVersion) -> Self {
        value.to_string()
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u32::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

/// A monitored database server instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub display: Option<String>,
    pub engine_version: EngineVersion,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl Instance {
    pub fn display_name(&self) -> &str {
        self.display.as_deref().unwrap_or(&self.id)
    }
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Collectors
// ============================================================================

/// Scoring dimension a collector contributes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Availability,
    Backups,
    Replication,
    Cpu,
    Memory,
    Io,
    Disk,
    Maintenance,
    WaitStats,
    Custom,
}

impl Category {
    pub const ALL: [Category; 10] = [
        Category::Availability,
        Category::Backups,
        Category::Replication,
        Category::Cpu,
        Category::Memory,
        Category::Io,
        Category::Disk,
        Category::Maintenance,
        Category::WaitStats,
        Category::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Availability => "availability",
            Category::Backups => "backups",
            Category::Replication => "replication",
            Category::Cpu => "cpu",
            Category::Memory => "memory",
            Category::Io => "io",
            Category::Disk => "disk",
            Category::Maintenance => "maintenance",
            Category::WaitStats => "wait_stats",
            Category::Custom => "custom",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| format!("unknown category '{s}'"))
    }
}

/// How the sub-scores of several rule groups compose into one category score
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupCombine {
    /// The category reflects its worst dimension
    #[default]
    Minimum,
    /// Arithmetic mean, rounded half up
    Average,
    Maximum,
}

impl GroupCombine {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupCombine::Minimum => "minimum",
            GroupCombine::Average => "average",
            GroupCombine::Maximum => "maximum",
        }
    }

    pub fn combine(&self, scores: &[u8]) -> Option<u8> {
        match self {
            GroupCombine::Minimum => scores.iter().copied().min(),
            GroupCombine::Maximum => scores.iter().copied().max(),
            GroupCombine::Average => {
                if scores.is_empty() {
                    return None;
                }
                let sum: u32 = scores.iter().map(|s| u32::from(*s)).sum();
                let count = scores.len() as u32;
                Some(((sum * 2 + count) / (count * 2)) as u8)
            }
        }
    }
}

impl FromStr for GroupCombine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minimum" => Ok(GroupCombine::Minimum),
            "average" => Ok(GroupCombine::Average),
            "maximum" => Ok(GroupCombine::Maximum),
            other => Err(format!("unknown group combine '{other}'")),
        }
    }
}

/// Summary of the most recent run of a collector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LastRunSummary {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub instances_processed: u32,
    pub status: Option<RunStatus>,
    pub last_error: Option<String>,
}

/// Per-collector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorConfig {
    pub name: String,
    pub display_name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    /// Contribution to the composite score, as a fraction of 100
    pub weight: u32,
    #[serde(default = "default_parallel_degree")]
    pub parallel_degree: usize,
    pub category: Category,
    #[serde(default)]
    pub execution_order: i32,
    #[serde(default = "default_score")]
    pub default_score: u8,
    #[serde(default)]
    pub group_combine: GroupCombine,
    #[serde(default)]
    pub last_run: LastRunSummary,
}

fn default_parallel_degree() -> usize {
    4
}

fn default_score() -> u8 {
    100
}

// ============================================================================
// Rules and queries
// ============================================================================

/// Comparison operator of a threshold rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "=")]
    Eq,
}

impl CompareOp {
    /// Evaluate `value <op> threshold` exactly, without tolerance
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            CompareOp::Gt => value > threshold,
            CompareOp::Ge => value >= threshold,
            CompareOp::Lt => value < threshold,
            CompareOp::Le => value <= threshold,
            CompareOp::Eq => value == threshold,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Eq => "=",
        }
    }
}

impl FromStr for CompareOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ">" => Ok(CompareOp::Gt),
            ">=" => Ok(CompareOp::Ge),
            "<" => Ok(CompareOp::Lt),
            "<=" => Ok(CompareOp::Le),
            "=" => Ok(CompareOp::Eq),
            other => Err(format!("unknown operator '{other}'")),
        }
    }
}

/// Action classification attached to a matched rule
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    #[default]
    Ok,
    Warn,
    Alert,
}

impl RuleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleAction::Ok => "ok",
            RuleAction::Warn => "warn",
            RuleAction::Alert => "alert",
        }
    }
}

impl FromStr for RuleAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(RuleAction::Ok),
            "warn" => Ok(RuleAction::Warn),
            "alert" => Ok(RuleAction::Alert),
            other => Err(format!("unknown rule action '{other}'")),
        }
    }
}

/// An ordered comparison mapping a raw metric value to a score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub name: String,
    pub threshold: f64,
    pub operator: CompareOp,
    pub score: u8,
    #[serde(default)]
    pub action: RuleAction,
    #[serde(default)]
    pub default_score: Option<u8>,
    pub evaluation_order: i32,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// Query template valid for a range of engine versions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionQuery {
    pub min_version: EngineVersion,
    #[serde(default)]
    pub max_version: Option<EngineVersion>,
    pub template: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl VersionQuery {
    pub fn applies_to(&self, version: &EngineVersion) -> bool {
        self.active
            && &self.min_version <= version
            && self.max_version.as_ref().is_none_or(|max| version <= max)
    }
}

// ============================================================================
// Execution history
// ============================================================================

/// Status of a collector run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Error,
    TimedOut,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
            RunStatus::TimedOut => "timed_out",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "error" => Ok(RunStatus::Error),
            "timed_out" => Ok(RunStatus::TimedOut),
            other => Err(format!("unknown run status '{other}'")),
        }
    }
}

/// What started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Scheduled,
    Manual,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Scheduled => "scheduled",
            TriggerType::Manual => "manual",
        }
    }
}

impl FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(TriggerType::Scheduled),
            "manual" => Ok(TriggerType::Manual),
            other => Err(format!("unknown trigger type '{other}'")),
        }
    }
}

/// Data needed to open an execution log entry
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub collector: String,
    pub started_at: DateTime<Utc>,
    pub trigger: TriggerType,
    pub triggered_by: Option<String>,
}

/// Final counts and status of a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOutcome {
    pub finished_at: DateTime<Utc>,
    pub status: Option<RunStatus>,
    pub success_count: u32,
    pub error_count: u32,
    pub skipped_count: u32,
    pub not_attempted_count: u32,
    pub error_message: Option<String>,
}

/// Durable record of one collector run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub id: ExecutionId,
    pub collector: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub status: RunStatus,
    pub success_count: u32,
    pub error_count: u32,
    pub skipped_count: u32,
    pub not_attempted_count: u32,
    pub error_message: Option<String>,
    pub trigger: TriggerType,
    pub triggered_by: Option<String>,
}

impl ExecutionLogEntry {
    pub fn open(id: ExecutionId, new: &NewExecution) -> Self {
        Self {
            id,
            collector: new.collector.clone(),
            started_at: new.started_at,
            finished_at: None,
            duration_ms: None,
            status: RunStatus::Running,
            success_count: 0,
            error_count: 0,
            skipped_count: 0,
            not_attempted_count: 0,
            error_message: None,
            trigger: new.trigger,
            triggered_by: new.triggered_by.clone(),
        }
    }

    /// Apply the final outcome to a running entry
    pub fn finalize(&mut self, outcome: &ExecutionOutcome) {
        let duration = (outcome.finished_at - self.started_at).num_milliseconds().max(0);
        self.finished_at = Some(outcome.finished_at);
        self.duration_ms = Some(duration as u64);
        self.status = outcome.status.unwrap_or(RunStatus::Completed);
        self.success_count = outcome.success_count;
        self.error_count = outcome.error_count;
        self.skipped_count = outcome.skipped_count;
        self.not_attempted_count = outcome.not_attempted_count;
        self.error_message = outcome.error_message.clone();
    }

    pub fn instances_processed(&self) -> u32 {
        self.success_count + self.error_count + self.skipped_count
    }
}

/// Filter for execution history queries
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub collector: Option<String>,
    pub status: Option<RunStatus>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl ExecutionFilter {
    pub fn matches(&self, entry: &ExecutionLogEntry) -> bool {
        self.collector.as_ref().is_none_or(|c| c == &entry.collector)
            && self.status.is_none_or(|s| s == entry.status)
            && self.start.is_none_or(|start| entry.started_at >= start)
            && self.end.is_none_or(|end| entry.started_at <= end)
    }
}

// ============================================================================
// Scores
// ============================================================================

/// Sub-score of one rule group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupScore {
    pub group: Option<String>,
    pub metric: String,
    pub value: f64,
    pub score: u8,
    pub matched_rule: Option<String>,
    pub action: RuleAction,
}

/// One category score for one instance at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub instance_id: String,
    pub category: Category,
    pub collector: String,
    pub collected_at: DateTime<Utc>,
    pub score: u8,
    pub breached: bool,
    pub groups: Vec<GroupScore>,
    pub detail: CategoryDetail,
}

/// Status classification of a composite score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Critical,
    Risk,
    Warning,
    Healthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Critical => "critical",
            HealthStatus::Risk => "risk",
            HealthStatus::Warning => "warning",
            HealthStatus::Healthy => "healthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(HealthStatus::Critical),
            "risk" => Ok(HealthStatus::Risk),
            "warning" => Ok(HealthStatus::Warning),
            "healthy" => Ok(HealthStatus::Healthy),
            other => Err(format!("unknown health status '{other}'")),
        }
    }
}

/// Contribution of one category to a composite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryContribution {
    pub category: Category,
    pub score: u8,
    pub weight: u32,
    pub collected_at: DateTime<Utc>,
}

/// Snapshot of the inputs of a composite score
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompositeDetail {
    pub contributions: Vec<CategoryContribution>,
    /// Enabled categories without any score for the instance
    pub missing: Vec<Category>,
    /// Scored categories whose collectors are all disabled
    pub excluded: Vec<Category>,
    /// Percentage of the enabled weight backed by a score
    pub weight_coverage: f64,
}

/// Weighted composite for one instance at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeScore {
    pub instance_id: String,
    pub computed_at: DateTime<Utc>,
    pub composite: f64,
    pub status: HealthStatus,
    pub detail: CompositeDetail,
}
