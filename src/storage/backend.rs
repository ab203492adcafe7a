//! Storage backend trait definition
//!
//! This module defines the core `StorageBackend` trait that all
//! storage implementations must implement. One backend holds the collector
//! bundles, the execution history and the score time series.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use crate::model::{
    Category, CategoryScore, CompositeScore, ExecutionFilter, ExecutionId, ExecutionLogEntry,
    ExecutionOutcome, LastRunSummary, NewExecution,
};
use crate::registry::CollectorBundle;

/// Query parameters for fetching scores within a time range
#[derive(Debug, Clone)]
pub struct QueryRange {
    /// Instance to query
    pub instance_id: String,

    /// Start of time range (inclusive)
    pub start: DateTime<Utc>,

    /// End of time range (inclusive)
    pub end: DateTime<Utc>,

    /// Maximum number of results to return
    pub limit: Option<usize>,
}

/// Health of the storage backend
#[derive(Debug, Clone)]
pub struct BackendHealth {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: std::collections::HashMap<String, String>,
}

/// Trait for storage backends
///
/// ## Contracts
///
/// - Category and composite scores are append-only time series.
/// - An execution log entry is created at run start and finalized exactly
///   once; finalizing it again fails with `StorageError::Conflict`.
/// - Time-range results are ordered oldest first, execution queries newest
///   first.
///
/// Implementations must be `Send + Sync` as they are shared across run
/// tasks.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    // ========================================================================
    // Collector bundles
    // ========================================================================

    /// Load every stored collector bundle
    async fn load_collectors(&self) -> StorageResult<Vec<CollectorBundle>>;

    /// Insert or replace a collector bundle (config, rules and queries)
    async fn save_collector(&self, bundle: &CollectorBundle) -> StorageResult<()>;

    /// Update the last-run bookkeeping of a collector
    async fn record_last_run(&self, collector: &str, summary: &LastRunSummary)
    -> StorageResult<()>;

    // ========================================================================
    // Execution history
    // ========================================================================

    /// Open a new execution log entry with status `Running`
    async fn start_execution(&self, new: &NewExecution) -> StorageResult<ExecutionLogEntry>;

    /// Finalize a running execution log entry
    async fn finish_execution(
        &self,
        id: ExecutionId,
        outcome: &ExecutionOutcome,
    ) -> StorageResult<ExecutionLogEntry>;

    async fn get_execution(&self, id: ExecutionId) -> StorageResult<Option<ExecutionLogEntry>>;

    /// Query execution log entries, newest first
    async fn query_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> StorageResult<Vec<ExecutionLogEntry>>;

    // ========================================================================
    // Scores
    // ========================================================================

    /// Append a category score
    async fn insert_category_score(&self, score: &CategoryScore) -> StorageResult<()>;

    /// Newest score per category for an instance
    async fn latest_category_scores(&self, instance_id: &str) -> StorageResult<Vec<CategoryScore>>;

    /// Category scores of one category within a time range
    async fn query_category_scores(
        &self,
        query: &QueryRange,
        category: Category,
    ) -> StorageResult<Vec<CategoryScore>>;

    /// Append a composite score
    async fn insert_composite_score(&self, score: &CompositeScore) -> StorageResult<()>;

    /// Newest composite of an instance
    async fn latest_composite(&self, instance_id: &str) -> StorageResult<Option<CompositeScore>>;

    /// Newest composite of every instance
    async fn latest_composites(&self) -> StorageResult<Vec<CompositeScore>>;

    /// Composites of an instance within a time range
    async fn query_composite_scores(&self, query: &QueryRange)
    -> StorageResult<Vec<CompositeScore>>;

    /// Delete category and composite scores older than the timestamp
    ///
    /// Execution history is never deleted. Returns the number of rows removed.
    async fn cleanup_old_scores(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Check backend health
    async fn health_check(&self) -> StorageResult<BackendHealth>;

    /// Get backend-specific statistics
    async fn get_stats(&self) -> StorageResult<String>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
