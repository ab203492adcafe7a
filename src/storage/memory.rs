//! In-memory storage backend (no persistence)
//!
//! Useful for:
//! - Testing without database dependencies
//! - Deployments configured with `"backend": "none"`
//!
//! All data is lost on restart. Each score series, one per (instance,
//! category) and one composite series per instance, keeps at most
//! [`MAX_SCORES_PER_SERIES`] rows, oldest evicted first.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{BackendHealth, QueryRange, StorageBackend};
use super::error::{StorageError, StorageResult};
use crate::model::{
    Category, CategoryScore, CompositeScore, ExecutionFilter, ExecutionId, ExecutionLogEntry,
    ExecutionOutcome, LastRunSummary, NewExecution, RunStatus,
};
use crate::registry::CollectorBundle;
use crate::scoring::aggregate::latest_per_category;

/// Maximum rows kept per score series
const MAX_SCORES_PER_SERIES: usize = 10_000;

#[derive(Debug, Default)]
struct MemoryState {
    collectors: BTreeMap<String, CollectorBundle>,
    executions: Vec<ExecutionLogEntry>,
    category_scores: HashMap<(String, Category), VecDeque<CategoryScore>>,
    composite_scores: HashMap<String, VecDeque<CompositeScore>>,
}

/// In-memory storage backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn push_bounded<T>(series: &mut VecDeque<T>, item: T) {
    series.push_back(item);
    if series.len() > MAX_SCORES_PER_SERIES {
        series.pop_front();
    }
}

fn in_range(at: DateTime<Utc>, query: &QueryRange) -> bool {
    at >= query.start && at <= query.end
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn load_collectors(&self) -> StorageResult<Vec<CollectorBundle>> {
        let state = self.state.read().await;
        Ok(state.collectors.values().cloned().collect())
    }

    async fn save_collector(&self, bundle: &CollectorBundle) -> StorageResult<()> {
        let mut state = self.state.write().await;
        state
            .collectors
            .insert(bundle.name().to_string(), bundle.clone());
        Ok(())
    }

    async fn record_last_run(
        &self,
        collector: &str,
        summary: &LastRunSummary,
    ) -> StorageResult<()> {
        let mut state = self.state.write().await;
        let bundle = state
            .collectors
            .get_mut(collector)
            .ok_or_else(|| StorageError::NotFound(format!("collector {collector}")))?;
        bundle.config.last_run = summary.clone();
        Ok(())
    }

    async fn start_execution(&self, new: &NewExecution) -> StorageResult<ExecutionLogEntry> {
        let mut state = self.state.write().await;
        let id = state.executions.len() as ExecutionId + 1;
        let entry = ExecutionLogEntry::open(id, new);
        state.executions.push(entry.clone());
        debug!("opened execution #{id} for {}", new.collector);
        Ok(entry)
    }

    async fn finish_execution(
        &self,
        id: ExecutionId,
        outcome: &ExecutionOutcome,
    ) -> StorageResult<ExecutionLogEntry> {
        let mut state = self.state.write().await;
        let entry = id.checked_sub(1)
            .and_then(|index| usize::try_from(index).ok())
            .and_then(|index| state.executions.get_mut(index))
            .ok_or_else(|| StorageError::NotFound(format!("execution #{id}")))?;

        if entry.status != RunStatus::Running {
            return Err(StorageError::Conflict(format!(
                "execution #{id} is already finalized"
            )));
        }

        entry.finalize(outcome);
        Ok(entry.clone())
    }

    async fn get_execution(&self, id: ExecutionId) -> StorageResult<Option<ExecutionLogEntry>> {
        let state = self.state.read().await;
        Ok(id.checked_sub(1)
            .and_then(|index| usize::try_from(index).ok())
            .and_then(|index| state.executions.get(index))
            .cloned())
    }

    async fn query_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> StorageResult<Vec<ExecutionLogEntry>> {
        let state = self.state.read().await;
        Ok(state
            .executions
            .iter()
            .rev()
            .filter(|entry| filter.matches(entry))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn insert_category_score(&self, score: &CategoryScore) -> StorageResult<()> {
        let mut state = self.state.write().await;
        let series = state
            .category_scores
            .entry((score.instance_id.clone(), score.category))
            .or_default();
        push_bounded(series, score.clone());
        Ok(())
    }

    async fn latest_category_scores(&self, instance_id: &str) -> StorageResult<Vec<CategoryScore>> {
        let state = self.state.read().await;
        let scores: Vec<CategoryScore> = state
            .category_scores
            .iter()
            .filter(|((instance, _), _)| instance == instance_id)
            .filter_map(|(_, series)| series.iter().max_by_key(|s| s.collected_at))
            .cloned()
            .collect();

        Ok(latest_per_category(&scores)
            .into_values()
            .cloned()
            .collect())
    }

    async fn query_category_scores(
        &self,
        query: &QueryRange,
        category: Category,
    ) -> StorageResult<Vec<CategoryScore>> {
        let state = self.state.read().await;
        let mut scores: Vec<CategoryScore> = state
            .category_scores
            .get(&(query.instance_id.clone(), category))
            .map(|series| {
                series
                    .iter()
                    .filter(|s| in_range(s.collected_at, query))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        scores.sort_by_key(|s| s.collected_at);
        scores.truncate(query.limit.unwrap_or(usize::MAX));
        Ok(scores)
    }

    async fn insert_composite_score(&self, score: &CompositeScore) -> StorageResult<()> {
        let mut state = self.state.write().await;
        let series = state
            .composite_scores
            .entry(score.instance_id.clone())
            .or_default();
        push_bounded(series, score.clone());
        Ok(())
    }

    async fn latest_composite(&self, instance_id: &str) -> StorageResult<Option<CompositeScore>> {
        let state = self.state.read().await;
        Ok(state
            .composite_scores
            .get(instance_id)
            .and_then(|series| series.iter().max_by_key(|s| s.computed_at))
            .cloned())
    }

    async fn latest_composites(&self) -> StorageResult<Vec<CompositeScore>> {
        let state = self.state.read().await;
        let mut latest: Vec<CompositeScore> = state
            .composite_scores
            .values()
            .filter_map(|series| series.iter().max_by_key(|s| s.computed_at))
            .cloned()
            .collect();
        latest.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        Ok(latest)
    }

    async fn query_composite_scores(
        &self,
        query: &QueryRange,
    ) -> StorageResult<Vec<CompositeScore>> {
        let state = self.state.read().await;
        let mut scores: Vec<CompositeScore> = state
            .composite_scores
            .get(&query.instance_id)
            .map(|series| {
                series
                    .iter()
                    .filter(|s| in_range(s.computed_at, query))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        scores.sort_by_key(|s| s.computed_at);
        scores.truncate(query.limit.unwrap_or(usize::MAX));
        Ok(scores)
    }

    async fn cleanup_old_scores(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut state = self.state.write().await;
        let mut deleted = 0;

        for series in state.category_scores.values_mut() {
            let len = series.len();
            series.retain(|s| s.collected_at >= before);
            deleted += len - series.len();
        }
        for series in state.composite_scores.values_mut() {
            let len = series.len();
            series.retain(|s| s.computed_at >= before);
            deleted += len - series.len();
        }

        debug!("removed {deleted} scores older than {before}");
        Ok(deleted)
    }

    async fn health_check(&self) -> StorageResult<BackendHealth> {
        Ok(BackendHealth {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([("backend".to_string(), "memory".to_string())]),
        })
    }

    async fn get_stats(&self) -> StorageResult<String> {
        let state = self.state.read().await;
        let category_rows: usize = state.category_scores.values().map(VecDeque::len).sum();
        let composite_rows: usize = state.composite_scores.values().map(VecDeque::len).sum();

        Ok(format!(
            "In-Memory: {} collectors, {} executions, {} category scores, {} composites",
            state.collectors.len(),
            state.executions.len(),
            category_rows,
            composite_rows
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}
