//! Reliability rollups over the execution log

use serde::{Deserialize, Serialize};

use crate::model::{ExecutionLogEntry, RunStatus};

/// Reliability of one collector over a window of finalized runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityStats {
    pub collector: String,
    pub runs: usize,
    pub completed: usize,
    pub errored: usize,
    pub timed_out: usize,
    /// Percentage of runs that completed, 0 when there were no runs
    pub success_rate: f64,
    pub avg_duration_ms: Option<u64>,
    /// Nearest-rank 95th percentile of run durations
    pub p95_duration_ms: Option<u64>,
}

impl ReliabilityStats {
    /// Roll up entries of one collector; running entries are ignored
    pub fn from_entries(collector: &str, entries: &[ExecutionLogEntry]) -> Self {
        let finished: Vec<&ExecutionLogEntry> = entries
            .iter()
            .filter(|e| e.collector == collector && e.status.is_terminal())
            .collect();

        let count = |status: RunStatus| finished.iter().filter(|e| e.status == status).count();
        let completed = count(RunStatus::Completed);

        let mut durations: Vec<u64> = finished.iter().filter_map(|e| e.duration_ms).collect();
        durations.sort_unstable();

        let avg_duration_ms = (!durations.is_empty())
            .then(|| durations.iter().sum::<u64>() / durations.len() as u64);

        let p95_duration_ms = (!durations.is_empty()).then(|| {
            let rank = (durations.len() as f64 * 0.95).ceil() as usize;
            durations[rank.clamp(1, durations.len()) - 1]
        });

        let success_rate = if finished.is_empty() {
            0.0
        } else {
            (completed as f64 * 10_000.0 / finished.len() as f64).round() / 100.0
        };

        Self {
            collector: collector.to_string(),
            runs: finished.len(),
            completed,
            errored: count(RunStatus::Error),
            timed_out: count(RunStatus::TimedOut),
            success_rate,
            avg_duration_ms,
            p95_duration_ms,
        }
    }
}
