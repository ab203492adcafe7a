//! Retention cleanup for the score time series
//!
//! Runs once on startup and then daily. Execution history is never purged.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{error, info};

use super::backend::StorageBackend;

/// Cleanup interval - run retention cleanup daily
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Delete scores older than `retention_days`, returning the number removed
pub async fn run_cleanup(store: &dyn StorageBackend, retention_days: u32) -> usize {
    let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));

    match store.cleanup_old_scores(cutoff).await {
        Ok(deleted) => {
            info!("retention cleanup removed {deleted} scores older than {retention_days} days");
            deleted
        }
        Err(e) => {
            error!("retention cleanup failed: {e}");
            0
        }
    }
}

/// Spawn the periodic cleanup task
pub fn spawn_retention_task(store: Arc<dyn StorageBackend>, retention_days: u32) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut cleanup_interval = time::interval(CLEANUP_INTERVAL);
        loop {
            // First tick fires immediately, so cleanup also runs on startup
            cleanup_interval.tick().await;
            run_cleanup(store.as_ref(), retention_days).await;
        }
    })
}
