//! Hub statistics endpoint

use axum::{Json, extract::State};
use chrono::Utc;

use crate::api::{error::ApiResult, state::ApiState, types::StatsResponse};

/// GET /api/v1/stats
///
/// Returns storage statistics and the scheduler summary
pub async fn get_stats(State(state): State<ApiState>) -> ApiResult<Json<StatsResponse>> {
    let storage = state.store.get_stats().await?;
    let collectors = state.scheduler.summary().await?;
    let now = Utc::now();

    Ok(Json(StatsResponse {
        timestamp: now.to_rfc3339(),
        uptime_secs: (now - state.started_at).num_seconds(),
        storage,
        collectors,
    }))
}
