//! Score query endpoints

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::Utc;
use serde_json::{Value, json};

use crate::{
    api::{
        error::{ApiError, ApiResult},
        state::ApiState,
        types::{FleetScoresResponse, HoursQuery, InstanceScoresResponse},
    },
    model::Category,
    storage::QueryRange,
};

/// GET /api/v1/scores
///
/// Latest composite of every instance
pub async fn fleet_scores(State(state): State<ApiState>) -> ApiResult<Json<FleetScoresResponse>> {
    let scores = state.store.latest_composites().await?;

    Ok(Json(FleetScoresResponse {
        count: scores.len(),
        scores,
    }))
}

/// GET /api/v1/instances/:id/scores
///
/// Latest composite and latest score per category of one instance
pub async fn instance_scores(
    State(state): State<ApiState>,
    Path(instance_id): Path<String>,
) -> ApiResult<Json<InstanceScoresResponse>> {
    let composite = state.store.latest_composite(&instance_id).await?;
    let categories = state.store.latest_category_scores(&instance_id).await?;

    if composite.is_none() && categories.is_empty() {
        return Err(ApiError::NotFound(format!(
            "no scores for instance '{instance_id}'"
        )));
    }

    Ok(Json(InstanceScoresResponse {
        instance_id,
        composite,
        categories,
    }))
}

/// GET /api/v1/instances/:id/categories/:category/history?hours=N
pub async fn category_history(
    State(state): State<ApiState>,
    Path((instance_id, category)): Path<(String, String)>,
    Query(query): Query<HoursQuery>,
) -> ApiResult<Json<Value>> {
    let category: Category = category.parse().map_err(ApiError::InvalidRequest)?;
    let range = history_range(instance_id, &query)?;

    let scores = state.store.query_category_scores(&range, category).await?;

    Ok(Json(json!({
        "instance_id": range.instance_id,
        "category": category,
        "start": range.start.to_rfc3339(),
        "end": range.end.to_rfc3339(),
        "count": scores.len(),
        "scores": scores,
    })))
}

/// GET /api/v1/instances/:id/composite/history?hours=N
pub async fn composite_history(
    State(state): State<ApiState>,
    Path(instance_id): Path<String>,
    Query(query): Query<HoursQuery>,
) -> ApiResult<Json<Value>> {
    let range = history_range(instance_id, &query)?;

    let scores = state.store.query_composite_scores(&range).await?;

    Ok(Json(json!({
        "instance_id": range.instance_id,
        "start": range.start.to_rfc3339(),
        "end": range.end.to_rfc3339(),
        "count": scores.len(),
        "scores": scores,
    })))
}

fn history_range(instance_id: String, query: &HoursQuery) -> ApiResult<QueryRange> {
    let end = Utc::now();
    let start = query.start(end).map_err(ApiError::InvalidRequest)?;

    Ok(QueryRange {
        instance_id,
        start,
        end,
        limit: None,
    })
}
