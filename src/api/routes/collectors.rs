//! Collector configuration, control and reliability endpoints

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use serde_json::{Value, json};

use crate::{
    actors::messages::{CollectorView, SchedulerSummary, TriggerRequest},
    api::{
        error::{ApiError, ApiResult},
        state::ApiState,
        types::{HoursQuery, TriggerResponse},
    },
    history::ReliabilityStats,
    model::{ExecutionFilter, ThresholdRule, VersionQuery},
    registry::CollectorUpdate,
};

/// GET /api/v1/collectors
///
/// List all collectors with their runtime state
pub async fn list_collectors(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
    let collectors = state.scheduler.list_collectors().await?;

    Ok(Json(json!({
        "count": collectors.len(),
        "collectors": collectors,
    })))
}

/// GET /api/v1/collectors/summary
pub async fn get_summary(State(state): State<ApiState>) -> ApiResult<Json<SchedulerSummary>> {
    Ok(Json(state.scheduler.summary().await?))
}

/// GET /api/v1/collectors/:name
pub async fn get_collector(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> ApiResult<Json<CollectorView>> {
    state
        .scheduler
        .get_collector(&name)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("unknown collector '{name}'")))
}

/// PATCH /api/v1/collectors/:name
///
/// Partial update of enabled, interval, timeout, weight and parallel degree
pub async fn update_collector(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(update): Json<CollectorUpdate>,
) -> ApiResult<Json<CollectorView>> {
    Ok(Json(state.scheduler.update_collector(&name, update).await?))
}

/// PUT /api/v1/collectors/:name/rules
///
/// Replace every threshold rule of a collector in one batch
pub async fn replace_rules(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(rules): Json<Vec<ThresholdRule>>,
) -> ApiResult<Json<CollectorView>> {
    Ok(Json(state.scheduler.replace_rules(&name, rules).await?))
}

/// PUT /api/v1/collectors/:name/rules/:rule
pub async fn upsert_rule(
    State(state): State<ApiState>,
    Path((name, rule_name)): Path<(String, String)>,
    Json(rule): Json<ThresholdRule>,
) -> ApiResult<Json<CollectorView>> {
    if rule.name != rule_name {
        return Err(ApiError::InvalidRequest(format!(
            "rule name '{}' does not match path '{rule_name}'",
            rule.name
        )));
    }

    Ok(Json(state.scheduler.upsert_rule(&name, rule).await?))
}

/// PUT /api/v1/collectors/:name/queries
pub async fn replace_queries(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(queries): Json<Vec<VersionQuery>>,
) -> ApiResult<Json<CollectorView>> {
    Ok(Json(state.scheduler.replace_queries(&name, queries).await?))
}

/// POST /api/v1/collectors/:name/trigger
///
/// Starts a run immediately. Returns 202 when the run was accepted and 409
/// when the collector is already running or disabled.
pub async fn trigger_collector(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(request): Json<TriggerRequest>,
) -> ApiResult<(StatusCode, Json<TriggerResponse>)> {
    let response = TriggerResponse::from(state.scheduler.trigger(&name, request).await?);

    let status = if response.accepted {
        StatusCode::ACCEPTED
    } else {
        StatusCode::CONFLICT
    };
    Ok((status, Json(response)))
}

/// GET /api/v1/collectors/:name/reliability?hours=N
pub async fn get_reliability(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(query): Query<HoursQuery>,
) -> ApiResult<Json<ReliabilityStats>> {
    let end = Utc::now();
    let start = query.start(end).map_err(ApiError::InvalidRequest)?;

    if state.scheduler.get_collector(&name).await?.is_none() {
        return Err(ApiError::NotFound(format!("unknown collector '{name}'")));
    }

    let entries = state
        .store
        .query_executions(&ExecutionFilter {
            collector: Some(name.clone()),
            start: Some(start),
            end: Some(end),
            ..Default::default()
        })
        .await?;

    Ok(Json(ReliabilityStats::from_entries(&name, &entries)))
}
