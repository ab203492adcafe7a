//! Execution log endpoints

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde_json::{Value, json};

use crate::{
    api::{
        error::{ApiError, ApiResult},
        state::ApiState,
        types::{DEFAULT_EXECUTION_LIMIT, ExecutionQuery, MAX_EXECUTION_LIMIT},
    },
    model::{ExecutionFilter, ExecutionId, ExecutionLogEntry, RunStatus},
};

/// GET /api/v1/executions?collector=&status=&start=&end=&limit=
///
/// Run log, newest first
pub async fn list_executions(
    State(state): State<ApiState>,
    Query(query): Query<ExecutionQuery>,
) -> ApiResult<Json<Value>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<RunStatus>)
        .transpose()
        .map_err(ApiError::InvalidRequest)?;

    let filter = ExecutionFilter {
        collector: query.collector,
        status,
        start: query.start,
        end: query.end,
        limit: Some(
            query
                .limit
                .unwrap_or(DEFAULT_EXECUTION_LIMIT)
                .min(MAX_EXECUTION_LIMIT),
        ),
    };

    let executions = state.store.query_executions(&filter).await?;

    Ok(Json(json!({
        "count": executions.len(),
        "executions": executions,
    })))
}

/// GET /api/v1/executions/:id
pub async fn get_execution(
    State(state): State<ApiState>,
    Path(id): Path<ExecutionId>,
) -> ApiResult<Json<ExecutionLogEntry>> {
    state
        .store
        .get_execution(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("execution #{id} not found")))
}
