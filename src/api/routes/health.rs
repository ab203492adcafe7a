//! Health check endpoint

use axum::{Json, extract::State};

use crate::api::{state::ApiState, types::HealthResponse};

/// GET /api/v1/health
///
/// Returns hub liveness and the storage backend's health
pub async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    let (storage_healthy, storage_message) = match state.store.health_check().await {
        Ok(health) => (health.healthy, health.message),
        Err(e) => (false, e.to_string()),
    };

    Json(HealthResponse {
        status: if storage_healthy { "ok" } else { "degraded" }.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        storage_healthy,
        storage_message,
    })
}
