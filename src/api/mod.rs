//! REST API and WebSocket server of the hub
//!
//! This module provides HTTP endpoints for collector administration, manual
//! triggers, score queries and the execution log, plus WebSocket support for
//! real-time score streaming.
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Health check
//! - `GET /api/v1/stats` - Hub statistics
//! - `GET /api/v1/collectors` - Collectors with runtime state
//! - `GET /api/v1/collectors/summary` - Enabled, running, last execution
//! - `GET|PATCH /api/v1/collectors/{name}` - One collector
//! - `PUT /api/v1/collectors/{name}/rules` - Replace threshold rules
//! - `PUT /api/v1/collectors/{name}/rules/{rule}` - Upsert one rule
//! - `PUT /api/v1/collectors/{name}/queries` - Replace version queries
//! - `POST /api/v1/collectors/{name}/trigger` - Manual run
//! - `GET /api/v1/collectors/{name}/reliability` - Reliability rollup
//! - `GET /api/v1/executions` - Execution log
//! - `GET /api/v1/executions/{id}` - One run
//! - `GET /api/v1/scores` - Latest composite per instance
//! - `GET /api/v1/instances/{id}/scores` - Latest scores of one instance
//! - `GET /api/v1/instances/{id}/categories/{category}/history` - Category trend
//! - `GET /api/v1/instances/{id}/composite/history` - Composite trend
//! - `WS /api/v1/stream` - Real-time score streaming

pub mod error;
pub mod routes;
pub mod state;
pub mod types;
pub mod websocket;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;

use std::net::SocketAddr;

use axum::{
    Router,
    routing::{get, post, put},
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ApiSettings;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:8080")
    pub bind_addr: SocketAddr,

    /// Enable CORS for dashboards
    pub enable_cors: bool,
}

impl From<&ApiSettings> for ApiConfig {
    fn from(settings: &ApiSettings) -> Self {
        Self {
            bind_addr: settings.bind,
            enable_cors: settings.enable_cors,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self::from(&ApiSettings::default())
    }
}

/// Build the router with all routes
pub fn router(state: ApiState, enable_cors: bool) -> Router {
    let app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/stats", get(routes::stats::get_stats))
        .route(
            "/api/v1/collectors",
            get(routes::collectors::list_collectors),
        )
        .route(
            "/api/v1/collectors/summary",
            get(routes::collectors::get_summary),
        )
        .route(
            "/api/v1/collectors/:name",
            get(routes::collectors::get_collector).patch(routes::collectors::update_collector),
        )
        .route(
            "/api/v1/collectors/:name/rules",
            put(routes::collectors::replace_rules),
        )
        .route(
            "/api/v1/collectors/:name/rules/:rule",
            put(routes::collectors::upsert_rule),
        )
        .route(
            "/api/v1/collectors/:name/queries",
            put(routes::collectors::replace_queries),
        )
        .route(
            "/api/v1/collectors/:name/trigger",
            post(routes::collectors::trigger_collector),
        )
        .route(
            "/api/v1/collectors/:name/reliability",
            get(routes::collectors::get_reliability),
        )
        .route(
            "/api/v1/executions",
            get(routes::executions::list_executions),
        )
        .route(
            "/api/v1/executions/:id",
            get(routes::executions::get_execution),
        )
        .route("/api/v1/scores", get(routes::scores::fleet_scores))
        .route(
            "/api/v1/instances/:id/scores",
            get(routes::scores::instance_scores),
        )
        .route(
            "/api/v1/instances/:id/categories/:category/history",
            get(routes::scores::category_history),
        )
        .route(
            "/api/v1/instances/:id/composite/history",
            get(routes::scores::composite_history),
        )
        .route("/api/v1/stream", get(websocket::websocket_handler))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app.layer(cors)
    } else {
        app
    }
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);

    let app = router(state, config.enable_cors);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
