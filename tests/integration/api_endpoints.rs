//! Integration tests for API endpoints
//!
//! These tests verify that:
//! - All REST endpoints return correct responses
//! - Admin edits are validated and applied
//! - Manual triggers report accepted and rejected runs
//! - Error handling maps to the right status codes

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use dbvitals::{
    actors::Engine,
    api::{ApiConfig, ApiState, spawn_api_server},
    storage::{MemoryBackend, StorageBackend},
};
use serde_json::{Value, json};

use crate::helpers::{
    ScriptedProbe, eventually, fleet_bundles, instance, not_due, start_engine, wait_for_execution,
};

const SLOW_TICK: Duration = Duration::from_secs(3600);

async fn spawn_test_api(engine: &Engine) -> SocketAddr {
    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(), // Random port
        enable_cors: true,
    };

    spawn_api_server(config, ApiState::new(engine)).await.unwrap()
}

async fn setup(probe: ScriptedProbe) -> (Arc<dyn StorageBackend>, Engine, SocketAddr) {
    let store: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let engine = start_engine(
        store.clone(),
        probe,
        vec![instance("sql-01", "16.0"), instance("sql-02", "15.0")],
        fleet_bundles().into_iter().map(not_due).collect(),
        SLOW_TICK,
    )
    .await;
    let addr = spawn_test_api(&engine).await;
    (store, engine, addr)
}

async fn trigger_and_wait(
    client: &reqwest::Client,
    addr: SocketAddr,
    store: &Arc<dyn StorageBackend>,
    collector: &str,
) -> i64 {
    let response = client
        .post(format!("http://{addr}/api/v1/collectors/{collector}/trigger"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let json: Value = response.json().await.unwrap();
    let id = json["execution_id"].as_i64().unwrap();
    wait_for_execution(store, id).await;
    id
}

#[tokio::test]
async fn test_health_endpoint_returns_ok() {
    let (_store, _engine, addr) = setup(ScriptedProbe::fleet()).await;

    let response = reqwest::get(format!("http://{addr}/api/v1/health"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json: Value = response.json().await.unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["storage_healthy"], true);
    assert!(json["timestamp"].is_string());
}

#[tokio::test]
async fn test_stats_endpoint_returns_summary() {
    let (_store, _engine, addr) = setup(ScriptedProbe::fleet()).await;

    let json: Value = reqwest::get(format!("http://{addr}/api/v1/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(json["collectors"]["total"], 5);
    assert_eq!(json["collectors"]["enabled"], 5);
    assert_eq!(json["collectors"]["running"], 0);
    assert!(json["storage"].is_string());
}

#[tokio::test]
async fn test_list_and_get_collectors() {
    let (_store, _engine, addr) = setup(ScriptedProbe::fleet()).await;
    let client = reqwest::Client::new();

    let json: Value = client
        .get(format!("http://{addr}/api/v1/collectors"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["count"], 5);

    let cpu: Value = client
        .get(format!("http://{addr}/api/v1/collectors/cpu"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cpu["name"], "cpu");
    assert_eq!(cpu["category"], "cpu");
    assert_eq!(cpu["rules"].as_array().unwrap().len(), 2);
    assert!(cpu["running"].is_null());

    let summary: Value = client
        .get(format!("http://{addr}/api/v1/collectors/summary"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(summary["enabled"], 5);

    let missing = client
        .get(format!("http://{addr}/api/v1/collectors/nope"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    let body: Value = missing.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("nope"));
}

#[tokio::test]
async fn test_patch_collector_validates() {
    let (_store, _engine, addr) = setup(ScriptedProbe::fleet()).await;
    let client = reqwest::Client::new();

    let response = client
        .patch(format!("http://{addr}/api/v1/collectors/disk"))
        .json(&json!({"weight": 30, "enabled": false}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: Value = response.json().await.unwrap();
    assert_eq!(json["weight"], 30);
    assert_eq!(json["enabled"], false);

    let invalid = client
        .patch(format!("http://{addr}/api/v1/collectors/disk"))
        .json(&json!({"interval_secs": 0}))
        .send()
        .await
        .unwrap();
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

    let summary: Value = client
        .get(format!("http://{addr}/api/v1/collectors/summary"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(summary["enabled"], 4);
}

#[tokio::test]
async fn test_rule_and_query_edits() {
    let (_store, _engine, addr) = setup(ScriptedProbe::fleet()).await;
    let client = reqwest::Client::new();

    let rule = json!({
        "name": "idle",
        "threshold": 5,
        "operator": "<",
        "score": 90,
        "action": "warn",
        "evaluation_order": 3
    });
    let response = client
        .put(format!("http://{addr}/api/v1/collectors/cpu/rules/idle"))
        .json(&rule)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: Value = response.json().await.unwrap();
    assert_eq!(json["rules"].as_array().unwrap().len(), 3);

    let mismatch = client
        .put(format!("http://{addr}/api/v1/collectors/cpu/rules/other"))
        .json(&rule)
        .send()
        .await
        .unwrap();
    assert_eq!(mismatch.status(), StatusCode::BAD_REQUEST);

    let replaced = client
        .put(format!("http://{addr}/api/v1/collectors/cpu/rules"))
        .json(&json!([rule]))
        .send()
        .await
        .unwrap();
    assert_eq!(replaced.status(), StatusCode::OK);
    let json: Value = replaced.json().await.unwrap();
    assert_eq!(json["rules"].as_array().unwrap().len(), 1);

    let queries = client
        .put(format!("http://{addr}/api/v1/collectors/cpu/queries"))
        .json(&json!([
            {"min_version": "13", "max_version": "15.9", "template": "cpu_legacy"},
            {"min_version": "16", "template": "cpu"}
        ]))
        .send()
        .await
        .unwrap();
    assert_eq!(queries.status(), StatusCode::OK);
    let json: Value = queries.json().await.unwrap();
    assert_eq!(json["queries"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_trigger_accepts_then_rejects() {
    let (probe, gate) = ScriptedProbe::fleet().gated();
    let (store, _engine, addr) = setup(probe).await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/api/v1/collectors/cpu/trigger");

    let first = client
        .post(&url)
        .json(&json!({"triggered_by": "ops"}))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    let first: Value = first.json().await.unwrap();
    assert_eq!(first["accepted"], true);
    let execution_id = first["execution_id"].as_i64().unwrap();

    let second = client.post(&url).json(&json!({})).send().await.unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let second: Value = second.json().await.unwrap();
    assert_eq!(second["accepted"], false);
    assert_eq!(second["execution_id"], execution_id);
    assert_eq!(second["reason"], "already running");

    let bad_pattern = client
        .post(format!("http://{addr}/api/v1/collectors/memory/trigger"))
        .json(&json!({"name_pattern": "sql-("}))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_pattern.status(), StatusCode::BAD_REQUEST);

    gate.add_permits(2);
    let entry = wait_for_execution(&store, execution_id).await;
    assert_eq!(entry.triggered_by.as_deref(), Some("ops"));
}

#[tokio::test]
async fn test_execution_log_endpoints() {
    let (store, _engine, addr) = setup(ScriptedProbe::fleet()).await;
    let client = reqwest::Client::new();

    let cpu_run = trigger_and_wait(&client, addr, &store, "cpu").await;
    trigger_and_wait(&client, addr, &store, "disk").await;

    let json: Value = client
        .get(format!("http://{addr}/api/v1/executions"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["count"], 2);
    // Newest first
    assert_eq!(json["executions"][0]["collector"], "disk");

    let json: Value = client
        .get(format!(
            "http://{addr}/api/v1/executions?collector=cpu&status=completed"
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["count"], 1);

    let bad_status = client
        .get(format!("http://{addr}/api/v1/executions?status=exploded"))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_status.status(), StatusCode::BAD_REQUEST);

    let entry: Value = client
        .get(format!("http://{addr}/api/v1/executions/{cpu_run}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(entry["status"], "completed");
    assert_eq!(entry["success_count"], 2);

    let missing = client
        .get(format!("http://{addr}/api/v1/executions/9999"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let reliability: Value = client
        .get(format!("http://{addr}/api/v1/collectors/cpu/reliability?hours=1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reliability["runs"], 1);
    assert_eq!(reliability["success_rate"], 100.0);
}

#[tokio::test]
async fn test_score_endpoints() {
    let (store, _engine, addr) = setup(ScriptedProbe::fleet()).await;
    let client = reqwest::Client::new();

    for collector in ["backups", "cpu", "disk", "memory", "availability"] {
        trigger_and_wait(&client, addr, &store, collector).await;
    }

    let store_ref = &store;
    eventually(|| async move {
        let composite = store_ref.latest_composite("sql-02").await.unwrap()?;
        composite.detail.missing.is_empty().then_some(())
    })
    .await;

    let fleet: Value = client
        .get(format!("http://{addr}/api/v1/scores"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fleet["count"], 2);

    let scores: Value = client
        .get(format!("http://{addr}/api/v1/instances/sql-02/scores"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(scores["composite"]["composite"], 68.0);
    assert_eq!(scores["composite"]["status"], "risk");
    assert_eq!(scores["categories"].as_array().unwrap().len(), 5);

    let history: Value = client
        .get(format!(
            "http://{addr}/api/v1/instances/sql-02/categories/disk/history?hours=2"
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history["count"], 1);
    assert_eq!(history["scores"][0]["score"], 70);

    let composites: Value = client
        .get(format!(
            "http://{addr}/api/v1/instances/sql-02/composite/history"
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(composites["count"].as_u64().unwrap() >= 1);

    let unknown_instance = client
        .get(format!("http://{addr}/api/v1/instances/ghost/scores"))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown_instance.status(), StatusCode::NOT_FOUND);

    let bad_category = client
        .get(format!(
            "http://{addr}/api/v1/instances/sql-02/categories/vibes/history"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_category.status(), StatusCode::BAD_REQUEST);

    let bad_window = client
        .get(format!(
            "http://{addr}/api/v1/instances/sql-02/composite/history?hours=0"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_window.status(), StatusCode::BAD_REQUEST);
}
