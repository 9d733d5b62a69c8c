//! Integration tests for the control surface
//!
//! These tests verify that:
//! - Alerts can be listed, snoozed and acknowledged over HTTP
//! - Unknown alerts map to 404 and invalid transitions to 409
//! - Threshold updates are validated, persisted and reloaded
//! - Node routes exist only on hubs

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use chrono::Utc;
use gpu_hub::{
    alerts::{AlertEngine, AlertLog, EngineSettings},
    api::{ApiConfig, ApiState, spawn_api_server},
    registry::{NodeRegistry, ReconnectPolicy},
    room::{Room, RoomSettings},
    source::StaticSource,
    thresholds::{Metric, Threshold, ThresholdConfig},
};
use serde_json::{Value, json};
use tokio::sync::watch;

use crate::helpers::*;

struct TestServer {
    addr: SocketAddr,
    room: Room,
    _shutdown: watch::Sender<bool>,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

fn settings() -> RoomSettings {
    RoomSettings {
        tick_interval: Duration::from_secs(3600),
        subscriber_timeout: Duration::from_millis(200),
    }
}

fn engine() -> AlertEngine {
    let thresholds =
        ThresholdConfig::from_iter([(Metric::Temperature, Threshold::new(75.0, 85.0))]);
    AlertEngine::new(thresholds, EngineSettings::default())
}

async fn serve(room: Room, thresholds_path: Option<PathBuf>) -> TestServer {
    let (shutdown, shutdown_rx) = watch::channel(false);
    let config = ApiConfig::new("127.0.0.1:0".parse().unwrap());
    let state = ApiState::new(room.clone(), thresholds_path);
    let addr = spawn_api_server(config, state, shutdown_rx).await.unwrap();

    TestServer {
        addr,
        room,
        _shutdown: shutdown,
    }
}

async fn spawn_single(temperatures: &[f64], engine: AlertEngine) -> TestServer {
    let source = Arc::new(StaticSource::new(gpu_snapshot(temperatures)));
    serve(Room::local("gpu-01", source, engine, settings()), None).await
}

#[tokio::test]
async fn test_health_endpoint_returns_ok() {
    let server = spawn_single(&[40.0], engine()).await;

    let response = reqwest::get(server.url("/api/v1/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json: Value = response.json().await.unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["mode"], "single");
    assert_eq!(json["subscribers"], 0);
    assert!(json["timestamp"].is_string());
}

#[tokio::test]
async fn test_alert_actions() {
    let server = spawn_single(&[90.0], engine()).await;
    let id = server.room.tick(Utc::now()).await.unwrap().created[0].id;
    let client = reqwest::Client::new();

    let json: Value = reqwest::get(server.url("/api/v1/alerts"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["needs_attention"], 1);
    assert_eq!(json["alerts"][0]["id"], id);
    assert_eq!(json["alerts"][0]["metric"], "temperature");
    assert_eq!(json["alerts"][0]["state"], "active");

    let response = client
        .post(server.url(&format!("/api/v1/alerts/{id}/snooze")))
        .json(&json!({"seconds": 120}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: Value = response.json().await.unwrap();
    assert_eq!(json["state"], "snoozed");
    assert!(json["snooze_until"].is_string());

    // only active alerts can be snoozed
    let response = client
        .post(server.url(&format!("/api/v1/alerts/{id}/snooze")))
        .json(&json!({"seconds": 120}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json: Value = response.json().await.unwrap();
    assert!(json["error"].as_str().unwrap().contains("snoozed"));

    let response = client
        .post(server.url(&format!("/api/v1/alerts/{id}/acknowledge")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(server.room.alerts().await.1, 0);

    let response = client
        .post(server.url("/api/v1/alerts/4242/acknowledge"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_snooze_rejects_zero_duration() {
    let server = spawn_single(&[90.0], engine()).await;
    let id = server.room.tick(Utc::now()).await.unwrap().created[0].id;

    let response = reqwest::Client::new()
        .post(server.url(&format!("/api/v1/alerts/{id}/snooze")))
        .json(&json!({"seconds": 0}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_alert_log_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let log = AlertLog::new(dir.path().join("alerts.log"));
    let server = spawn_single(&[80.0, 95.0], engine().with_log(log)).await;
    server.room.tick(Utc::now()).await.unwrap();

    let json: Value = reqwest::get(server.url("/api/v1/alerts/log?limit=1"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let records = json["records"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["scope"], "gpu-01");

    let json: Value = reqwest::get(server.url("/api/v1/alerts/log"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["records"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_threshold_update_is_validated_and_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("thresholds.json");
    let source = Arc::new(StaticSource::new(gpu_snapshot(&[70.0])));
    let room = Room::local("gpu-01", source, engine(), settings());
    let server = serve(room, Some(path.clone())).await;
    let client = reqwest::Client::new();

    let response = client
        .put(server.url("/api/v1/thresholds"))
        .json(&json!({"temperature": {"warning": 90, "critical": 80}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!path.exists());

    let response = client
        .put(server.url("/api/v1/thresholds"))
        .json(&json!({"gpu_fan": {"warning": 50, "critical": 80}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .put(server.url("/api/v1/thresholds"))
        .json(&json!({"temperature": {"warning": 60, "critical": 65}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        ThresholdConfig::load(&path).unwrap().get(Metric::Temperature),
        Some(Threshold::new(60.0, 65.0))
    );

    // applies on the next tick
    let created = server.room.tick(Utc::now()).await.unwrap().created;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].threshold, 65.0);

    std::fs::write(&path, r#"{"temperature": {"warning": 71, "critical": 72}}"#).unwrap();
    let response = client
        .post(server.url("/api/v1/thresholds/reload"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json: Value = reqwest::get(server.url("/api/v1/thresholds"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["temperature"]["warning"], 71.0);
}

#[tokio::test]
async fn test_reload_without_file_is_rejected() {
    let server = spawn_single(&[40.0], engine()).await;

    let response = reqwest::Client::new()
        .post(server.url("/api/v1/thresholds/reload"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_node_routes_only_on_hub() {
    let single = spawn_single(&[40.0], engine()).await;
    let response = reqwest::get(single.url("/api/v1/nodes")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let connector = ScriptedConnector::new([]);
    let registry = NodeRegistry::new(connector, ReconnectPolicy::fixed(Duration::from_secs(60)));
    let hub = serve(
        Room::cluster(registry.clone(), engine(), settings()),
        None,
    )
    .await;
    let client = reqwest::Client::new();

    let response = client
        .post(hub.url("/api/v1/nodes"))
        .json(&json!({"url": "http://not-a-stream"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .post(hub.url("/api/v1/nodes"))
        .json(&json!({"url": "ws://10.0.0.9:1312/api/v1/stream"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let json: Value = response.json().await.unwrap();
    assert_eq!(json["status"], "offline");
    assert_eq!(json["display_name"], "ws://10.0.0.9:1312/api/v1/stream");

    let json: Value = reqwest::get(hub.url("/api/v1/nodes"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["total_count"], 1);
    assert_eq!(json["online_count"], 0);

    let response = client
        .delete(hub.url("/api/v1/nodes"))
        .json(&json!({"url": "ws://10.0.0.9:1312/api/v1/stream"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(registry.is_empty().await);

    let response = client
        .delete(hub.url("/api/v1/nodes"))
        .json(&json!({"url": "ws://10.0.0.9:1312/api/v1/stream"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    registry.shutdown(Duration::from_secs(1)).await;
}
