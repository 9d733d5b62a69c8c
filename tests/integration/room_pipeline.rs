//! Rooms driving alert evaluation and fan-out
//!
//! - Alert timeline against a local source, including the durable log
//! - Cluster rooms over a scripted registry
//! - Failing subscribers are pruned without affecting the others

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use gpu_hub::{
    alerts::{AlertEngine, AlertLog, AlertState, EngineSettings, Severity},
    broadcast::ChannelSubscriber,
    registry::{NodeRegistry, ReconnectPolicy},
    room::{Room, RoomSettings},
    source::StaticSource,
    thresholds::{Metric, Threshold, ThresholdConfig},
};
use pretty_assertions::assert_eq;
use serde_json::Value;

use crate::helpers::*;

fn temperature_engine() -> AlertEngine {
    let thresholds =
        ThresholdConfig::from_iter([(Metric::Temperature, Threshold::new(75.0, 85.0))]);
    AlertEngine::new(thresholds, EngineSettings::default())
}

fn quiet_settings() -> RoomSettings {
    RoomSettings {
        tick_interval: Duration::from_secs(3600),
        subscriber_timeout: Duration::from_millis(200),
    }
}

#[tokio::test]
async fn test_alert_timeline_with_log() {
    let dir = tempfile::tempdir().unwrap();
    let log = AlertLog::new(dir.path().join("alerts.log"));
    let source = Arc::new(StaticSource::new(gpu_snapshot(&[87.0])));
    let room = Room::local(
        "gpu-01",
        source.clone(),
        temperature_engine().with_log(log.clone()),
        quiet_settings(),
    );

    let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
    let at = |secs| t0 + chrono::Duration::seconds(secs);

    let report = room.tick(at(0)).await.unwrap();
    assert_eq!(report.created.len(), 1);
    assert_eq!(report.created[0].severity(), Severity::Critical);
    assert_eq!(report.created[0].state, AlertState::Active);

    let records = log.read_recent(10).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].scope, "gpu-01");
    assert_eq!(records[0].gpu, Some(0));
    assert_eq!(records[0].value, 87.0);
    assert_eq!(records[0].threshold, 85.0);

    assert!(room.tick(at(1)).await.unwrap().created.is_empty());
    assert_eq!(room.alerts().await.0.len(), 1);

    source.set(gpu_snapshot(&[70.0])).await;
    room.tick(at(2)).await.unwrap();
    let (alerts, needs_attention) = room.alerts().await;
    assert_eq!(alerts[0].state, AlertState::Resolved);
    assert_eq!(alerts[0].resolved_at, Some(at(2)));
    assert_eq!(needs_attention, 0);

    room.tick(at(33)).await.unwrap();
    assert!(room.alerts().await.0.is_empty());
    assert_eq!(log.read_recent(10).unwrap().len(), 1);
}

#[tokio::test]
async fn test_failing_subscriber_is_pruned() {
    let source = Arc::new(StaticSource::new(gpu_snapshot(&[40.0])));
    let room = Room::local("gpu-01", source, temperature_engine(), quiet_settings());

    let (first, mut first_rx) = ChannelSubscriber::channel(4);
    let (second, mut second_rx) = ChannelSubscriber::channel(4);
    let (broken, broken_rx) = ChannelSubscriber::channel(4);
    drop(broken_rx);

    room.subscribe(Arc::new(first)).await;
    room.subscribe(Arc::new(second)).await;
    room.subscribe(Arc::new(broken)).await;
    assert_eq!(room.subscribers().await, 3);

    let report = room.tick(Utc::now()).await.unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(report.removed, 1);
    assert!(first_rx.recv().await.is_some());
    assert!(second_rx.recv().await.is_some());

    let report = room.tick(Utc::now()).await.unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(report.removed, 0);
    assert_eq!(room.subscribers().await, 2);

    room.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_cluster_room_frames() {
    let connector = ScriptedConnector::new([
        Dial::Open(vec![Step::Frame(node_frame("hot-node", &[91.0, 50.0])), Step::Hang]),
        Dial::Open(vec![Step::Frame(node_frame("cool-node", &[45.0])), Step::Hang]),
    ]);
    let registry = NodeRegistry::new(connector, ReconnectPolicy::fixed(Duration::from_millis(20)));
    registry.register("ws://10.0.0.1/api/v1/stream").await;
    registry.register("ws://10.0.0.2/api/v1/stream").await;

    assert!(
        wait_until(Duration::from_secs(2), || async {
            registry
                .nodes()
                .await
                .iter()
                .all(|node| node.is_online() && node.snapshot.is_some())
        })
        .await
    );

    let settings = RoomSettings {
        tick_interval: Duration::from_millis(20),
        subscriber_timeout: Duration::from_millis(200),
    };
    let room = Room::cluster(registry.clone(), temperature_engine(), settings);

    let (subscriber, mut rx) = ChannelSubscriber::channel(64);
    room.subscribe(Arc::new(subscriber)).await;

    let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    let frame: Value = serde_json::from_str(&frame).unwrap();

    assert_eq!(frame["mode"], "cluster");
    assert_eq!(frame["online_count"], 2);
    assert_eq!(frame["total_count"], 2);
    assert_eq!(frame["total_gpu_count"], 3);
    assert_eq!(frame["nodes"]["hot-node"]["status"], "online");
    assert!(
        frame["nodes"]["cool-node"]["url"]
            .as_str()
            .unwrap()
            .starts_with("ws://10.0.0.")
    );
    assert_eq!(frame["needs_attention"], 1);
    assert_eq!(frame["alerts"][0]["scope"], "hot-node");
    assert_eq!(frame["alerts"][0]["gpu"], 0);
    assert_eq!(frame["alerts"][0]["severity"], "critical");

    room.shutdown(Duration::from_secs(1)).await;
    registry.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_offline_nodes_are_not_evaluated() {
    let connector = ScriptedConnector::new([Dial::Open(vec![
        Step::Frame(node_frame("flaky", &[99.0])),
        Step::Fail,
    ])]);
    let registry = NodeRegistry::new(
        connector.clone(),
        ReconnectPolicy::fixed(Duration::from_millis(20)),
    );
    registry.register("ws://10.0.0.3/api/v1/stream").await;

    assert!(wait_until(Duration::from_secs(2), || async { connector.attempts() >= 2 }).await);

    let room = Room::cluster(registry.clone(), temperature_engine(), quiet_settings());
    let report = room.tick(Utc::now()).await.unwrap();
    assert!(report.created.is_empty());

    let view = serde_json::to_value(room.current_view().await.unwrap()).unwrap();
    assert_eq!(view["online_count"], 0);
    assert_eq!(view["total_count"], 1);
    assert_eq!(view["total_gpu_count"], 0);
    assert_eq!(view["nodes"]["flaky"]["status"], "offline");
    assert_eq!(
        view["nodes"]["flaky"]["snapshot"]["gpus"]["0"]["temperature"],
        99.0
    );

    registry.shutdown(Duration::from_secs(1)).await;
}
