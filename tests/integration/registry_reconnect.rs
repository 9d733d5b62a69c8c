//! Node registry connection lifecycle against scripted connectors
//!
//! - Offline while dials fail, Online once a stream opens
//! - Read failures flip a node back to Offline and it keeps retrying
//! - Malformed frames are skipped without dropping the connection
//! - Deregistration and shutdown stop the workers, even when racing a register

use std::time::Duration;

use gpu_hub::registry::{NodeRegistry, NodeStatus, ReconnectPolicy};

use crate::helpers::*;

const URL: &str = "ws://10.0.0.7:1312/api/v1/stream";

fn policy() -> ReconnectPolicy {
    ReconnectPolicy::fixed(Duration::from_millis(15))
}

async fn status(registry: &NodeRegistry) -> Option<NodeStatus> {
    registry.nodes().await.first().map(|node| node.status)
}

#[tokio::test]
async fn test_offline_until_dial_succeeds() {
    let connector = ScriptedConnector::new([
        Dial::Fail,
        Dial::Fail,
        Dial::Fail,
        Dial::Open(vec![Step::Frame(node_frame("rack-7", &[55.0, 61.0])), Step::Hang]),
    ]);
    let registry = NodeRegistry::new(
        connector.clone(),
        ReconnectPolicy::fixed(Duration::from_millis(60)),
    );

    let id = registry.register(URL).await;
    let node = registry.get(id).await.unwrap();
    assert_eq!(node.status, NodeStatus::Offline);
    assert_eq!(node.snapshot, None);
    assert_eq!(node.display_name, URL);

    assert!(wait_until(Duration::from_secs(2), || async { connector.attempts() >= 2 }).await);
    assert_eq!(status(&registry).await, Some(NodeStatus::Offline));

    assert!(
        wait_until(Duration::from_secs(2), || async {
            registry
                .get(id)
                .await
                .is_some_and(|node| node.is_online() && node.snapshot.is_some())
        })
        .await
    );

    let node = registry.get(id).await.unwrap();
    assert_eq!(connector.attempts(), 4);
    assert_eq!(node.display_name, "rack-7");
    assert_eq!(node.url, URL);
    assert_eq!(node.snapshot.unwrap().gpu_count(), 2);

    registry.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_read_failure_marks_offline_and_retries() {
    let connector = ScriptedConnector::new([Dial::Open(vec![
        Step::Frame(node_frame("rack-8", &[70.0])),
        Step::Fail,
    ])]);
    let registry = NodeRegistry::new(connector.clone(), policy());
    let id = registry.register(URL).await;

    // the stream dies after one frame and every later dial fails
    assert!(wait_until(Duration::from_secs(2), || async { connector.attempts() >= 3 }).await);

    let node = registry.get(id).await.unwrap();
    assert_eq!(node.status, NodeStatus::Offline);
    assert_eq!(node.display_name, "rack-8");
    assert_eq!(node.snapshot.unwrap().gpus[&0].temperature, 70.0);

    registry.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_remote_close_reconnects() {
    let connector = ScriptedConnector::new([
        Dial::Open(vec![Step::Frame(node_frame("a", &[40.0])), Step::Close]),
        Dial::Open(vec![Step::Frame(node_frame("a", &[41.0])), Step::Hang]),
    ]);
    let registry = NodeRegistry::new(connector.clone(), policy());
    let id = registry.register(URL).await;

    assert!(
        wait_until(Duration::from_secs(2), || async {
            registry.get(id).await.is_some_and(|node| {
                node.is_online()
                    && node
                        .snapshot
                        .is_some_and(|snapshot| snapshot.gpus[&0].temperature == 41.0)
            })
        })
        .await
    );
    assert_eq!(connector.attempts(), 2);

    registry.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection() {
    let connector = ScriptedConnector::new([Dial::Open(vec![
        Step::Frame("{\"gpus\": [1, 2".to_string()),
        Step::Frame("not json at all".to_string()),
        Step::Frame(node_frame("rack-9", &[50.0])),
        Step::Hang,
    ])]);
    let registry = NodeRegistry::new(connector.clone(), policy());
    let id = registry.register(URL).await;

    assert!(
        wait_until(Duration::from_secs(2), || async {
            registry
                .get(id)
                .await
                .is_some_and(|node| node.display_name == "rack-9")
        })
        .await
    );

    assert_eq!(status(&registry).await, Some(NodeStatus::Online));
    assert_eq!(connector.attempts(), 1);

    registry.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_register_is_idempotent() {
    let connector = ScriptedConnector::new([Dial::Open(vec![Step::Hang])]);
    let registry = NodeRegistry::new(connector.clone(), policy());

    let first = registry.register(URL).await;
    let second = registry.register(URL).await;
    assert_eq!(first, second);
    assert_eq!(registry.len().await, 1);

    registry.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_deregister_stops_worker() {
    let connector = ScriptedConnector::new([]);
    let registry = NodeRegistry::new(connector.clone(), policy());
    registry.register(URL).await;

    assert!(wait_until(Duration::from_secs(2), || async { connector.attempts() >= 2 }).await);

    assert!(registry.deregister(URL).await);
    assert!(!registry.deregister(URL).await);
    assert!(registry.is_empty().await);

    let attempts = connector.attempts();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(connector.attempts() <= attempts + 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_deregister_leaves_no_worker_behind() {
    let connector = ScriptedConnector::new([]);
    let registry = NodeRegistry::new(connector.clone(), policy());
    let urls = (0..32)
        .map(|i| format!("ws://10.0.1.{i}:1312/api/v1/stream"))
        .collect::<Vec<_>>();

    let races = urls.iter().map(|url| {
        let registry = registry.clone();
        let url = url.clone();
        tokio::spawn(async move {
            let register = tokio::spawn({
                let registry = registry.clone();
                let url = url.clone();
                async move { registry.register(&url).await }
            });
            registry.deregister(&url).await;
            register.await.unwrap();
            // the deregister may have run before the node existed
            registry.deregister(&url).await;
        })
    });
    for race in futures::future::join_all(races).await {
        race.unwrap();
    }
    assert!(registry.is_empty().await);

    tokio::time::sleep(Duration::from_millis(30)).await;
    let attempts = connector.attempts();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(connector.attempts(), attempts);
}

#[tokio::test]
async fn test_shutdown_closes_open_streams() {
    let connector = ScriptedConnector::new([
        Dial::Open(vec![Step::Hang]),
        Dial::Open(vec![Step::Hang]),
    ]);
    let registry = NodeRegistry::new(connector.clone(), policy());
    registry.register("ws://a").await;
    registry.register("ws://b").await;

    assert!(
        wait_until(Duration::from_secs(2), || async {
            registry.nodes().await.iter().all(|node| node.is_online())
        })
        .await
    );

    tokio::time::timeout(Duration::from_secs(2), registry.shutdown(Duration::from_secs(1)))
        .await
        .unwrap();

    assert_eq!(connector.closed(), 2);
    assert!(
        registry
            .nodes()
            .await
            .iter()
            .all(|node| node.status == NodeStatus::Offline)
    );
}
