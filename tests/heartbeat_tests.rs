//! Heartbeat reporter tests

mod common;

use common::*;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use uplink_agent::remote::proto::{KeyValue, SourceIdentity};
use uplink_agent::remote::{ChannelManager, ChannelStatus, RpcError};
use uplink_agent::uplink::{HeartbeatKind, HeartbeatReporter, HostFacts};

struct FixedHostFacts;

impl HostFacts for FixedHostFacts {
    fn properties(&self) -> Vec<KeyValue> {
        vec![
            KeyValue::new("os_name", "linux"),
            KeyValue::new("hostname", "build-07"),
        ]
    }

    fn primary_ipv4(&self) -> Option<Ipv4Addr> {
        Some(Ipv4Addr::new(10, 1, 2, 3))
    }
}

fn reporter_for(
    manager: &Arc<ChannelManager>,
    sink: &Arc<RecordingSink>,
    factor: u64,
) -> Arc<HeartbeatReporter> {
    let mut properties = BTreeMap::new();
    properties.insert("zone".to_string(), "eu-1".to_string());
    properties.insert("env".to_string(), "prod".to_string());

    let reporter = Arc::new(HeartbeatReporter::new(
        Arc::clone(manager),
        SourceIdentity {
            service: "billing".to_string(),
            service_instance: "billing-0".to_string(),
        },
        properties,
        Arc::new(FixedHostFacts),
        sink.clone(),
        factor,
        Duration::from_millis(200),
    ));
    reporter.subscribe();
    reporter
}

async fn connected(
    factor: u64,
) -> (Arc<MockConnector>, Arc<ChannelManager>, Arc<RecordingSink>, Arc<HeartbeatReporter>) {
    let connector = MockConnector::new();
    let manager = manager_with("127.0.0.1:11800", 1, connector.clone());
    let sink = Arc::new(RecordingSink::default());
    let reporter = reporter_for(&manager, &sink, factor);
    manager.check().await;
    (connector, manager, sink, reporter)
}

#[tokio::test]
async fn test_properties_every_factor_ticks() {
    let (connector, _manager, _sink, reporter) = connected(5).await;

    let mut kinds = Vec::new();
    for _ in 0..12 {
        kinds.push(reporter.tick().await);
    }

    let properties_at: Vec<usize> = kinds
        .iter()
        .enumerate()
        .filter(|(_, k)| **k == Some(HeartbeatKind::Properties))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(properties_at, vec![0, 5, 10]);
    assert_eq!(connector.behavior.properties.lock().len(), 3);
    assert_eq!(connector.behavior.pings.lock().len(), 9);
    assert_eq!(reporter.counter(), 12);
}

#[tokio::test]
async fn test_factor_zero_always_reports_properties() {
    let (connector, _manager, _sink, reporter) = connected(0).await;
    for _ in 0..3 {
        assert_eq!(reporter.tick().await, Some(HeartbeatKind::Properties));
    }
    assert!(connector.behavior.pings.lock().is_empty());
}

#[tokio::test]
async fn test_properties_snapshot_order() {
    let (connector, _manager, _sink, reporter) = connected(10).await;
    reporter.tick().await;

    let sent = connector.behavior.properties.lock()[0].clone();
    assert_eq!(sent.service, "billing");
    assert_eq!(sent.service_instance, "billing-0");
    let keys: Vec<&str> = sent.properties.iter().map(|kv| kv.key.as_str()).collect();
    assert_eq!(keys, vec!["env", "zone", "os_name", "hostname"]);
    assert_eq!(sent, reporter.instance_properties());
}

#[tokio::test]
async fn test_tick_skipped_while_disconnected() {
    let connector = MockConnector::new();
    let manager = manager_with("127.0.0.1:11800", 1, connector.clone());
    let sink = Arc::new(RecordingSink::default());
    let reporter = reporter_for(&manager, &sink, 3);

    assert_eq!(reporter.tick().await, None);
    assert_eq!(reporter.counter(), 0);
    assert!(connector.behavior.properties.lock().is_empty());
}

#[tokio::test]
async fn test_keep_alive_commands_forwarded() {
    let (connector, _manager, sink, reporter) = connected(2).await;
    *connector.behavior.commands.lock() = command("dump-threads");

    assert_eq!(reporter.tick().await, Some(HeartbeatKind::Properties));
    assert_eq!(reporter.tick().await, Some(HeartbeatKind::KeepAlive));

    assert_eq!(*sink.received.lock(), vec![command("dump-threads")]);
    assert_eq!(connector.behavior.pings.lock()[0].service, "billing");
}

#[tokio::test]
async fn test_keep_alive_failure_disconnects() {
    let (connector, manager, _sink, reporter) = connected(2).await;
    reporter.tick().await;
    *connector.behavior.fail_with.lock() = Some(RpcError::unavailable("broken pipe"));

    assert_eq!(reporter.tick().await, Some(HeartbeatKind::KeepAlive));
    assert_eq!(manager.status(), ChannelStatus::Disconnected);
    assert_eq!(reporter.tick().await, None);
    assert_eq!(reporter.counter(), 2);
}
