//! Uplink sender tests
//!
//! Batching, connectivity gating, failure discard and command forwarding.

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;

use uplink_agent::remote::proto::{Metric, SourceIdentity};
use uplink_agent::remote::{ChannelManager, ChannelStatus, RpcError, StatusCode};
use uplink_agent::uplink::{MetricReportService, MetricsSender};

fn identity() -> SourceIdentity {
    SourceIdentity {
        service: "checkout".to_string(),
        service_instance: "checkout-1@10.0.0.7".to_string(),
    }
}

fn sender_for(
    manager: &Arc<ChannelManager>,
    sink: &Arc<RecordingSink>,
    capacity: usize,
    deadline: Duration,
) -> Arc<MetricsSender> {
    let sender = Arc::new(MetricsSender::new(
        capacity,
        MetricReportService,
        Arc::clone(manager),
        identity(),
        deadline,
        sink.clone(),
    ));
    sender.subscribe();
    sender
}

/// Connected manager, subscribed sender and the mock behind them
async fn connected(capacity: usize) -> (Arc<MockConnector>, Arc<ChannelManager>, Arc<RecordingSink>, Arc<MetricsSender>) {
    let connector = MockConnector::new();
    let manager = manager_with("127.0.0.1:11800", 1, connector.clone());
    let sink = Arc::new(RecordingSink::default());
    let sender = sender_for(&manager, &sink, capacity, Duration::from_millis(200));
    manager.check().await;
    (connector, manager, sink, sender)
}

fn sample(n: usize) -> Metric {
    Metric::now(format!("m{}", n), n as f64).with_label("unit", "ms")
}

#[tokio::test]
async fn test_flush_skipped_while_disconnected() {
    let connector = MockConnector::new();
    let manager = manager_with("127.0.0.1:11800", 1, connector.clone());
    let sink = Arc::new(RecordingSink::default());
    let sender = sender_for(&manager, &sink, 16, Duration::from_millis(200));

    sender.offer(sample(0));
    sender.offer(sample(1));
    sender.flush().await;

    assert!(!sender.is_connected());
    assert_eq!(sender.buffer().len(), 2);
    assert!(connector.behavior.collected.lock().is_empty());
}

#[tokio::test]
async fn test_flush_sends_one_ordered_batch() {
    let (connector, _manager, sink, sender) = connected(16).await;
    *connector.behavior.commands.lock() = command("reset-sampling");

    for n in 0..3 {
        sender.offer(sample(n));
    }
    sender.flush().await;

    let collected = connector.behavior.collected.lock().clone();
    assert_eq!(collected.len(), 1);
    let batch = &collected[0];
    assert_eq!(batch.service, "checkout");
    assert_eq!(batch.service_instance, "checkout-1@10.0.0.7");
    let names: Vec<&str> = batch.metrics.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["m0", "m1", "m2"]);
    assert!(sender.buffer().is_empty());

    assert_eq!(*sink.received.lock(), vec![command("reset-sampling")]);
}

#[tokio::test]
async fn test_empty_buffer_makes_no_call() {
    let (connector, _manager, sink, sender) = connected(16).await;
    sender.flush().await;
    assert!(connector.behavior.collected.lock().is_empty());
    assert!(sink.received.lock().is_empty());
}

#[tokio::test]
async fn test_full_buffer_evicts_oldest() {
    let (connector, _manager, _sink, sender) = connected(4).await;
    for n in 0..6 {
        sender.offer(sample(n));
    }
    assert_eq!(sender.buffer().dropped(), 2);

    sender.flush().await;
    let collected = connector.behavior.collected.lock().clone();
    let values: Vec<f64> = collected[0].metrics.iter().map(|m| m.value).collect();
    assert_eq!(values, vec![2.0, 3.0, 4.0, 5.0]);
}

#[tokio::test]
async fn test_network_failure_discards_batch_and_reports() {
    let (connector, manager, _sink, sender) = connected(16).await;
    *connector.behavior.fail_with.lock() = Some(RpcError::unavailable("connection reset"));

    sender.offer(sample(0));
    sender.offer(sample(1));
    sender.flush().await;

    assert!(sender.buffer().is_empty());
    assert!(connector.behavior.collected.lock().is_empty());
    assert_eq!(manager.status(), ChannelStatus::Disconnected);
    assert!(!sender.is_connected());

    // Nothing is sent until the manager reconnects, and the lost batch stays lost
    *connector.behavior.fail_with.lock() = None;
    sender.offer(sample(2));
    sender.flush().await;
    assert!(connector.behavior.collected.lock().is_empty());

    manager.check().await;
    assert!(sender.is_connected());
    sender.flush().await;
    let collected = connector.behavior.collected.lock().clone();
    assert_eq!(collected.len(), 1);
    assert_eq!(collected[0].metrics.len(), 1);
    assert_eq!(collected[0].metrics[0].name, "m2");
}

#[tokio::test]
async fn test_non_network_failure_keeps_channel() {
    let (connector, manager, sink, sender) = connected(16).await;
    *connector.behavior.fail_with.lock() = Some(RpcError::internal("collector bug"));

    sender.offer(sample(0));
    sender.flush().await;

    assert!(sender.buffer().is_empty());
    assert_eq!(manager.status(), ChannelStatus::Connected);
    assert!(!manager.reconnect_pending());
    assert!(sink.received.lock().is_empty());
}

#[tokio::test]
async fn test_slow_collector_hits_deadline() {
    let connector = MockConnector::new();
    let manager = manager_with("127.0.0.1:11800", 1, connector.clone());
    let sink = Arc::new(RecordingSink::default());
    let sender = sender_for(&manager, &sink, 16, Duration::from_millis(20));
    manager.check().await;
    *connector.behavior.delay.lock() = Some(Duration::from_millis(500));

    sender.offer(sample(0));
    let started = std::time::Instant::now();
    sender.flush().await;

    assert!(started.elapsed() < Duration::from_millis(400));
    assert!(connector.behavior.collected.lock().is_empty());
    // Deadline expiry is not a link failure
    assert_eq!(manager.status(), ChannelStatus::Connected);
    assert!(!StatusCode::DeadlineExceeded.is_network_error());
}

#[tokio::test]
async fn test_periodic_flush_until_shutdown() {
    let (connector, _manager, _sink, sender) = connected(16).await;
    sender.start(Duration::from_millis(10));

    sender.offer(sample(0));
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(connector.behavior.collected.lock().len(), 1);

    sender.shutdown().await;
    sender.offer(sample(1));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connector.behavior.collected.lock().len(), 1);
    assert_eq!(sender.buffer().len(), 1);
}
