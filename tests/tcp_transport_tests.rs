//! TCP transport tests against an in-process collector
//!
//! The collector speaks the same framing as the agent: length-delimited
//! frames carrying bincode `Request`/`Response` envelopes.

mod common;

use bytes::Bytes;
use common::*;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use uplink_agent::config::AgentConfig;
use uplink_agent::remote::channel::{AGENT_VERSION_HEADER, AUTHENTICATION_HEADER};
use uplink_agent::remote::proto::{
    InstancePing, InstanceProperties, KeyValue, Metric, MetricCollection, Request, RequestBody,
    Response, ResponseBody,
};
use uplink_agent::remote::{
    AgentIdDecorator, AuthenticationDecorator, ChannelManager, ChannelPipeline, ChannelStatus,
    CollectorChannel, Connector, Endpoint, RpcError, StandardChannelBuilder, StatusCode,
    TcpConnector,
};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    Serve,
    RequireToken,
    /// Close the connection after the first response
    OneShot,
    /// Send an unrelated response before the real one
    Stale,
}

struct Collector {
    addr: SocketAddr,
    seen: Arc<Mutex<Vec<Request>>>,
    accepted: Arc<AtomicUsize>,
}

impl Collector {
    async fn spawn(mode: Mode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));

        let (log, count) = (Arc::clone(&seen), Arc::clone(&accepted));
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                count.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(socket, mode, Arc::clone(&log)));
            }
        });

        Self {
            addr,
            seen,
            accepted,
        }
    }

    fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.addr.ip().to_string(), self.addr.port())
    }

    fn requests(&self) -> Vec<Request> {
        self.seen.lock().clone()
    }
}

fn answer(request: &Request, mode: Mode) -> Result<ResponseBody, RpcError> {
    if mode == Mode::RequireToken
        && !request
            .metadata
            .iter()
            .any(|kv| kv.key == AUTHENTICATION_HEADER)
    {
        return Err(RpcError::unauthenticated("missing token"));
    }
    Ok(match &request.body {
        RequestBody::Collect(_) => ResponseBody::Commands(command("reset-sampling")),
        RequestBody::ReportInstanceProperties(_) => ResponseBody::Empty,
        RequestBody::KeepAlive(_) => ResponseBody::Empty,
    })
}

async fn reply(framed: &mut Framed<TcpStream, LengthDelimitedCodec>, response: &Response) -> bool {
    let bytes = bincode::serialize(response).unwrap();
    framed.send(Bytes::from(bytes)).await.is_ok()
}

async fn serve(socket: TcpStream, mode: Mode, seen: Arc<Mutex<Vec<Request>>>) {
    let mut framed = Framed::new(socket, LengthDelimitedCodec::new());
    while let Some(Ok(frame)) = framed.next().await {
        let request: Request = bincode::deserialize(&frame).unwrap();
        let result = answer(&request, mode);
        seen.lock().push(request.clone());

        if mode == Mode::Stale {
            let stale = Response {
                id: request.id + 1000,
                result: Ok(ResponseBody::Empty),
            };
            if !reply(&mut framed, &stale).await {
                return;
            }
        }
        if !reply(&mut framed, &Response { id: request.id, result }).await {
            return;
        }
        if mode == Mode::OneShot {
            return;
        }
    }
}

fn pipeline(token: Option<&str>) -> ChannelPipeline {
    ChannelPipeline::empty()
        .with_builder(StandardChannelBuilder)
        .with_decorator(AgentIdDecorator::new())
        .with_decorator(AuthenticationDecorator::new(token.map(str::to_string)))
}

async fn connect(collector: &Collector, token: Option<&str>) -> Arc<dyn CollectorChannel> {
    let settings = pipeline(token).settings_for(&collector.endpoint()).unwrap();
    TcpConnector::new(Duration::from_secs(2))
        .connect(settings)
        .await
        .unwrap()
}

fn batch() -> MetricCollection {
    MetricCollection {
        service: "orders".to_string(),
        service_instance: "orders-1".to_string(),
        metrics: vec![Metric::now("http.latency", 12.5).with_label("route", "/pay")],
    }
}

fn ping() -> InstancePing {
    InstancePing {
        service: "orders".to_string(),
        service_instance: "orders-1".to_string(),
    }
}

#[tokio::test]
async fn test_calls_carry_headers_and_return_commands() {
    let collector = Collector::spawn(Mode::Serve).await;
    let channel = connect(&collector, Some("s3cret")).await;
    assert!(channel.is_connected());

    let commands = channel.collect(batch()).await.unwrap();
    assert_eq!(commands, command("reset-sampling"));

    channel
        .report_instance_properties(InstanceProperties {
            service: "orders".to_string(),
            service_instance: "orders-1".to_string(),
            properties: vec![KeyValue::new("os_name", "linux")],
        })
        .await
        .unwrap();
    assert!(channel.keep_alive(ping()).await.unwrap().is_empty());

    let requests = collector.requests();
    assert_eq!(requests.len(), 3);
    let ids: Vec<u64> = requests.iter().map(|r| r.id).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    for request in &requests {
        assert!(request
            .metadata
            .contains(&KeyValue::new(AGENT_VERSION_HEADER, env!("CARGO_PKG_VERSION"))));
        assert!(request
            .metadata
            .contains(&KeyValue::new(AUTHENTICATION_HEADER, "s3cret")));
    }
    match &requests[0].body {
        RequestBody::Collect(sent) => assert_eq!(sent, &batch_with_time(sent)),
        other => panic!("unexpected request {:?}", other),
    }
    assert_eq!(collector.accepted.load(Ordering::SeqCst), 1);
}

/// `batch()` with the timestamp of an already-sent copy
fn batch_with_time(sent: &MetricCollection) -> MetricCollection {
    let mut expected = batch();
    for (metric, original) in expected.metrics.iter_mut().zip(&sent.metrics) {
        metric.time = original.time;
    }
    expected
}

#[tokio::test]
async fn test_remote_status_is_returned() {
    let collector = Collector::spawn(Mode::RequireToken).await;
    let channel = connect(&collector, None).await;

    let err = channel.keep_alive(ping()).await.unwrap_err();
    assert_eq!(err.code(), StatusCode::Unauthenticated);
    assert!(err.is_network_error());
    // The transport itself is fine
    assert!(channel.is_connected());
}

#[tokio::test]
async fn test_redial_after_collector_closes() {
    let collector = Collector::spawn(Mode::OneShot).await;
    let channel = connect(&collector, None).await;

    channel.keep_alive(ping()).await.unwrap();
    // Give the collector a moment to close its side
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = channel.keep_alive(ping()).await.unwrap_err();
    assert_eq!(err.code(), StatusCode::Unavailable);
    assert!(!channel.is_connected());

    channel.keep_alive(ping()).await.unwrap();
    assert!(channel.is_connected());
    assert_eq!(collector.accepted.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unrelated_responses_are_skipped() {
    let collector = Collector::spawn(Mode::Stale).await;
    let channel = connect(&collector, None).await;

    assert_eq!(
        channel.collect(batch()).await.unwrap(),
        command("reset-sampling")
    );
    assert!(channel.keep_alive(ping()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_connect_refused_is_unavailable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let settings = pipeline(None)
        .settings_for(&Endpoint::new("127.0.0.1", addr.port()))
        .unwrap();
    let err = TcpConnector::new(Duration::from_secs(2))
        .connect(settings)
        .await
        .err()
        .unwrap();
    assert_eq!(err.code(), StatusCode::Unavailable);
}

#[tokio::test]
async fn test_shut_down_channel_rejects_calls() {
    let collector = Collector::spawn(Mode::Serve).await;
    let channel = connect(&collector, None).await;

    channel.shutdown();
    assert!(!channel.is_connected());
    let err = channel.collect(batch()).await.unwrap_err();
    assert_eq!(err.code(), StatusCode::Unavailable);
    assert!(collector.requests().is_empty());
}

#[tokio::test]
async fn test_channel_manager_over_tcp() {
    let collector = Collector::spawn(Mode::RequireToken).await;
    let mut config = AgentConfig::default();
    config.collector.backend_service = collector.addr.to_string();
    config.agent.authentication = Some("s3cret".to_string());

    let manager = ChannelManager::new(
        manager_config(&config.collector.backend_service, 1),
        ChannelPipeline::standard(&config),
        Arc::new(TcpConnector::new(Duration::from_secs(2))),
    );
    manager.check().await;
    assert_eq!(manager.status(), ChannelStatus::Connected);

    let channel = manager.channel().unwrap();
    assert_eq!(channel.collect(batch()).await.unwrap(), command("reset-sampling"));
    assert_eq!(collector.requests().len(), 1);
}
