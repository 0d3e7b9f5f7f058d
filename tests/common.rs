#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use uplink_agent::remote::proto::{
    Command, Commands, InstancePing, InstanceProperties, KeyValue, MetricCollection,
};
use uplink_agent::remote::{
    ChannelListener, ChannelManager, ChannelManagerConfig, ChannelPipeline, ChannelSettings,
    ChannelStatus, CollectorChannel, CommandSink, Connector, Endpoint, RpcError,
};

/// Shared behaviour and call log of every channel a [`MockConnector`] creates
#[derive(Default)]
pub struct ChannelBehavior {
    pub dead: AtomicBool,
    pub fail_with: Mutex<Option<RpcError>>,
    pub delay: Mutex<Option<Duration>>,
    pub commands: Mutex<Commands>,
    pub collected: Mutex<Vec<MetricCollection>>,
    pub properties: Mutex<Vec<InstanceProperties>>,
    pub pings: Mutex<Vec<InstancePing>>,
}

impl ChannelBehavior {
    async fn respond(&self) -> Result<(), RpcError> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.fail_with.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

pub struct MockChannel {
    pub settings: ChannelSettings,
    pub behavior: Arc<ChannelBehavior>,
    pub shut_down: AtomicBool,
}

#[async_trait]
impl CollectorChannel for MockChannel {
    fn endpoint(&self) -> &Endpoint {
        &self.settings.endpoint
    }

    fn is_connected(&self) -> bool {
        !self.shut_down.load(Ordering::SeqCst) && !self.behavior.dead.load(Ordering::SeqCst)
    }

    async fn collect(&self, batch: MetricCollection) -> Result<Commands, RpcError> {
        self.behavior.respond().await?;
        self.behavior.collected.lock().push(batch);
        Ok(self.behavior.commands.lock().clone())
    }

    async fn report_instance_properties(
        &self,
        properties: InstanceProperties,
    ) -> Result<(), RpcError> {
        self.behavior.respond().await?;
        self.behavior.properties.lock().push(properties);
        Ok(())
    }

    async fn keep_alive(&self, ping: InstancePing) -> Result<Commands, RpcError> {
        self.behavior.respond().await?;
        self.behavior.pings.lock().push(ping);
        Ok(self.behavior.commands.lock().clone())
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockConnector {
    pub fail: AtomicBool,
    pub connects: AtomicUsize,
    pub channels: Mutex<Vec<Arc<MockChannel>>>,
    pub behavior: Arc<ChannelBehavior>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.channels
            .lock()
            .iter()
            .map(|c| c.settings.endpoint.clone())
            .collect()
    }

    pub fn last_channel(&self) -> Option<Arc<MockChannel>> {
        self.channels.lock().last().cloned()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        settings: ChannelSettings,
    ) -> Result<Arc<dyn CollectorChannel>, RpcError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RpcError::unavailable(format!(
                "connection refused by {}",
                settings.endpoint
            )));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        let channel = Arc::new(MockChannel {
            settings,
            behavior: Arc::clone(&self.behavior),
            shut_down: AtomicBool::new(false),
        });
        self.channels.lock().push(Arc::clone(&channel));
        Ok(channel)
    }
}

/// Command sink that keeps everything it receives
#[derive(Default)]
pub struct RecordingSink {
    pub received: Mutex<Vec<Commands>>,
}

impl CommandSink for RecordingSink {
    fn receive(&self, commands: Commands) {
        self.received.lock().push(commands);
    }
}

/// Listener that keeps every status it is notified of
#[derive(Default)]
pub struct RecordingListener {
    pub seen: Mutex<Vec<ChannelStatus>>,
}

impl RecordingListener {
    pub fn seen(&self) -> Vec<ChannelStatus> {
        self.seen.lock().clone()
    }
}

impl ChannelListener for RecordingListener {
    fn status_changed(&self, status: ChannelStatus) -> anyhow::Result<()> {
        self.seen.lock().push(status);
        Ok(())
    }
}

pub fn manager_config(backend: &str, force_reconnection_period: u32) -> ChannelManagerConfig {
    ChannelManagerConfig {
        backend_service: backend.to_string(),
        check_interval: Duration::from_millis(10),
        resolve_dns_periodically: false,
        force_reconnection_period,
    }
}

pub fn manager_with(
    backend: &str,
    force_reconnection_period: u32,
    connector: Arc<MockConnector>,
) -> Arc<ChannelManager> {
    Arc::new(
        ChannelManager::new(
            manager_config(backend, force_reconnection_period),
            ChannelPipeline::empty(),
            connector,
        )
        .with_rng(StdRng::seed_from_u64(42)),
    )
}

pub fn command(name: &str) -> Commands {
    Commands {
        commands: vec![Command {
            command: name.to_string(),
            args: vec![KeyValue::new("serial", "1")],
        }],
    }
}
