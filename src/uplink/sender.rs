//! Periodic batching sender
//!
//! Producers call [`UplinkSender::offer`] (never blocks, never fails). Every
//! flush period the sender drains its buffer and pushes one batch over the
//! current collector channel. A failed batch is logged and discarded.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::remote::channel::CollectorChannel;
use crate::remote::commands::CommandSink;
use crate::remote::listener::StatusCell;
use crate::remote::manager::ChannelManager;
use crate::remote::proto::{Commands, Metric, MetricCollection, SourceIdentity};
use crate::remote::status::RpcError;
use crate::uplink::buffer::BoundedChannel;
use crate::utils::{with_deadline, PeriodicTask};

/// Drained items plus the identity of their source
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<T> {
    pub identity: SourceIdentity,
    pub items: Vec<T>,
}

/// Remote call that delivers a batch of `T`
#[async_trait]
pub trait UplinkService<T: Send + 'static>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn push(
        &self,
        channel: &dyn CollectorChannel,
        batch: Batch<T>,
    ) -> Result<Commands, RpcError>;
}

/// Delivers metrics through `Collect`
#[derive(Debug, Default, Clone)]
pub struct MetricReportService;

#[async_trait]
impl UplinkService<Metric> for MetricReportService {
    fn name(&self) -> &'static str {
        "metric-sender"
    }

    async fn push(
        &self,
        channel: &dyn CollectorChannel,
        batch: Batch<Metric>,
    ) -> Result<Commands, RpcError> {
        channel
            .collect(MetricCollection {
                service: batch.identity.service,
                service_instance: batch.identity.service_instance,
                metrics: batch.items,
            })
            .await
    }
}

pub struct UplinkSender<T, S> {
    buffer: Arc<BoundedChannel<T>>,
    service: S,
    status: Arc<StatusCell>,
    manager: Arc<ChannelManager>,
    identity: SourceIdentity,
    deadline: Duration,
    commands: Arc<dyn CommandSink>,
    reported_dropped: AtomicU64,
    task: Mutex<Option<PeriodicTask>>,
}

pub type MetricsSender = UplinkSender<Metric, MetricReportService>;

impl<T, S> UplinkSender<T, S>
where
    T: Send + 'static,
    S: UplinkService<T> + 'static,
{
    pub fn new(
        capacity: usize,
        service: S,
        manager: Arc<ChannelManager>,
        identity: SourceIdentity,
        deadline: Duration,
        commands: Arc<dyn CommandSink>,
    ) -> Self {
        Self {
            buffer: Arc::new(BoundedChannel::new(capacity)),
            service,
            status: Arc::new(StatusCell::new()),
            manager,
            identity,
            deadline,
            commands,
            reported_dropped: AtomicU64::new(0),
            task: Mutex::new(None),
        }
    }

    /// Buffer handle for producers
    pub fn buffer(&self) -> Arc<BoundedChannel<T>> {
        Arc::clone(&self.buffer)
    }

    pub fn offer(&self, item: T) {
        self.buffer.offer(item);
    }

    /// Follow connectivity changes of the channel manager
    pub fn subscribe(&self) {
        self.manager.add_listener(self.status.clone());
    }

    pub fn is_connected(&self) -> bool {
        self.status.is_connected()
    }

    /// Schedule [`flush`](Self::flush) every `period`
    pub fn start(self: &Arc<Self>, period: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let task = PeriodicTask::spawn(self.service.name(), period, move || {
            let weak = weak.clone();
            async move {
                if let Some(sender) = weak.upgrade() {
                    sender.flush().await;
                }
            }
        });
        *self.task.lock() = Some(task);
    }

    /// Push everything buffered as one batch; no-op unless connected
    pub async fn flush(&self) {
        let name = self.service.name();
        if !self.status.is_connected() {
            return;
        }
        let channel = match self.manager.channel() {
            Ok(channel) => channel,
            Err(e) => {
                debug!("{}: no channel to send on: {}", name, e);
                return;
            }
        };

        let items = self.buffer.drain_all();
        if items.is_empty() {
            return;
        }
        let count = items.len();
        let batch = Batch {
            identity: self.identity.clone(),
            items,
        };

        match with_deadline(self.deadline, self.service.push(channel.as_ref(), batch)).await {
            Ok(commands) => {
                debug!("{}: sent {} items to {}", name, count, channel.endpoint());
                self.commands.receive(commands);
            }
            Err(e) => {
                error!(
                    "{}: send {} items to collector {} fail: {}",
                    name,
                    count,
                    channel.endpoint(),
                    e
                );
                self.manager.report_error(&e);
            }
        }

        let dropped = self.buffer.dropped();
        let previous = self.reported_dropped.swap(dropped, Ordering::Relaxed);
        if dropped > previous {
            warn!(
                "{}: buffer full, {} oldest items evicted since last flush",
                name,
                dropped - previous
            );
        }
    }

    /// Stop the flush task; buffered items are discarded with the sender
    pub async fn shutdown(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.stop().await;
        }
    }
}
