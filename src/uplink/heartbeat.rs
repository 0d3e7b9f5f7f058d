//! Heartbeat with periodic instance properties
//!
//! Each tick sends either a keep-alive ping or, every `factor` ticks starting
//! with the first, the full instance properties snapshot.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error};

use crate::remote::commands::CommandSink;
use crate::remote::listener::StatusCell;
use crate::remote::manager::ChannelManager;
use crate::remote::proto::{InstancePing, InstanceProperties, KeyValue, SourceIdentity};
use crate::uplink::host::HostFacts;
use crate::utils::{with_deadline, PeriodicTask};

/// Which call a heartbeat tick made
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatKind {
    Properties,
    KeepAlive,
}

pub struct HeartbeatReporter {
    manager: Arc<ChannelManager>,
    status: Arc<StatusCell>,
    identity: SourceIdentity,
    properties: BTreeMap<String, String>,
    host_facts: Arc<dyn HostFacts>,
    commands: Arc<dyn CommandSink>,
    factor: u64,
    deadline: Duration,
    counter: AtomicU64,
    task: Mutex<Option<PeriodicTask>>,
}

impl HeartbeatReporter {
    /// `factor` below 1 is treated as 1
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        manager: Arc<ChannelManager>,
        identity: SourceIdentity,
        properties: BTreeMap<String, String>,
        host_facts: Arc<dyn HostFacts>,
        commands: Arc<dyn CommandSink>,
        factor: u64,
        deadline: Duration,
    ) -> Self {
        Self {
            manager,
            status: Arc::new(StatusCell::new()),
            identity,
            properties,
            host_facts,
            commands,
            factor: factor.max(1),
            deadline,
            counter: AtomicU64::new(0),
            task: Mutex::new(None),
        }
    }

    /// Follow connectivity changes of the channel manager
    pub fn subscribe(&self) {
        self.manager.add_listener(self.status.clone());
    }

    /// Ticks taken so far
    pub fn counter(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Configured properties in key order, then host facts
    pub fn instance_properties(&self) -> InstanceProperties {
        let mut properties: Vec<KeyValue> = self
            .properties
            .iter()
            .map(|(k, v)| KeyValue::new(k.clone(), v.clone()))
            .collect();
        properties.extend(self.host_facts.properties());
        InstanceProperties {
            service: self.identity.service.clone(),
            service_instance: self.identity.service_instance.clone(),
            properties,
        }
    }

    pub fn start(self: &Arc<Self>, period: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let task = PeriodicTask::spawn("heartbeat", period, move || {
            let weak = weak.clone();
            async move {
                if let Some(reporter) = weak.upgrade() {
                    reporter.tick().await;
                }
            }
        });
        *self.task.lock() = Some(task);
    }

    /// One heartbeat; `None` when skipped for lack of connectivity
    pub async fn tick(&self) -> Option<HeartbeatKind> {
        if !self.status.is_connected() {
            return None;
        }
        let channel = match self.manager.channel() {
            Ok(channel) => channel,
            Err(e) => {
                debug!("heartbeat: no channel to send on: {}", e);
                return None;
            }
        };

        let count = self.counter.fetch_add(1, Ordering::Relaxed);
        if count % self.factor == 0 {
            let properties = self.instance_properties();
            match with_deadline(
                self.deadline,
                channel.report_instance_properties(properties),
            )
            .await
            {
                Ok(()) => debug!("heartbeat: reported instance properties"),
                Err(e) => {
                    error!("heartbeat: report instance properties fail: {}", e);
                    self.manager.report_error(&e);
                }
            }
            Some(HeartbeatKind::Properties)
        } else {
            let ping = InstancePing::from(&self.identity);
            match with_deadline(self.deadline, channel.keep_alive(ping)).await {
                Ok(commands) => self.commands.receive(commands),
                Err(e) => {
                    error!("heartbeat: keep alive fail: {}", e);
                    self.manager.report_error(&e);
                }
            }
            Some(HeartbeatKind::KeepAlive)
        }
    }

    pub async fn shutdown(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.stop().await;
        }
    }
}
