//! Collector channel manager
//!
//! Keeps one live channel to a randomly selected collector endpoint. A
//! periodic check (re)builds the channel while a reconnect is pending; callers
//! report failed calls through [`ChannelManager::report_error`], which marks the
//! link broken for network-class failures. State transitions are fanned out to
//! registered [`ChannelListener`]s.
//!
//! Every transition (pending flag, status, notification) happens under one
//! lock, so the last notification a listener sees always matches
//! [`ChannelManager::status`]. Listeners must not call back into
//! [`ChannelManager::report_error`].

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::AgentConfig;
use crate::remote::channel::{parse_endpoints, ChannelPipeline, CollectorChannel, Connector, Endpoint};
use crate::remote::listener::{ChannelListener, ListenerRegistry};
use crate::remote::status::{ChannelStatus, RpcError};
use crate::utils::{PeriodicTask, DEFAULT_DNS_TIMEOUT};

/// Channel manager settings
#[derive(Debug, Clone)]
pub struct ChannelManagerConfig {
    /// Comma-separated `host:port` list
    pub backend_service: String,
    pub check_interval: Duration,
    /// Re-resolve the first configured host while a reconnect is pending
    pub resolve_dns_periodically: bool,
    /// Same-endpoint reselections before the channel is rebuilt (at least 1)
    pub force_reconnection_period: u32,
}

impl From<&AgentConfig> for ChannelManagerConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            backend_service: config.collector.backend_service.clone(),
            check_interval: config.collector.channel_check_interval(),
            resolve_dns_periodically: config.collector.resolve_dns_periodically,
            force_reconnection_period: config.agent.force_reconnection_period,
        }
    }
}

/// Host name resolution used for the periodic DNS refresh
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the system resolver, bounded by a lookup deadline
#[derive(Debug, Clone)]
pub struct SystemResolver {
    timeout: Duration,
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_DNS_TIMEOUT,
        }
    }
}

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::time::timeout(self.timeout, tokio::net::lookup_host((host, port)))
            .await
            .map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("DNS lookup timeout for {}", host),
                )
            })??;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

/// State owned by the check tick
struct CheckState {
    servers: Vec<Endpoint>,
    selected: Option<usize>,
    reconnect_count: u32,
    rng: StdRng,
}

pub struct ChannelManager {
    config: ChannelManagerConfig,
    configured: Vec<Endpoint>,
    pipeline: ChannelPipeline,
    connector: Arc<dyn Connector>,
    resolver: Arc<dyn Resolver>,
    check_state: tokio::sync::Mutex<CheckState>,
    reconnect: AtomicBool,
    status: AtomicU8,
    /// Held for each transition including listener notification
    transitions: Mutex<()>,
    /// Network failures reported so far
    failures: AtomicU64,
    channel: RwLock<Option<Arc<dyn CollectorChannel>>>,
    listeners: ListenerRegistry,
    task: Mutex<Option<PeriodicTask>>,
}

impl ChannelManager {
    pub fn new(
        config: ChannelManagerConfig,
        pipeline: ChannelPipeline,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let configured = parse_endpoints(&config.backend_service);
        Self {
            check_state: tokio::sync::Mutex::new(CheckState {
                servers: configured.clone(),
                selected: None,
                reconnect_count: 0,
                rng: StdRng::from_entropy(),
            }),
            config,
            configured,
            pipeline,
            connector,
            resolver: Arc::new(SystemResolver::default()),
            reconnect: AtomicBool::new(true),
            status: AtomicU8::new(ChannelStatus::Disconnected as u8),
            transitions: Mutex::new(()),
            failures: AtomicU64::new(0),
            channel: RwLock::new(None),
            listeners: ListenerRegistry::new(),
            task: Mutex::new(None),
        }
    }

    /// Use a seeded random source for endpoint selection
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.check_state.get_mut().rng = rng;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Start the periodic check; first check runs immediately
    ///
    /// With no configured endpoint nothing is scheduled and the uplink stays idle.
    pub fn start(self: &Arc<Self>) {
        if self.configured.is_empty() {
            error!("Collector server addresses are not set.");
            error!("Agent will not uplink any data.");
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let task = PeriodicTask::spawn("channel-check", self.config.check_interval, move || {
            let weak = weak.clone();
            async move {
                if let Some(manager) = weak.upgrade() {
                    manager.check().await;
                }
            }
        });
        if let Some(previous) = self.task.lock().replace(task) {
            warn!("Channel manager started twice, replacing {}", previous.name());
            drop(previous);
        }
    }

    /// One check tick; serialized against concurrent ticks
    pub async fn check(&self) {
        let mut state = self.check_state.lock().await;
        let failures = self.failures.load(Ordering::Acquire);
        let reconnect = self.reconnect.load(Ordering::Acquire);
        debug!("Selected collector service running, reconnect: {}", reconnect);

        if self.config.resolve_dns_periodically && reconnect {
            self.refresh_servers(&mut state).await;
        }

        if !reconnect {
            return;
        }

        if state.servers.is_empty() {
            debug!(
                "Selected collector service is not available. Wait {:?} to retry",
                self.config.check_interval
            );
            return;
        }

        let count = state.servers.len();
        let index = state.rng.gen_range(0..count);
        if state.selected != Some(index) {
            self.reconnect_to(&mut state, index).await;
            return;
        }

        let attempts = state.reconnect_count.saturating_add(1);
        if attempts >= self.config.force_reconnection_period {
            debug!(
                "Collector {} reselected {} times, rebuilding channel",
                state.servers[index], attempts
            );
            self.reconnect_to(&mut state, index).await;
        } else if self.current_channel_alive() {
            state.reconnect_count = attempts;
        } else {
            // Transport re-dials lazily; only observers need resynchronizing
            let _transition = self.transitions.lock();
            if self.failures.load(Ordering::Acquire) != failures {
                debug!("Collector failure reported during check, resync deferred");
                return;
            }
            state.reconnect_count = 0;
            self.reconnect.store(false, Ordering::Release);
            self.transition(ChannelStatus::Connected);
        }
    }

    async fn refresh_servers(&self, state: &mut CheckState) {
        let Some(first) = self.configured.first() else {
            return;
        };
        match self.resolver.resolve(&first.host, first.port).await {
            Ok(ips) if !ips.is_empty() => {
                state.servers = ips
                    .into_iter()
                    .map(|ip| Endpoint::new(ip.to_string(), first.port))
                    .collect();
                debug!("Resolved {} to {} collector addresses", first.host, state.servers.len());
            }
            Ok(_) => {
                warn!("Resolving {} of backend service returned no address", first);
            }
            Err(e) => {
                error!("Failed to resolve {} of backend service: {}", first, e);
            }
        }
    }

    async fn reconnect_to(&self, state: &mut CheckState, index: usize) {
        let endpoint = state.servers[index].clone();

        if let Some(old) = self.channel.write().take() {
            old.shutdown();
        }

        let built = match self.pipeline.settings_for(&endpoint) {
            Ok(settings) => self.connector.connect(settings).await,
            Err(e) => Err(e),
        };

        match built {
            Ok(channel) => {
                // Failures reported while building came from the old channel
                let _transition = self.transitions.lock();
                *self.channel.write() = Some(channel);
                state.selected = Some(index);
                state.reconnect_count = 0;
                self.reconnect.store(false, Ordering::Release);
                info!("Connected to collector {}", endpoint);
                self.transition(ChannelStatus::Connected);
            }
            Err(e) => {
                state.selected = None;
                error!("Create channel to {} fail: {}", endpoint, e);
            }
        }
    }

    fn current_channel_alive(&self) -> bool {
        self.channel
            .read()
            .as_ref()
            .map(|c| c.is_connected())
            .unwrap_or(false)
    }

    /// Caller holds `transitions`
    fn transition(&self, status: ChannelStatus) {
        self.status.store(status as u8, Ordering::Release);
        self.listeners.notify(status);
    }

    /// Feed back a failed remote call
    ///
    /// Network-class failures mark a reconnect pending and notify DISCONNECTED;
    /// anything else is left to the caller.
    pub fn report_error(&self, error: &RpcError) {
        if !error.is_network_error() {
            return;
        }
        warn!("Collector call failed with {}, reconnecting", error);
        let _transition = self.transitions.lock();
        self.failures.fetch_add(1, Ordering::AcqRel);
        self.reconnect.store(true, Ordering::Release);
        self.transition(ChannelStatus::Disconnected);
    }

    pub fn add_listener(&self, listener: Arc<dyn ChannelListener>) {
        self.listeners.add(listener);
    }

    /// Current live channel
    pub fn channel(&self) -> Result<Arc<dyn CollectorChannel>, RpcError> {
        self.channel
            .read()
            .clone()
            .ok_or_else(|| RpcError::unavailable("no collector channel available"))
    }

    pub fn status(&self) -> ChannelStatus {
        ChannelStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ChannelStatus::Connected
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect.load(Ordering::Acquire)
    }

    /// Endpoint of the current selection, if any
    pub async fn selected_endpoint(&self) -> Option<Endpoint> {
        let state = self.check_state.lock().await;
        state.selected.and_then(|i| state.servers.get(i).cloned())
    }

    /// Current candidate list
    pub async fn endpoints(&self) -> Vec<Endpoint> {
        self.check_state.lock().await.servers.clone()
    }

    /// Stop checking and tear the live channel down
    pub async fn shutdown(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.stop().await;
        }
        if let Some(channel) = self.channel.write().take() {
            channel.shutdown();
        }
        debug!("Channel manager shut down");
    }
}
