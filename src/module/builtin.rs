//! Builtin modules of the agent
//!
//! | module      | provider  | requires    | services                            |
//! |-------------|-----------|-------------|-------------------------------------|
//! | `collector` | `default` |             | `ChannelManager`, `SourceIdentity`  |
//! | `metrics`   | `default` | `collector` | `MetricsSender`                     |
//! | `heartbeat` | `default` | `collector` | `HeartbeatReporter`                 |

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::AgentConfig;
use crate::module::registry::ModuleRegistry;
use crate::module::services::ModuleDirectory;
use crate::module::traits::{ModuleDefinition, ModuleError, ModuleProvider, PrepareContext};
use crate::remote::channel::{ChannelPipeline, Connector};
use crate::remote::commands::{CommandSink, LoggingCommandSink};
use crate::remote::manager::{ChannelManager, ChannelManagerConfig};
use crate::remote::proto::SourceIdentity;
use crate::remote::tcp::TcpConnector;
use crate::uplink::heartbeat::HeartbeatReporter;
use crate::uplink::host::{HostFacts, SystemHostFacts};
use crate::uplink::sender::{MetricReportService, MetricsSender};

pub const COLLECTOR_MODULE: &str = "collector";
pub const METRICS_MODULE: &str = "metrics";
pub const HEARTBEAT_MODULE: &str = "heartbeat";
pub const DEFAULT_PROVIDER: &str = "default";

/// External collaborators of the builtin providers
#[derive(Clone)]
pub struct Collaborators {
    pub connector: Arc<dyn Connector>,
    pub commands: Arc<dyn CommandSink>,
    pub host_facts: Arc<dyn HostFacts>,
}

impl Collaborators {
    /// TCP transport, logged commands, facts of this host
    pub fn standard(config: &AgentConfig) -> Self {
        Self {
            connector: Arc::new(TcpConnector::new(config.collector.upstream_timeout())),
            commands: Arc::new(LoggingCommandSink),
            host_facts: Arc::new(SystemHostFacts::new(config.os_info.ipv4_list_size)),
        }
    }
}

/// Registry with the collector, metrics and heartbeat modules
pub fn builtin_registry(config: &AgentConfig, collaborators: Collaborators) -> ModuleRegistry {
    let config = Arc::new(config.clone());
    let mut registry = ModuleRegistry::new();

    registry.register_module(
        ModuleDefinition::new(COLLECTOR_MODULE)
            .with_service::<ChannelManager>()
            .with_service::<SourceIdentity>(),
    );
    registry.register_module(
        ModuleDefinition::new(METRICS_MODULE).with_service::<MetricsSender>(),
    );
    registry.register_module(
        ModuleDefinition::new(HEARTBEAT_MODULE).with_service::<HeartbeatReporter>(),
    );

    {
        let (config, collaborators) = (Arc::clone(&config), collaborators.clone());
        registry.register_provider(COLLECTOR_MODULE, DEFAULT_PROVIDER, move || {
            Box::new(CollectorProvider::new(Arc::clone(&config), collaborators.clone()))
        });
    }
    {
        let (config, collaborators) = (Arc::clone(&config), collaborators.clone());
        registry.register_provider(METRICS_MODULE, DEFAULT_PROVIDER, move || {
            Box::new(MetricsProvider::new(Arc::clone(&config), collaborators.clone()))
        });
    }
    registry.register_provider(HEARTBEAT_MODULE, DEFAULT_PROVIDER, move || {
        Box::new(HeartbeatProvider::new(Arc::clone(&config), collaborators.clone()))
    });

    registry
}

/// Owns the channel manager and the agent identity
pub struct CollectorProvider {
    config: Arc<AgentConfig>,
    collaborators: Collaborators,
    manager: Option<Arc<ChannelManager>>,
}

impl CollectorProvider {
    pub fn new(config: Arc<AgentConfig>, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
            manager: None,
        }
    }
}

#[async_trait]
impl ModuleProvider for CollectorProvider {
    fn prepare(&mut self, ctx: &mut PrepareContext<'_>) -> Result<(), ModuleError> {
        let manager = Arc::new(ChannelManager::new(
            ChannelManagerConfig::from(self.config.as_ref()),
            ChannelPipeline::standard(&self.config),
            Arc::clone(&self.collaborators.connector),
        ));
        let identity = SourceIdentity::resolve(
            &self.config.agent,
            self.collaborators.host_facts.as_ref(),
        );
        tracing::info!(
            "Agent identity: service={} instance={}",
            identity.service,
            identity.service_instance
        );

        ctx.register(Arc::clone(&manager));
        ctx.register(Arc::new(identity));
        self.manager = Some(manager);
        Ok(())
    }

    async fn start(&mut self, _modules: &ModuleDirectory) -> Result<(), ModuleError> {
        let manager = self
            .manager
            .as_ref()
            .ok_or_else(|| ModuleError::Configuration("collector not prepared".to_string()))?;
        manager.start();
        Ok(())
    }

    async fn shutdown(&mut self) {
        if let Some(manager) = &self.manager {
            manager.shutdown().await;
        }
    }
}

pub struct MetricsProvider {
    config: Arc<AgentConfig>,
    collaborators: Collaborators,
    sender: Option<Arc<MetricsSender>>,
}

impl MetricsProvider {
    pub fn new(config: Arc<AgentConfig>, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
            sender: None,
        }
    }
}

#[async_trait]
impl ModuleProvider for MetricsProvider {
    fn requires(&self) -> Vec<String> {
        vec![COLLECTOR_MODULE.to_string()]
    }

    fn prepare(&mut self, ctx: &mut PrepareContext<'_>) -> Result<(), ModuleError> {
        let manager = ctx.dependency::<ChannelManager>(COLLECTOR_MODULE)?;
        let identity = ctx.dependency::<SourceIdentity>(COLLECTOR_MODULE)?;

        let sender = Arc::new(MetricsSender::new(
            self.config.metrics.buffer_size,
            MetricReportService,
            manager,
            identity.as_ref().clone(),
            self.config.collector.upstream_timeout(),
            Arc::clone(&self.collaborators.commands),
        ));
        sender.subscribe();

        ctx.register(Arc::clone(&sender));
        self.sender = Some(sender);
        Ok(())
    }

    async fn start(&mut self, _modules: &ModuleDirectory) -> Result<(), ModuleError> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| ModuleError::Configuration("metrics not prepared".to_string()))?;
        sender.start(self.config.metrics.flush_period());
        Ok(())
    }

    async fn shutdown(&mut self) {
        if let Some(sender) = &self.sender {
            sender.shutdown().await;
        }
    }
}

pub struct HeartbeatProvider {
    config: Arc<AgentConfig>,
    collaborators: Collaborators,
    reporter: Option<Arc<HeartbeatReporter>>,
}

impl HeartbeatProvider {
    pub fn new(config: Arc<AgentConfig>, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
            reporter: None,
        }
    }
}

#[async_trait]
impl ModuleProvider for HeartbeatProvider {
    fn requires(&self) -> Vec<String> {
        vec![COLLECTOR_MODULE.to_string()]
    }

    fn prepare(&mut self, ctx: &mut PrepareContext<'_>) -> Result<(), ModuleError> {
        let manager = ctx.dependency::<ChannelManager>(COLLECTOR_MODULE)?;
        let identity = ctx.dependency::<SourceIdentity>(COLLECTOR_MODULE)?;

        let reporter = Arc::new(HeartbeatReporter::new(
            manager,
            identity.as_ref().clone(),
            self.config.agent.instance_properties.clone(),
            Arc::clone(&self.collaborators.host_facts),
            Arc::clone(&self.collaborators.commands),
            self.config.collector.properties_report_period_factor,
            self.config.collector.upstream_timeout(),
        ));
        reporter.subscribe();

        ctx.register(Arc::clone(&reporter));
        self.reporter = Some(reporter);
        Ok(())
    }

    async fn start(&mut self, _modules: &ModuleDirectory) -> Result<(), ModuleError> {
        let reporter = self
            .reporter
            .as_ref()
            .ok_or_else(|| ModuleError::Configuration("heartbeat not prepared".to_string()))?;
        reporter.start(self.config.collector.heartbeat_period());
        Ok(())
    }

    async fn shutdown(&mut self) {
        if let Some(reporter) = &self.reporter {
            reporter.shutdown().await;
        }
    }
}
