//! Collector channel abstraction and the channel construction pipeline
//!
//! A channel is built for one [`Endpoint`] by running every [`ChannelBuilder`]
//! over a fresh [`ChannelSettings`], then every [`ChannelDecorator`], and finally
//! handing the settings to a [`Connector`].

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use crate::config::AgentConfig;
use crate::remote::proto::{Commands, InstancePing, InstanceProperties, KeyValue, MetricCollection};
use crate::remote::status::RpcError;

/// Header carrying the agent version
pub const AGENT_VERSION_HEADER: &str = "agent-version";

/// Header carrying the authentication token
pub const AUTHENTICATION_HEADER: &str = "authentication";

/// Largest frame accepted on a collector channel (50 MiB)
pub const MAX_FRAME_LENGTH: usize = 50 * 1024 * 1024;

/// Collector address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host:port` or `[v6]:port`
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let (host, port) = if let Some(rest) = value.strip_prefix('[') {
            let (host, rest) = rest.split_once(']')?;
            (host, rest.strip_prefix(':')?)
        } else {
            value.rsplit_once(':')?
        };
        if host.is_empty() {
            return None;
        }
        let port = port.trim().parse().ok()?;
        Some(Self::new(host.trim(), port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Split a comma-separated backend list; invalid entries are logged and skipped
pub fn parse_endpoints(backend_service: &str) -> Vec<Endpoint> {
    backend_service
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| {
            let endpoint = Endpoint::parse(s);
            if endpoint.is_none() {
                warn!("Ignoring invalid collector address '{}'", s);
            }
            endpoint
        })
        .collect()
}

/// TLS material resolved by [`TlsChannelBuilder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    pub ca_path: PathBuf,
    pub server_name: String,
}

/// Everything a [`Connector`] needs to open a channel
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub endpoint: Endpoint,
    pub tls: Option<TlsSettings>,
    /// Headers attached to every call
    pub metadata: Vec<KeyValue>,
    pub max_frame_length: usize,
}

impl ChannelSettings {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            tls: None,
            metadata: Vec::new(),
            max_frame_length: MAX_FRAME_LENGTH,
        }
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|kv| kv.key == key)
            .map(|kv| kv.value.as_str())
    }
}

/// Configures transport-level settings
pub trait ChannelBuilder: Send + Sync {
    fn configure(&self, settings: &mut ChannelSettings) -> Result<(), RpcError>;
}

/// Adds per-call behaviour (headers)
pub trait ChannelDecorator: Send + Sync {
    fn decorate(&self, settings: &mut ChannelSettings);
}

/// Plaintext transport with the default frame limit
pub struct StandardChannelBuilder;

impl ChannelBuilder for StandardChannelBuilder {
    fn configure(&self, settings: &mut ChannelSettings) -> Result<(), RpcError> {
        settings.tls = None;
        settings.max_frame_length = MAX_FRAME_LENGTH;
        Ok(())
    }
}

/// Switches to TLS when a CA file is configured
pub struct TlsChannelBuilder {
    ca_path: Option<PathBuf>,
    server_name: Option<String>,
}

impl TlsChannelBuilder {
    pub fn new(config: Option<&crate::config::TlsConfig>) -> Self {
        Self {
            ca_path: config.map(|c| PathBuf::from(&c.ca_path)),
            server_name: config.and_then(|c| c.server_name.clone()),
        }
    }
}

impl ChannelBuilder for TlsChannelBuilder {
    fn configure(&self, settings: &mut ChannelSettings) -> Result<(), RpcError> {
        let Some(ca_path) = &self.ca_path else {
            return Ok(());
        };
        if !ca_path.is_file() {
            return Err(RpcError::new(
                crate::remote::status::StatusCode::FailedPrecondition,
                format!("CA file {} does not exist", ca_path.display()),
            ));
        }
        settings.tls = Some(TlsSettings {
            ca_path: ca_path.clone(),
            server_name: self
                .server_name
                .clone()
                .unwrap_or_else(|| settings.endpoint.host.clone()),
        });
        Ok(())
    }
}

/// Identifies the agent build to the collector
pub struct AgentIdDecorator {
    version: String,
}

impl AgentIdDecorator {
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Default for AgentIdDecorator {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelDecorator for AgentIdDecorator {
    fn decorate(&self, settings: &mut ChannelSettings) {
        settings
            .metadata
            .push(KeyValue::new(AGENT_VERSION_HEADER, self.version.clone()));
    }
}

/// Attaches the configured token; no-op without one
pub struct AuthenticationDecorator {
    token: Option<String>,
}

impl AuthenticationDecorator {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }
}

impl ChannelDecorator for AuthenticationDecorator {
    fn decorate(&self, settings: &mut ChannelSettings) {
        if let Some(token) = &self.token {
            settings
                .metadata
                .push(KeyValue::new(AUTHENTICATION_HEADER, token.clone()));
        }
    }
}

/// Ordered builders then decorators
pub struct ChannelPipeline {
    builders: Vec<Box<dyn ChannelBuilder>>,
    decorators: Vec<Box<dyn ChannelDecorator>>,
}

impl ChannelPipeline {
    pub fn empty() -> Self {
        Self {
            builders: Vec::new(),
            decorators: Vec::new(),
        }
    }

    /// Standard transport, optional TLS, agent id and authentication headers
    pub fn standard(config: &AgentConfig) -> Self {
        Self::empty()
            .with_builder(StandardChannelBuilder)
            .with_builder(TlsChannelBuilder::new(config.collector.tls.as_ref()))
            .with_decorator(AgentIdDecorator::new())
            .with_decorator(AuthenticationDecorator::new(
                config.agent.authentication.clone(),
            ))
    }

    pub fn with_builder(mut self, builder: impl ChannelBuilder + 'static) -> Self {
        self.builders.push(Box::new(builder));
        self
    }

    pub fn with_decorator(mut self, decorator: impl ChannelDecorator + 'static) -> Self {
        self.decorators.push(Box::new(decorator));
        self
    }

    /// Run the pipeline for `endpoint`
    pub fn settings_for(&self, endpoint: &Endpoint) -> Result<ChannelSettings, RpcError> {
        let mut settings = ChannelSettings::new(endpoint.clone());
        for builder in &self.builders {
            builder.configure(&mut settings)?;
        }
        for decorator in &self.decorators {
            decorator.decorate(&mut settings);
        }
        Ok(settings)
    }
}

/// A live channel to one collector
#[async_trait]
pub trait CollectorChannel: Send + Sync {
    fn endpoint(&self) -> &Endpoint;

    /// Liveness probe; must not block
    fn is_connected(&self) -> bool;

    async fn collect(&self, batch: MetricCollection) -> Result<Commands, RpcError>;

    async fn report_instance_properties(
        &self,
        properties: InstanceProperties,
    ) -> Result<(), RpcError>;

    async fn keep_alive(&self, ping: InstancePing) -> Result<Commands, RpcError>;

    /// Tear the channel down; later calls fail with `Unavailable`
    fn shutdown(&self);
}

/// Channel factory
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, settings: ChannelSettings)
        -> Result<Arc<dyn CollectorChannel>, RpcError>;
}
