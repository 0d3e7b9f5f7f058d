//! Agent configuration
//!
//! Handles configuration loading (TOML or JSON), defaults and validation.
//! Values are read once at startup; components receive the sections they need.

pub mod placeholder;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

pub use placeholder::{resolve_env_placeholders, resolve_placeholders};

/// Top-level agent configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Identity and reconnection behaviour of this agent
    #[serde(default)]
    pub agent: AgentSection,

    /// Collector endpoints and uplink cadence
    #[serde(default)]
    pub collector: CollectorSection,

    /// Metric buffer sizing
    #[serde(default)]
    pub metrics: MetricsSection,

    /// Host fact collection
    #[serde(default)]
    pub os_info: OsInfoSection,

    /// Enabled modules and provider selectors
    #[serde(default)]
    pub modules: ModulesConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

/// Agent identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// Logical service name reported with every batch
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Instance name; generated as `<uuid>@<ipv4>` when absent or empty
    #[serde(default)]
    pub instance_name: Option<String>,

    /// Static properties reported with the instance properties snapshot
    #[serde(default)]
    pub instance_properties: BTreeMap<String, String>,

    /// Token sent in the `authentication` header
    #[serde(default)]
    pub authentication: Option<String>,

    /// Consecutive same-endpoint selections before the channel is rebuilt
    #[serde(default = "default_force_reconnection_period")]
    pub force_reconnection_period: u32,
}

fn default_service_name() -> String {
    "Your_ApplicationName".to_string()
}

fn default_force_reconnection_period() -> u32 {
    1
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            instance_name: None,
            instance_properties: BTreeMap::new(),
            authentication: None,
            force_reconnection_period: default_force_reconnection_period(),
        }
    }
}

/// Collector connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorSection {
    /// Comma-separated `host:port` list
    #[serde(default = "default_backend_service")]
    pub backend_service: String,

    /// Channel check interval (seconds)
    #[serde(default = "default_thirty")]
    pub channel_check_interval_secs: u64,

    /// Re-resolve the first configured host while reconnecting
    #[serde(default)]
    pub resolve_dns_periodically: bool,

    /// Deadline for every remote call (seconds)
    #[serde(default = "default_thirty")]
    pub upstream_timeout_secs: u64,

    /// Heartbeat period (seconds)
    #[serde(default = "default_thirty")]
    pub heartbeat_period_secs: u64,

    /// Every Nth heartbeat carries the full instance properties
    #[serde(default = "default_properties_report_period_factor")]
    pub properties_report_period_factor: u64,

    /// TLS settings; plaintext when absent
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

fn default_backend_service() -> String {
    "127.0.0.1:11800".to_string()
}

fn default_thirty() -> u64 {
    30
}

fn default_properties_report_period_factor() -> u64 {
    10
}

impl Default for CollectorSection {
    fn default() -> Self {
        Self {
            backend_service: default_backend_service(),
            channel_check_interval_secs: default_thirty(),
            resolve_dns_periodically: false,
            upstream_timeout_secs: default_thirty(),
            heartbeat_period_secs: default_thirty(),
            properties_report_period_factor: default_properties_report_period_factor(),
            tls: None,
        }
    }
}

impl CollectorSection {
    pub fn channel_check_interval(&self) -> Duration {
        Duration::from_secs(self.channel_check_interval_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_secs(self.heartbeat_period_secs)
    }
}

/// TLS configuration for the collector channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM file with the CA certificates to trust
    pub ca_path: String,

    /// Name to verify; defaults to the endpoint host
    #[serde(default)]
    pub server_name: Option<String>,
}

/// Metric sender settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSection {
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    #[serde(default = "default_flush_period_secs")]
    pub flush_period_secs: u64,
}

fn default_buffer_size() -> usize {
    600
}

fn default_flush_period_secs() -> u64 {
    1
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            flush_period_secs: default_flush_period_secs(),
        }
    }
}

impl MetricsSection {
    pub fn flush_period(&self) -> Duration {
        Duration::from_secs(self.flush_period_secs)
    }
}

/// Host fact collection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsInfoSection {
    /// Maximum number of IPv4 addresses reported
    #[serde(default = "default_ipv4_list_size")]
    pub ipv4_list_size: usize,
}

fn default_ipv4_list_size() -> usize {
    10
}

impl Default for OsInfoSection {
    fn default() -> Self {
        Self {
            ipv4_list_size: default_ipv4_list_size(),
        }
    }
}

/// Module selection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulesConfig {
    /// Modules to bootstrap, in declaration order
    #[serde(default = "default_enabled_modules")]
    pub enabled: Vec<String>,

    /// Per-module provider selector; may contain `${VAR:default}` placeholders
    #[serde(default)]
    pub selectors: BTreeMap<String, String>,

    /// Selector value that disables a module
    #[serde(default = "default_disable_token")]
    pub disable_token: String,

    /// Module-specific settings
    #[serde(default)]
    pub settings: HashMap<String, HashMap<String, String>>,
}

fn default_enabled_modules() -> Vec<String> {
    vec![
        "collector".to_string(),
        "metrics".to_string(),
        "heartbeat".to_string(),
    ]
}

fn default_disable_token() -> String {
    "-".to_string()
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_modules(),
            selectors: BTreeMap::new(),
            disable_token: default_disable_token(),
            settings: HashMap::new(),
        }
    }
}

impl ModulesConfig {
    /// Selector for `module` with environment placeholders resolved
    pub fn selector(&self, module: &str) -> Option<String> {
        self.selectors
            .get(module)
            .map(|raw| resolve_env_placeholders(raw).trim().to_string())
    }

    /// Setting for `module`, with environment placeholders resolved
    pub fn setting(&self, module: &str, key: &str) -> Option<String> {
        self.settings
            .get(module)
            .and_then(|s| s.get(key))
            .map(|raw| resolve_env_placeholders(raw))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. "info" or "uplink_agent::remote=debug"
    #[serde(default)]
    pub filter: Option<String>,

    /// Emit JSON lines (requires the json-logging feature)
    #[serde(default)]
    pub json_format: bool,
}

impl AgentConfig {
    /// Load configuration from JSON file
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: AgentConfig = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: AgentConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Load by extension (`.json` is JSON, everything else TOML) and validate
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::from_json_file(path)?,
            _ => Self::from_toml_file(path)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to JSON file
    pub fn to_json_file(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    ///
    /// An empty backend service is accepted: the uplink stays idle.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.agent.service_name.trim().is_empty() {
            return Err(anyhow::anyhow!("agent.service_name must not be empty"));
        }
        if self.agent.force_reconnection_period == 0 {
            return Err(anyhow::anyhow!(
                "agent.force_reconnection_period must be greater than 0"
            ));
        }

        let collector = &self.collector;
        if collector.channel_check_interval_secs == 0 {
            return Err(anyhow::anyhow!(
                "collector.channel_check_interval_secs must be greater than 0"
            ));
        }
        if collector.upstream_timeout_secs == 0 {
            return Err(anyhow::anyhow!(
                "collector.upstream_timeout_secs must be greater than 0"
            ));
        }
        if collector.heartbeat_period_secs == 0 {
            return Err(anyhow::anyhow!(
                "collector.heartbeat_period_secs must be greater than 0"
            ));
        }
        if let Some(tls) = &collector.tls {
            if !Path::new(&tls.ca_path).is_file() {
                return Err(anyhow::anyhow!(
                    "collector.tls.ca_path {} is not a readable file",
                    tls.ca_path
                ));
            }
        }
        if collector.properties_report_period_factor == 0 {
            return Err(anyhow::anyhow!(
                "collector.properties_report_period_factor must be greater than 0"
            ));
        }

        if self.metrics.buffer_size == 0 {
            return Err(anyhow::anyhow!("metrics.buffer_size must be greater than 0"));
        }
        if self.metrics.flush_period_secs == 0 {
            return Err(anyhow::anyhow!(
                "metrics.flush_period_secs must be greater than 0"
            ));
        }

        if self.modules.disable_token.is_empty() {
            return Err(anyhow::anyhow!("modules.disable_token must not be empty"));
        }

        Ok(())
    }
}
