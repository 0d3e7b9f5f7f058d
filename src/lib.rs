//! Uplink Agent - telemetry uplink core of a monitoring agent
//!
//! Ships metrics, heartbeats and instance properties from an instrumented
//! process to a remote collector.
//!
//! ## Components
//!
//! - [`remote::ChannelManager`]: failover channel to one of several collector
//!   endpoints, with connectivity notifications
//! - [`uplink::UplinkSender`] and [`uplink::HeartbeatReporter`]: periodic
//!   senders over drop-oldest [`uplink::BoundedChannel`] buffers
//! - [`module::ModuleManager`]: dependency-ordered bootstrap of the agent's
//!   modules from a static [`module::ModuleRegistry`]
//!
//! ## Usage
//!
//! ```rust,no_run
//! use uplink_agent::config::AgentConfig;
//! use uplink_agent::module::{builtin_registry, Collaborators, ModuleManager};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = AgentConfig::default();
//! let registry = builtin_registry(&config, Collaborators::standard(&config));
//! let mut modules = ModuleManager::new();
//! modules.init(&registry, &config.modules).await?;
//! // ...
//! modules.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod module;
pub mod remote;
pub mod uplink;
pub mod utils;

pub use config::AgentConfig;
pub use module::{ModuleError, ModuleManager};
pub use remote::{ChannelManager, ChannelStatus, RpcError};
pub use uplink::{BoundedChannel, HeartbeatReporter, MetricsSender};
