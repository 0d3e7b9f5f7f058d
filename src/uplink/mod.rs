//! Uplink of buffered telemetry and heartbeats to the collector

pub mod buffer;
pub mod heartbeat;
pub mod host;
pub mod sender;

pub use buffer::BoundedChannel;
pub use heartbeat::{HeartbeatKind, HeartbeatReporter};
pub use host::{HostFacts, SystemHostFacts};
pub use sender::{Batch, MetricReportService, MetricsSender, UplinkSender, UplinkService};
