//! Messages exchanged with the collector
//!
//! Payloads are plain serde types; the TCP transport frames them with a
//! length prefix and encodes them with bincode.

use serde::{Deserialize, Serialize};

use crate::remote::status::RpcError;

/// Correlation ID for matching requests with responses
pub type CorrelationId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A single instruction pushed back by the collector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub command: String,
    pub args: Vec<KeyValue>,
}

/// Command response carried by `Collect` and `KeepAlive`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commands {
    pub commands: Vec<Command>,
}

impl Commands {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// One metric sample produced by instrumentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Unix time in milliseconds
    pub time: u64,
    pub name: String,
    pub value: f64,
    pub labels: Vec<KeyValue>,
}

impl Metric {
    /// Sample stamped with the current wall-clock time
    pub fn now(name: impl Into<String>, value: f64) -> Self {
        Self {
            time: crate::utils::current_timestamp_millis(),
            name: name.into(),
            value,
            labels: Vec::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push(KeyValue::new(key, value));
        self
    }
}

/// Who is sending: service plus service instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceIdentity {
    pub service: String,
    pub service_instance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricCollection {
    pub service: String,
    pub service_instance: String,
    pub metrics: Vec<Metric>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceProperties {
    pub service: String,
    pub service_instance: String,
    pub properties: Vec<KeyValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstancePing {
    pub service: String,
    pub service_instance: String,
}

impl From<&SourceIdentity> for InstancePing {
    fn from(identity: &SourceIdentity) -> Self {
        Self {
            service: identity.service.clone(),
            service_instance: identity.service_instance.clone(),
        }
    }
}

/// Request envelope on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: CorrelationId,
    /// Per-call headers added by channel decorators
    pub metadata: Vec<KeyValue>,
    pub body: RequestBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestBody {
    Collect(MetricCollection),
    ReportInstanceProperties(InstanceProperties),
    KeepAlive(InstancePing),
}

/// Response envelope on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: CorrelationId,
    pub result: Result<ResponseBody, RpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponseBody {
    Commands(Commands),
    Empty,
}
