//! Runtime utilities shared by the channel manager, uplink senders and the agent binary

pub mod logging;
pub mod periodic;
pub mod signal;
pub mod time;
pub mod timeout;

pub use logging::{init_logging, init_logging_from_config};
#[cfg(feature = "json-logging")]
pub use logging::init_json_logging;
pub use periodic::PeriodicTask;
pub use signal::wait_for_shutdown_signal;
pub use time::current_timestamp_millis;
pub use timeout::{with_deadline, DEFAULT_DNS_TIMEOUT, DEFAULT_UPSTREAM_TIMEOUT};
