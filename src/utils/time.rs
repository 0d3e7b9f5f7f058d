//! Wall-clock helpers for metric timestamps

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

fn since_epoch() -> Duration {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_else(|_| {
        warn!("System time is before UNIX epoch, using 0 as timestamp");
        Duration::from_secs(0)
    })
}

/// Current Unix timestamp in milliseconds, the unit carried by [`Metric::time`](crate::remote::proto::Metric)
pub fn current_timestamp_millis() -> u64 {
    since_epoch().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_since_epoch() {
        let first = current_timestamp_millis();
        let second = current_timestamp_millis();
        // 2020-01-01T00:00:00Z
        assert!(first > 1_577_836_800_000);
        assert!(second >= first);
    }
}
