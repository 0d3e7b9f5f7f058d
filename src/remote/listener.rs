//! Connectivity listeners
//!
//! Listeners are notified in registration order from a snapshot of the
//! registry, so registration may race with notification. A listener that
//! returns an error or panics is logged and skipped.

use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

use crate::remote::status::ChannelStatus;

/// Observer of [`ChannelStatus`] transitions
pub trait ChannelListener: Send + Sync {
    fn status_changed(&self, status: ChannelStatus) -> anyhow::Result<()>;

    /// Name used when logging listener failures
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> ChannelListener for F
where
    F: Fn(ChannelStatus) -> anyhow::Result<()> + Send + Sync,
{
    fn status_changed(&self, status: ChannelStatus) -> anyhow::Result<()> {
        self(status)
    }
}

/// Insertion-ordered listener list
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<Arc<dyn ChannelListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn ChannelListener>) {
        self.listeners.write().push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Deliver `status` to every registered listener
    pub fn notify(&self, status: ChannelStatus) {
        let snapshot: Vec<Arc<dyn ChannelListener>> = self.listeners.read().clone();
        debug!("Notifying {} listeners of {}", snapshot.len(), status);

        for listener in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener.status_changed(status))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Listener {} failed to handle {}: {}", listener.name(), status, e);
                }
                Err(_) => {
                    error!("Listener {} panicked while handling {}", listener.name(), status);
                }
            }
        }
    }
}

/// Listener that remembers the last delivered status
#[derive(Debug)]
pub struct StatusCell {
    status: AtomicU8,
}

impl StatusCell {
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(ChannelStatus::Disconnected as u8),
        }
    }

    pub fn get(&self) -> ChannelStatus {
        ChannelStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.get() == ChannelStatus::Connected
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelListener for StatusCell {
    fn status_changed(&self, status: ChannelStatus) -> anyhow::Result<()> {
        self.status.store(status as u8, Ordering::Release);
        Ok(())
    }

    fn name(&self) -> &str {
        "status-cell"
    }
}
