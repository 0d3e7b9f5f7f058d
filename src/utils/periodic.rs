//! Fixed-rate background tasks
//!
//! Each periodic component (channel check, metric flush, heartbeat) owns one
//! task. A tick body is awaited before the next tick is taken, so invocations of
//! the same task never overlap. A panic inside a tick is logged and the schedule
//! continues.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

/// Shortest period a task is scheduled with
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Handle to a running periodic task
pub struct PeriodicTask {
    name: &'static str,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn `tick` every `period`, first run immediately
    ///
    /// A period below [`MIN_PERIOD`] is raised to it.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if period < MIN_PERIOD {
            warn!("{}: period {:?} too short, using {:?}", name, period, MIN_PERIOD);
        }
        let period = period.max(MIN_PERIOD);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                if let Err(panic) = AssertUnwindSafe(tick()).catch_unwind().await {
                    error!("{}: unexpected panic in periodic task: {:?}", name, panic);
                }

                if *shutdown_rx.borrow() {
                    break;
                }
            }
            debug!("{}: periodic task stopped", name);
        });

        Self {
            name,
            shutdown_tx,
            handle,
        }
    }

    /// Task name used in logs
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the task loop has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop scheduling and wait for an in-flight tick to complete
    ///
    /// The in-flight tick is not interrupted; its remote calls are bounded by
    /// their own deadlines.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            error!("{}: periodic task ended abnormally: {}", self.name, e);
        }
    }
}
