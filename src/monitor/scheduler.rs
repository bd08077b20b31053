//! Throttled dispatch loop.
//!
//! One task drains the [`Monitor`]: it idles until a record exists, then
//! polls until both the global minimum interval and the oldest record's quiet
//! period have passed, removes that record and hands it to the dispatcher.
//! The monitor lock is never held across a dispatch.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::aggregator::{Monitor, PendingRecord, Selection};
use crate::clock::Clock;

/// Upper bound on a single wait between evaluations.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Receives records the scheduler has released.
pub trait Dispatch: Send + Sync + 'static {
    fn dispatch(&self, record: PendingRecord) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

pub struct Scheduler<D: Dispatch> {
    monitor: Arc<Monitor>,
    dispatcher: D,
    clock: Arc<dyn Clock>,
    quiet_period: Duration,
    global_interval: Duration,
    poll_interval: Duration,
}

impl<D: Dispatch> Scheduler<D> {
    pub fn new(
        monitor: Arc<Monitor>,
        dispatcher: D,
        clock: Arc<dyn Clock>,
        quiet_period: Duration,
        global_interval: Duration,
    ) -> Self {
        Self {
            monitor,
            dispatcher,
            clock,
            quiet_period,
            global_interval,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Run the loop on the tokio runtime until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    pub async fn run(&self, cancel: CancellationToken) {
        log::info!("Monitor scheduler started");

        loop {
            if !self.wait_for_work(&cancel).await {
                break;
            }

            match self.monitor.take_ready(self.quiet_period, self.global_interval) {
                Selection::Ready(record) => {
                    log::trace!("Throttle passed. Notifying for: {}", record.target);
                    let target = record.target.clone();
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            log::warn!("Shutdown during notify for monitor={}, abandoning it", target);
                            break;
                        }
                        _ = self.dispatcher.dispatch(record) => {}
                    }
                }
                selection => {
                    if let Selection::Waiting { target, remaining } = &selection {
                        log::trace!("monitor={} quiet for another {:?}", target, remaining);
                    }
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = self.clock.sleep(self.poll_interval) => {}
                    }
                }
            }
        }

        log::info!("Monitor scheduler has exited");
    }

    /// Block until the monitor holds a record. Returns false on shutdown.
    async fn wait_for_work(&self, cancel: &CancellationToken) -> bool {
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            let notified = self.monitor.work_available();
            if !self.monitor.is_empty() {
                return true;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                _ = notified => {}
            }
        }
    }
}
