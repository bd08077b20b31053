//! Top-level run loop: connect to media servers, start the scheduler, watch
//! every scan folder, and tear it all down when `shutdown` resolves.

mod watcher;

pub use watcher::{to_change_events, watch_scans, ScanWatchers};

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::ServerRegistry;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::monitor::{EventFilter, Monitor, Scheduler};

pub async fn run_watcher<F>(config: Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let config = Arc::new(config);
    let servers = Arc::new(ServerRegistry::from_config(&config)?);
    servers.log_connection_status().await;

    if config.remote_scan.dry_run {
        log::info!("Dry run enabled, media servers will not be contacted");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let monitor = Arc::new(Monitor::new(clock.clone()));
    let filter = Arc::new(EventFilter::from_config(&config.remote_scan));

    let cancel = CancellationToken::new();
    let scheduler = Scheduler::new(
        monitor.clone(),
        Dispatcher::new(config.clone(), servers),
        clock,
        config.quiet_period(),
        config.global_interval(),
    );
    let handle = scheduler.spawn(cancel.clone());

    let watchers = match watch_scans(&config, filter, monitor.clone()) {
        Ok(watchers) => watchers,
        Err(e) => {
            cancel.cancel();
            let _ = handle.await;
            return Err(e);
        }
    };
    log::info!("Watching {} folder(s) (Ctrl+C to stop)", watchers.len());

    shutdown.await;

    log::info!("Removing directory watches");
    drop(watchers);

    cancel.cancel();
    log::info!("Waiting for monitor thread to finish...");
    if let Err(e) = handle.await {
        log::error!("monitor task ended abnormally: {}", e);
    }

    if !monitor.is_empty() {
        log::info!("{} pending change(s) dropped at shutdown", monitor.len());
    }

    Ok(())
}
