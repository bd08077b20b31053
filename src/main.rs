use anyhow::Result;
use clap::Parser;
use remote_scan::watch::run_watcher;
use remote_scan::{alerts, Config};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "remote-scan")]
#[command(about = "Watch media folders and ask Plex/Emby/Jellyfin to rescan the matching library")]
struct Args {
    /// Config file (defaults to $REMOTE_SCAN_CONFIG, then ./config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log what would be scanned without contacting any media server
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let alert_handle = alerts::init_logging()?;
    let args = Args::parse();

    log::info!("Remote Scan {} Starting", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load(args.config.as_deref())?;
    if args.dry_run {
        config.remote_scan.dry_run = true;
    }
    let _alerts = alert_handle.start(&config)?;

    run_watcher(config, shutdown_signal()).await?;

    log::info!("Run has completed");
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("Shutdown requested");
}
