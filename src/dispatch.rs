//! Turns a released pending record into library scans on every media server
//! bound to its scan.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use crate::api::{ApiType, ServerRegistry};
use crate::config::{Config, LibraryConfig, ScanConfig};
use crate::monitor::{display_folder, Dispatch, PendingRecord};

/// What happened to one released record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub target: String,
    /// `Type(server)` for every binding that was notified
    pub synced: Vec<String>,
    pub dry_run: bool,
}

impl DispatchOutcome {
    pub fn notified_any(&self) -> bool {
        !self.synced.is_empty()
    }
}

/// Rewrite a local path under `base_path` into the server's `media_path`.
/// Paths outside `base_path`, or bindings without a remap, are left alone.
pub fn remap_path(path: &Path, base_path: Option<&Path>, media_path: Option<&Path>) -> PathBuf {
    match (base_path, media_path) {
        (Some(base), Some(media)) => match path.strip_prefix(base) {
            Ok(rest) if rest.as_os_str().is_empty() => media.to_path_buf(),
            Ok(rest) => media.join(rest),
            Err(_) => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}

pub struct Dispatcher {
    config: Arc<Config>,
    servers: Arc<ServerRegistry>,
    dry_run: bool,
}

impl Dispatcher {
    pub fn new(config: Arc<Config>, servers: Arc<ServerRegistry>) -> Self {
        let dry_run = config.remote_scan.dry_run;
        Self {
            config,
            servers,
            dry_run,
        }
    }

    /// Notify every library bound to the record's scan. Returns `None` when
    /// the scan is not configured.
    pub async fn notify_media_servers(&self, record: &PendingRecord) -> Option<DispatchOutcome> {
        let Some(scan) = self.config.find_scan(&record.target) else {
            log::error!(
                "Attempting to notify media servers but {} not found!",
                record.target
            );
            return None;
        };

        if record.destroy_seen {
            log::trace!("monitor={} includes deletions", record.target);
        }

        let mut synced = Vec::new();
        for (api_type, library) in scan.bindings() {
            if self.notify_server(api_type, library, scan, record).await {
                synced.push(format!("{}({})", api_type, library.server_name));
            }
        }

        let outcome = DispatchOutcome {
            target: record.target.clone(),
            synced,
            dry_run: self.dry_run,
        };
        log_outcome(&outcome, record);
        Some(outcome)
    }

    async fn notify_server(
        &self,
        api_type: ApiType,
        library: &LibraryConfig,
        scan: &ScanConfig,
        record: &PendingRecord,
    ) -> bool {
        if self.dry_run {
            return true;
        }

        let Some(server) = self.servers.get(api_type, &library.server_name) else {
            log::warn!(
                "Notify Server called but no valid API found for {}({})",
                api_type,
                library.server_name
            );
            return false;
        };

        if !server.is_reachable().await {
            log::warn!(
                "{}({}) server not available ... Skipped notify for library={}",
                api_type,
                library.server_name,
                library.library
            );
            return false;
        }

        let library_id = match server.library_id(&library.library).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                log::warn!(
                    "{}({}) library={} not found ... Skipped notify",
                    api_type,
                    library.server_name,
                    library.library
                );
                return false;
            }
            Err(e) => {
                log::warn!(
                    "{}({}) library={} lookup failed ... Skipped notify error={}",
                    api_type,
                    library.server_name,
                    library.library,
                    e
                );
                return false;
            }
        };

        let paths: Vec<PathBuf> = record
            .folders()
            .into_iter()
            .map(|folder| {
                remap_path(
                    folder,
                    scan.base_path.as_deref(),
                    library.media_path.as_deref(),
                )
            })
            .collect();

        match server.trigger_scan(&library_id, &paths).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!(
                    "{}({}) Library Scan library={} error={}",
                    api_type,
                    library.server_name,
                    library.library,
                    e
                );
                false
            }
        }
    }
}

/// Summary lines for a released record: one per affected folder, or a
/// single warning when nothing was notified.
pub fn summary_lines(outcome: &DispatchOutcome, record: &PendingRecord) -> Vec<String> {
    if !outcome.notified_any() {
        return vec![format!("No Servers Notified for monitor {}", outcome.target)];
    }

    let prefix = if outcome.dry_run { "[DRY RUN] " } else { "" };
    let targets = outcome.synced.join(",");
    record
        .folders()
        .into_iter()
        .map(|folder| {
            format!(
                "{}>>> Moved monitor={} to target {} folder={}",
                prefix,
                outcome.target,
                targets,
                display_folder(folder)
            )
        })
        .collect()
}

fn log_outcome(outcome: &DispatchOutcome, record: &PendingRecord) {
    let level = if outcome.notified_any() {
        log::Level::Info
    } else {
        log::Level::Warn
    };
    for line in summary_lines(outcome, record) {
        log::log!(level, "{}", line);
    }
}

impl Dispatch for Dispatcher {
    fn dispatch(&self, record: PendingRecord) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.notify_media_servers(&record).await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_server::*;
    use crate::clock::ManualClock;
    use crate::monitor::{ChangeEvent, Effect, Monitor, Selection};
    use std::sync::Mutex;
    use std::time::Duration;

    fn config_text(plex_url: &str, emby_url: &str, dry_run: bool, plex_library: &str) -> String {
        format!(
            r#"
[[plex]]
server_name = "Main"
url = "{plex_url}"
api_key = "{PLEX_TOKEN}"

[[emby]]
server_name = "Den"
url = "{emby_url}"
api_key = "{EMBY_TOKEN}"

[remote_scan]
dry_run = {dry_run}

[[remote_scan.scans]]
name = "Movies"
paths = ["/media/movies"]
base_path = "/media"
  [[remote_scan.scans.plex]]
  server_name = "Main"
  library = "{plex_library}"
  media_path = "/data"
  [[remote_scan.scans.emby]]
  server_name = "Den"
  library = "Films"
"#
        )
    }

    async fn dispatcher(text: &str) -> Dispatcher {
        let config = Arc::new(Config::from_toml_str(text).unwrap());
        let servers = Arc::new(ServerRegistry::from_config(&config).unwrap());
        Dispatcher::new(config, servers)
    }

    /// Build a record the same way the scheduler would release it.
    fn record(target: &str, folders: &[(&str, &str)]) -> PendingRecord {
        let clock = ManualClock::new();
        let monitor = Monitor::new(Arc::new(clock.clone()));
        for (path, file_name) in folders {
            monitor.add_event(ChangeEvent {
                target: target.to_string(),
                path: PathBuf::from(path),
                file_name: file_name.to_string(),
                is_directory: false,
                effect: Effect::Create,
            });
        }
        clock.advance(Duration::from_secs(1));
        match monitor.take_ready(Duration::ZERO, Duration::ZERO) {
            Selection::Ready(record) => record,
            other => panic!("expected Ready, got {:?}", other),
        }
    }

    #[test]
    fn test_remap_path() {
        let base = Some(Path::new("/media"));
        let media = Some(Path::new("/data"));
        assert_eq!(
            remap_path(Path::new("/media/movies/Heat"), base, media),
            PathBuf::from("/data/movies/Heat")
        );
        assert_eq!(remap_path(Path::new("/media"), base, media), PathBuf::from("/data"));
        assert_eq!(
            remap_path(Path::new("/elsewhere/Heat"), base, media),
            PathBuf::from("/elsewhere/Heat")
        );
        assert_eq!(
            remap_path(Path::new("/media/movies"), base, None),
            PathBuf::from("/media/movies")
        );
    }

    #[test]
    fn test_summary_has_one_line_per_folder() {
        let released = record(
            "TV",
            &[
                ("/a/Show/Season 01", "e1.mkv"),
                ("/b/Show/Season 01", "e1.mkv"),
                ("/a/Show/Season 01", "e2.mkv"),
            ],
        );
        let outcome = DispatchOutcome {
            target: "TV".to_string(),
            synced: vec!["Plex(Main)".to_string()],
            dry_run: false,
        };
        assert_eq!(
            summary_lines(&outcome, &released),
            vec![
                ">>> Moved monitor=TV to target Plex(Main) folder=Show/Season 01".to_string(),
                ">>> Moved monitor=TV to target Plex(Main) folder=Show/Season 01".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_notifies_every_binding_with_remapped_folders() {
        let plex_calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let emby_calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let plex_url = serve(fake_plex(plex_calls.clone())).await;
        let emby_url = serve(fake_emby(emby_calls.clone())).await;
        let dispatcher = dispatcher(&config_text(&plex_url, &emby_url, false, "TV Shows")).await;

        let record = record(
            "Movies",
            &[
                ("/media/movies/Heat", "heat.mkv"),
                ("/media/movies/Heat", "heat.srt"),
                ("/media/movies/Alien", "alien.mkv"),
            ],
        );
        let outcome = dispatcher.notify_media_servers(&record).await.unwrap();

        assert_eq!(outcome.synced, vec!["Plex(Main)".to_string(), "Emby(Den)".to_string()]);
        assert!(!outcome.dry_run);
        assert_eq!(
            plex_calls.lock().unwrap().clone(),
            vec!["2:/data/movies/Heat".to_string(), "2:/data/movies/Alien".to_string()]
        );
        assert_eq!(emby_calls.lock().unwrap().clone(), vec!["f1:true".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_library_skips_binding() {
        let plex_calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let emby_calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let plex_url = serve(fake_plex(plex_calls.clone())).await;
        let emby_url = serve(fake_emby(emby_calls.clone())).await;
        let dispatcher = dispatcher(&config_text(&plex_url, &emby_url, false, "Music")).await;

        let outcome = dispatcher
            .notify_media_servers(&record("Movies", &[("/media/movies/Heat", "heat.mkv")]))
            .await
            .unwrap();

        // sibling binding still notified
        assert_eq!(outcome.synced, vec!["Emby(Den)".to_string()]);
        assert!(plex_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_server_notified_when_everything_fails() {
        let plex_calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let plex_url = serve(fake_plex(plex_calls.clone())).await;
        // emby bound to a dead port
        let dispatcher = dispatcher(&config_text(&plex_url, "http://127.0.0.1:9", false, "Music")).await;

        let outcome = dispatcher
            .notify_media_servers(&record("Movies", &[("/media/movies/Heat", "heat.mkv")]))
            .await
            .unwrap();

        assert!(!outcome.notified_any());
        assert!(plex_calls.lock().unwrap().is_empty());
        assert_eq!(
            summary_lines(&outcome, &record("Movies", &[("/media/movies/Heat", "heat.mkv")])),
            vec!["No Servers Notified for monitor Movies".to_string()]
        );
    }

    #[tokio::test]
    async fn test_dry_run_never_calls_servers() {
        let plex_calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let emby_calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let plex_url = serve(fake_plex(plex_calls.clone())).await;
        let emby_url = serve(fake_emby(emby_calls.clone())).await;
        let dispatcher = dispatcher(&config_text(&plex_url, &emby_url, true, "TV Shows")).await;

        let released = record("Movies", &[("/media/movies/Heat", "heat.mkv")]);
        let outcome = dispatcher.notify_media_servers(&released).await.unwrap();

        assert!(outcome.dry_run);
        assert_eq!(outcome.synced.len(), 2);
        assert_eq!(
            summary_lines(&outcome, &released),
            vec!["[DRY RUN] >>> Moved monitor=Movies to target Plex(Main),Emby(Den) folder=Heat".to_string()]
        );
        assert!(plex_calls.lock().unwrap().is_empty());
        assert!(emby_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_target_is_abandoned() {
        let dispatcher = dispatcher(&config_text("http://127.0.0.1:9", "http://127.0.0.1:9", true, "TV")).await;
        let outcome = dispatcher
            .notify_media_servers(&record("Cartoons", &[("/media/cartoons", "a.mkv")]))
            .await;
        assert!(outcome.is_none());

        // through the scheduler seam it must not panic either
        dispatcher
            .dispatch(record("Cartoons", &[("/media/cartoons", "a.mkv")]))
            .await;
    }
}
