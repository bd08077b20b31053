//! Logging setup: the terminal, an optional rotating file under `LOG_PATH`,
//! and optional forwarding of warnings and errors to Apprise and Gotify.
//!
//! The logger is installed before the config is read, so forwarding starts
//! later through [`AlertHandle::start`]. Until then warnings only reach the
//! terminal.

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use file_rotate::compression::Compression;
use file_rotate::suffix::AppendCount;
use file_rotate::{ContentLimit, FileRotate};
use log::{Level, Log, Metadata, Record};
use reqwest::Client;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::api::{build_client, ensure_success};
use crate::config::{AppriseLoggingConfig, Config, GotifyLoggingConfig};
use crate::error::Result;

type AlertSink = Arc<OnceLock<mpsc::UnboundedSender<String>>>;

pub const LOG_FILE_NAME: &str = "remote-scan.log";
const LOG_FILE_MAX_BYTES: usize = 5 * 1024 * 1024;
const LOG_FILE_MAX_FILES: usize = 5;

/// Plain-text log file rotated by size, `remote-scan.log.1` being the newest
/// rotated file.
pub struct FileSink {
    file: Mutex<FileRotate<AppendCount>>,
}

impl FileSink {
    /// Open `$LOG_PATH/remote-scan.log` when `LOG_PATH` is set.
    pub fn from_env() -> Option<Self> {
        let dir = std::env::var_os("LOG_PATH")?;
        Some(Self::open(Path::new(&dir), LOG_FILE_MAX_BYTES, LOG_FILE_MAX_FILES))
    }

    pub fn open(dir: &Path, max_bytes: usize, max_files: usize) -> Self {
        let file = FileRotate::new(
            dir.join(LOG_FILE_NAME),
            AppendCount::new(max_files),
            ContentLimit::Bytes(max_bytes),
            Compression::None,
            #[cfg(unix)]
            None,
        );
        Self {
            file: Mutex::new(file),
        }
    }

    pub fn write_record(&self, record: &Record) {
        let line = format!(
            "[{}] [{}] {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.args()
        );
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        // The logger cannot log its own failures
        if let Err(e) = file.write_all(line.as_bytes()).and_then(|_| file.flush()) {
            eprintln!("log file write failed: {}", e);
        }
    }
}

/// env_logger plus the optional log file and a queue for warnings and errors
struct AlertLogger {
    inner: env_logger::Logger,
    file: Option<FileSink>,
    sink: AlertSink,
}

impl Log for AlertLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.inner.matches(record) {
            return;
        }
        self.inner.log(record);
        if let Some(file) = &self.file {
            file.write_record(record);
        }

        if record.level() <= Level::Warn {
            if let Some(tx) = self.sink.get() {
                let _ = tx.send(record.args().to_string());
            }
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Returned by [`init_logging`]; turns on forwarding once the config is known.
pub struct AlertHandle {
    sink: AlertSink,
}

/// Install the process logger (`RUST_LOG`, default `info`). Also writes to
/// `$LOG_PATH/remote-scan.log` when `LOG_PATH` is set.
pub fn init_logging() -> anyhow::Result<AlertHandle> {
    let inner =
        env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info"))
            .build();
    let max_level = inner.filter();
    let sink: AlertSink = Arc::new(OnceLock::new());

    log::set_boxed_logger(Box::new(AlertLogger {
        inner,
        file: FileSink::from_env(),
        sink: sink.clone(),
    }))?;
    log::set_max_level(max_level);

    Ok(AlertHandle { sink })
}

impl AlertHandle {
    /// Start the forwarding task if Apprise or Gotify is enabled.
    pub fn start(&self, config: &Config) -> Result<Option<JoinHandle<()>>> {
        let Some(client) = AlertClient::from_config(config)? else {
            return Ok(None);
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if self.sink.set(tx).is_err() {
            return Ok(None);
        }
        Ok(Some(tokio::spawn(client.forward(rx))))
    }
}

#[derive(Serialize)]
struct AppriseMessage<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Serialize)]
struct GotifyMessage<'a> {
    title: &'a str,
    message: &'a str,
    priority: i32,
}

/// Posts messages to the enabled notification services
pub struct AlertClient {
    client: Client,
    apprise: Option<AppriseLoggingConfig>,
    gotify: Option<GotifyLoggingConfig>,
}

impl AlertClient {
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        let apprise = Some(config.apprise_logging.clone()).filter(|c| c.enabled);
        let gotify = Some(config.gotify_logging.clone()).filter(|c| c.enabled);
        if apprise.is_none() && gotify.is_none() {
            return Ok(None);
        }

        Ok(Some(Self {
            client: build_client()?,
            apprise,
            gotify,
        }))
    }

    async fn forward(self, mut rx: mpsc::UnboundedReceiver<String>) {
        while let Some(message) = rx.recv().await {
            // Logging here would feed back into the queue
            if let Err(e) = self.send(&message).await {
                eprintln!("alert forwarding failed: {}", e);
            }
        }
    }

    /// Deliver one message to every enabled service.
    pub async fn send(&self, message: &str) -> Result<()> {
        if let Some(apprise) = &self.apprise {
            let endpoint = format!("{}/notify/{}", apprise.url.trim_end_matches('/'), apprise.key);
            let response = self
                .client
                .post(endpoint)
                .json(&AppriseMessage {
                    title: &apprise.message_title,
                    body: message,
                })
                .send()
                .await?;
            ensure_success(response, "apprise notify").await?;
        }

        if let Some(gotify) = &self.gotify {
            let endpoint = format!("{}/message", gotify.url.trim_end_matches('/'));
            let response = self
                .client
                .post(endpoint)
                .query(&[("token", gotify.key.as_str())])
                .json(&GotifyMessage {
                    title: &gotify.message_title,
                    message,
                    priority: gotify.priority,
                })
                .send()
                .await?;
            ensure_success(response, "gotify message").await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_server::serve;
    use axum::extract::{Path, Query};
    use axum::routing::post;
    use axum::{Json, Router};
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn config(apprise_url: &str, gotify_url: &str, apprise: bool, gotify: bool) -> Config {
        Config::from_toml_str(&format!(
            r#"
[[plex]]
server_name = "Main"
url = "http://127.0.0.1:32400"
api_key = "k"

[remote_scan]

[apprise_logging]
enabled = {apprise}
url = "{apprise_url}"
key = "remote-scan"

[gotify_logging]
enabled = {gotify}
url = "{gotify_url}"
key = "gtoken"
message_title = "Scanner"
priority = 7
"#
        ))
        .unwrap()
    }

    #[test]
    fn test_log_path_writes_plain_text_file() {
        let dir = tempfile::TempDir::new().unwrap();
        std::env::set_var("LOG_PATH", dir.path());
        let sink = FileSink::from_env();
        std::env::remove_var("LOG_PATH");
        let sink = sink.expect("LOG_PATH set");

        sink.write_record(
            &Record::builder()
                .args(format_args!("Plex(Main) server not available"))
                .level(Level::Warn)
                .target("remote_scan")
                .build(),
        );

        let text = std::fs::read_to_string(dir.path().join(LOG_FILE_NAME)).unwrap();
        assert!(text.contains("[WARN] Plex(Main) server not available"));
        assert!(!text.contains('\u{1b}'));
    }

    #[test]
    fn test_log_file_rotates_by_size() {
        let dir = tempfile::TempDir::new().unwrap();
        let sink = FileSink::open(dir.path(), 200, 2);
        for i in 0..50 {
            sink.write_record(
                &Record::builder()
                    .args(format_args!(">>> Moved monitor=Movies folder=Heat {}", i))
                    .level(Level::Info)
                    .build(),
            );
        }

        let files = std::fs::read_dir(dir.path()).unwrap().count();
        assert!(dir.path().join(LOG_FILE_NAME).exists());
        assert!(dir.path().join(format!("{}.1", LOG_FILE_NAME)).exists());
        assert!(files <= 3, "kept {} files", files);
    }

    #[test]
    fn test_disabled_services_create_no_client() {
        let config = config("http://a", "http://g", false, false);
        assert!(AlertClient::from_config(&config).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_send_posts_to_both_services() {
        let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let apprise_seen = received.clone();
        let apprise = Router::new().route(
            "/notify/:key",
            post(move |Path(key): Path<String>, Json(body): Json<serde_json::Value>| async move {
                apprise_seen
                    .lock()
                    .unwrap()
                    .push(format!("apprise:{}:{}:{}", key, body["title"], body["body"]));
                "ok"
            }),
        );

        let gotify_seen = received.clone();
        let gotify = Router::new().route(
            "/message",
            post(
                move |Query(q): Query<HashMap<String, String>>, Json(body): Json<serde_json::Value>| async move {
                    gotify_seen.lock().unwrap().push(format!(
                        "gotify:{}:{}:{}:{}",
                        q.get("token").cloned().unwrap_or_default(),
                        body["title"],
                        body["message"],
                        body["priority"]
                    ));
                    "ok"
                },
            ),
        );

        let apprise_url = serve(apprise).await;
        let gotify_url = serve(gotify).await;
        let client = AlertClient::from_config(&config(&apprise_url, &gotify_url, true, true))
            .unwrap()
            .unwrap();

        client.send("No Servers Notified for monitor Movies").await.unwrap();

        assert_eq!(
            received.lock().unwrap().clone(),
            vec![
                r#"apprise:remote-scan:"Remote Scan":"No Servers Notified for monitor Movies""#.to_string(),
                r#"gotify:gtoken:"Scanner":"No Servers Notified for monitor Movies":7"#.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_send_reports_service_errors() {
        let config = config("http://127.0.0.1:9", "http://127.0.0.1:9", true, false);
        let client = AlertClient::from_config(&config).unwrap().unwrap();
        assert!(client.send("boom").await.is_err());
    }
}
