use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::ApiType;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub plex: Vec<ServerConfig>,
    #[serde(default)]
    pub emby: Vec<ServerConfig>,
    #[serde(default)]
    pub jellyfin: Vec<ServerConfig>,
    pub remote_scan: RemoteScanConfig,
    #[serde(default)]
    pub apprise_logging: AppriseLoggingConfig,
    #[serde(default)]
    pub gotify_logging: GotifyLoggingConfig,
}

/// One media server instance
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub server_name: String,
    pub url: String,
    /// Token written directly in the config file
    #[serde(default)]
    pub api_key: Option<String>,
    /// Name of an environment variable holding the token
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl ServerConfig {
    /// Resolve the API token, preferring the inline key over the env variable.
    pub fn resolve_api_key(&self) -> Result<String> {
        if let Some(key) = &self.api_key {
            return Ok(key.clone());
        }

        match &self.api_key_env {
            Some(var) => std::env::var(var).with_context(|| {
                format!(
                    "Environment variable {} not set for server {}. Set it in your .env file or as an environment variable.",
                    var, self.server_name
                )
            }),
            None => anyhow::bail!(
                "server {} needs either api_key or api_key_env",
                self.server_name
            ),
        }
    }
}

/// Event coalescing and dispatch settings
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteScanConfig {
    #[serde(default)]
    pub dry_run: bool,
    /// Quiet period a scan must see before its servers are notified
    #[serde(default = "default_seconds_before_notify")]
    pub seconds_before_notify: u64,
    /// Minimum spacing between any two notifications
    #[serde(default = "default_seconds_between_notifies")]
    pub seconds_between_notifies: u64,
    #[serde(default)]
    pub scans: Vec<ScanConfig>,
    #[serde(default)]
    pub ignore_folders: Vec<String>,
    /// Empty means every extension is accepted
    #[serde(default)]
    pub valid_file_extensions: Vec<String>,
    #[serde(default)]
    pub image_file_extensions: Vec<String>,
}

fn default_seconds_before_notify() -> u64 {
    90
}

fn default_seconds_between_notifies() -> u64 {
    15
}

/// A named group of watched folders and the libraries they feed
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    pub name: String,
    pub paths: Vec<PathBuf>,
    /// Local prefix replaced by a binding's `media_path`
    #[serde(default)]
    pub base_path: Option<PathBuf>,
    #[serde(default)]
    pub plex: Vec<LibraryConfig>,
    #[serde(default)]
    pub emby: Vec<LibraryConfig>,
    #[serde(default)]
    pub jellyfin: Vec<LibraryConfig>,
}

impl ScanConfig {
    /// Every library binding of this scan, tagged with its backend type.
    pub fn bindings(&self) -> impl Iterator<Item = (ApiType, &LibraryConfig)> + '_ {
        self.plex
            .iter()
            .map(|l| (ApiType::Plex, l))
            .chain(self.emby.iter().map(|l| (ApiType::Emby, l)))
            .chain(self.jellyfin.iter().map(|l| (ApiType::Jellyfin, l)))
    }
}

/// Library on a specific server
#[derive(Debug, Clone, Deserialize)]
pub struct LibraryConfig {
    pub server_name: String,
    pub library: String,
    /// How the server sees `base_path`
    #[serde(default)]
    pub media_path: Option<PathBuf>,
}

/// Apprise forwarding of warnings and errors
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppriseLoggingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub key: String,
    #[serde(default = "default_message_title")]
    pub message_title: String,
}

/// Gotify forwarding of warnings and errors
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GotifyLoggingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub key: String,
    #[serde(default = "default_message_title")]
    pub message_title: String,
    #[serde(default)]
    pub priority: i32,
}

fn default_message_title() -> String {
    "Remote Scan".to_string()
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. `path` argument (the `--config` flag)
    /// 2. Path specified in REMOTE_SCAN_CONFIG environment variable
    /// 3. ./config.toml in current directory
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // Optional file; API keys may come from it
        let _ = dotenv::dotenv();

        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => std::env::var("REMOTE_SCAN_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("config.toml")),
        };

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        Self::from_toml_str(&config_str)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.plex.is_empty() && self.emby.is_empty() && self.jellyfin.is_empty() {
            anyhow::bail!("no media servers configured; add at least one [[plex]], [[emby]] or [[jellyfin]] entry");
        }

        for api_type in ApiType::ALL {
            let mut names = HashSet::new();
            for server in self.servers(api_type) {
                if !names.insert(server.server_name.as_str()) {
                    anyhow::bail!("duplicate {} server name: {}", api_type, server.server_name);
                }
                url::Url::parse(&server.url).with_context(|| {
                    format!("{}({}) has an invalid url: {}", api_type, server.server_name, server.url)
                })?;
                server.resolve_api_key()?;
            }
        }

        let mut scan_names = HashSet::new();
        for scan in &self.remote_scan.scans {
            if !scan_names.insert(scan.name.as_str()) {
                anyhow::bail!("duplicate scan name: {}", scan.name);
            }
            if scan.paths.is_empty() {
                anyhow::bail!("scan {} has no paths to watch", scan.name);
            }
            if scan.bindings().next().is_none() {
                anyhow::bail!("scan {} has no plex, emby or jellyfin libraries", scan.name);
            }
            for (api_type, library) in scan.bindings() {
                if self.find_server(api_type, &library.server_name).is_none() {
                    anyhow::bail!(
                        "scan {} references unknown {} server {}",
                        scan.name,
                        api_type,
                        library.server_name
                    );
                }
            }
        }

        Ok(())
    }

    /// Configured servers of one backend type
    pub fn servers(&self, api_type: ApiType) -> &[ServerConfig] {
        match api_type {
            ApiType::Plex => &self.plex,
            ApiType::Emby => &self.emby,
            ApiType::Jellyfin => &self.jellyfin,
        }
    }

    pub fn find_server(&self, api_type: ApiType, name: &str) -> Option<&ServerConfig> {
        self.servers(api_type).iter().find(|s| s.server_name == name)
    }

    pub fn find_scan(&self, name: &str) -> Option<&ScanConfig> {
        self.remote_scan.scans.iter().find(|s| s.name == name)
    }

    /// Per-scan quiet period
    pub fn quiet_period(&self) -> Duration {
        Duration::from_secs(self.remote_scan.seconds_before_notify)
    }

    /// Global minimum spacing between notifications
    pub fn global_interval(&self) -> Duration {
        Duration::from_secs(self.remote_scan.seconds_between_notifies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serialize config tests that mutate process-wide env so they don't race.
    static CONFIG_TEST_LOCK: Mutex<()> = Mutex::new(());

    const BASIC_CONFIG: &str = r#"
[[plex]]
server_name = "Plex"
url = "http://127.0.0.1:32400"
api_key = "plex-token"

[[emby]]
server_name = "Emby"
url = "http://127.0.0.1:8096"
api_key_env = "REMOTE_SCAN_TEST_EMBY_KEY"

[remote_scan]
seconds_before_notify = 30
ignore_folders = ["@eaDir"]
valid_file_extensions = ["mkv", ".MP4"]

[[remote_scan.scans]]
name = "Movies"
paths = ["/media/movies"]
base_path = "/media"

  [[remote_scan.scans.plex]]
  server_name = "Plex"
  library = "Movies"
  media_path = "/data"

  [[remote_scan.scans.emby]]
  server_name = "Emby"
  library = "Films"
"#;

    fn with_env(var: &str, value: Option<&str>, f: impl FnOnce()) {
        let original = std::env::var(var).ok();
        match value {
            Some(v) => std::env::set_var(var, v),
            None => std::env::remove_var(var),
        }
        f();
        std::env::remove_var(var);
        if let Some(v) = original {
            std::env::set_var(var, v);
        }
    }

    #[test]
    fn test_config_parse_success() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        with_env("REMOTE_SCAN_TEST_EMBY_KEY", Some("emby-token"), || {
            let config = Config::from_toml_str(BASIC_CONFIG).unwrap();
            assert_eq!(config.plex.len(), 1);
            assert_eq!(config.quiet_period(), Duration::from_secs(30));
            // default when absent
            assert_eq!(config.global_interval(), Duration::from_secs(15));
            assert!(!config.remote_scan.dry_run);

            let scan = config.find_scan("Movies").unwrap();
            let bindings: Vec<_> = scan.bindings().map(|(t, l)| (t, l.library.clone())).collect();
            assert_eq!(
                bindings,
                vec![(ApiType::Plex, "Movies".to_string()), (ApiType::Emby, "Films".to_string())]
            );
            assert_eq!(
                config.find_server(ApiType::Emby, "Emby").unwrap().resolve_api_key().unwrap(),
                "emby-token"
            );
        });
    }

    #[test]
    fn test_config_missing_api_key_env() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        with_env("REMOTE_SCAN_TEST_EMBY_KEY", None, || {
            let err = Config::from_toml_str(BASIC_CONFIG).unwrap_err();
            assert!(format!("{:#}", err).contains("REMOTE_SCAN_TEST_EMBY_KEY"));
        });
    }

    #[test]
    fn test_config_rejects_unknown_server_binding() {
        let text = r#"
[[plex]]
server_name = "Plex"
url = "http://localhost:32400"
api_key = "k"

[remote_scan]
[[remote_scan.scans]]
name = "TV"
paths = ["/media/tv"]
  [[remote_scan.scans.plex]]
  server_name = "Other"
  library = "TV Shows"
"#;
        let err = Config::from_toml_str(text).unwrap_err();
        assert!(err.to_string().contains("unknown Plex server Other"));
    }

    #[test]
    fn test_config_rejects_no_servers() {
        let err = Config::from_toml_str("[remote_scan]\n").unwrap_err();
        assert!(err.to_string().contains("no media servers"));
    }

    #[test]
    fn test_config_rejects_duplicate_scan() {
        let text = r#"
[[plex]]
server_name = "Plex"
url = "http://localhost:32400"
api_key = "k"

[remote_scan]
[[remote_scan.scans]]
name = "TV"
paths = ["/a"]
  [[remote_scan.scans.plex]]
  server_name = "Plex"
  library = "TV"

[[remote_scan.scans]]
name = "TV"
paths = ["/b"]
  [[remote_scan.scans.plex]]
  server_name = "Plex"
  library = "TV"
"#;
        let err = Config::from_toml_str(text).unwrap_err();
        assert!(err.to_string().contains("duplicate scan name"));
    }

    #[test]
    fn test_config_rejects_bad_url() {
        let text = r#"
[[jellyfin]]
server_name = "Jelly"
url = "not a url"
api_key = "k"

[remote_scan]
"#;
        let err = Config::from_toml_str(text).unwrap_err();
        assert!(err.to_string().contains("invalid url"));
    }

    #[test]
    fn test_config_load_from_file() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, BASIC_CONFIG.replace("api_key_env = \"REMOTE_SCAN_TEST_EMBY_KEY\"", "api_key = \"e\"")).unwrap();

        let config = Config::load(Some(&config_path)).unwrap();
        assert_eq!(config.remote_scan.ignore_folders, vec!["@eaDir".to_string()]);
    }

    #[test]
    fn test_config_invalid_path() {
        let err = Config::load(Some(Path::new("nonexistent-remote-scan.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
