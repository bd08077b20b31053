//! Media server APIs.
//!
//! Each configured server becomes one [`MediaServer`]. The variants share one
//! capability surface: reachability, library id lookup and library scan.

mod emby;
mod plex;

pub use emby::{EmbyApi, EmbyFlavor};
pub use plex::PlexApi;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::{Client, Response};

use crate::config::{Config, ServerConfig};
use crate::error::{RemoteScanError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Kind of media server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiType {
    Plex,
    Emby,
    Jellyfin,
}

impl ApiType {
    pub const ALL: [ApiType; 3] = [ApiType::Plex, ApiType::Emby, ApiType::Jellyfin];

    pub fn name(&self) -> &'static str {
        match self {
            ApiType::Plex => "Plex",
            ApiType::Emby => "Emby",
            ApiType::Jellyfin => "Jellyfin",
        }
    }
}

impl fmt::Display for ApiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub(crate) fn build_client() -> Result<Client> {
    Ok(Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()?)
}

/// Pass successful responses through, turn anything else into `Api` errors.
pub(crate) async fn ensure_success(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read error response".to_string());
    Err(RemoteScanError::Api(format!("{} returned {}: {}", what, status, body)))
}

/// One configured media server
pub enum MediaServer {
    Plex(PlexApi),
    Emby(EmbyApi),
    Jellyfin(EmbyApi),
}

impl MediaServer {
    pub fn from_config(api_type: ApiType, server: &ServerConfig) -> Result<Self> {
        let token = server
            .resolve_api_key()
            .map_err(|e| RemoteScanError::Config(e.to_string()))?;
        let name = server.server_name.clone();
        let url = server.url.clone();

        Ok(match api_type {
            ApiType::Plex => MediaServer::Plex(PlexApi::new(name, url, token)?),
            ApiType::Emby => MediaServer::Emby(EmbyApi::new(name, url, token, EmbyFlavor::Emby)?),
            ApiType::Jellyfin => {
                MediaServer::Jellyfin(EmbyApi::new(name, url, token, EmbyFlavor::Jellyfin)?)
            }
        })
    }

    pub fn api_type(&self) -> ApiType {
        match self {
            MediaServer::Plex(_) => ApiType::Plex,
            MediaServer::Emby(_) => ApiType::Emby,
            MediaServer::Jellyfin(_) => ApiType::Jellyfin,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            MediaServer::Plex(api) => api.name(),
            MediaServer::Emby(api) | MediaServer::Jellyfin(api) => api.name(),
        }
    }

    pub fn url(&self) -> &str {
        match self {
            MediaServer::Plex(api) => api.url(),
            MediaServer::Emby(api) | MediaServer::Jellyfin(api) => api.url(),
        }
    }

    /// True when the server answers an authenticated request.
    pub async fn is_reachable(&self) -> bool {
        match self {
            MediaServer::Plex(api) => api.is_reachable().await,
            MediaServer::Emby(api) | MediaServer::Jellyfin(api) => api.is_reachable().await,
        }
    }

    /// Name the server reports for itself
    pub async fn server_reported_name(&self) -> Result<String> {
        match self {
            MediaServer::Plex(api) => api.server_reported_name().await,
            MediaServer::Emby(api) | MediaServer::Jellyfin(api) => api.server_reported_name().await,
        }
    }

    /// Look up a library id by its display name
    pub async fn library_id(&self, library: &str) -> Result<Option<String>> {
        match self {
            MediaServer::Plex(api) => api.library_id(library).await,
            MediaServer::Emby(api) | MediaServer::Jellyfin(api) => api.library_id(library).await,
        }
    }

    /// Ask the server to rescan a library. `paths` are already in the
    /// server's view of the filesystem.
    pub async fn trigger_scan(&self, library_id: &str, paths: &[PathBuf]) -> Result<()> {
        match self {
            MediaServer::Plex(api) => api.trigger_scan(library_id, paths).await,
            MediaServer::Emby(api) | MediaServer::Jellyfin(api) => {
                api.trigger_scan(library_id, paths).await
            }
        }
    }
}

/// Every configured media server, looked up by type and name
#[derive(Default)]
pub struct ServerRegistry {
    servers: Vec<MediaServer>,
}

impl ServerRegistry {
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut servers = Vec::new();
        for api_type in ApiType::ALL {
            for server in config.servers(api_type) {
                servers.push(MediaServer::from_config(api_type, server)?);
            }
        }
        Ok(Self { servers })
    }

    pub fn get(&self, api_type: ApiType, name: &str) -> Option<&MediaServer> {
        self.servers
            .iter()
            .find(|s| s.api_type() == api_type && s.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MediaServer> {
        self.servers.iter()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Probe every server once and report the result.
    pub async fn log_connection_status(&self) {
        for server in &self.servers {
            let reported = if server.is_reachable().await {
                server.server_reported_name().await.ok()
            } else {
                None
            };

            match reported {
                Some(reported) => {
                    log::info!("Connected to {}({}) successfully", server.api_type(), reported)
                }
                None => log::warn!(
                    "{}({}) server not available. Is this correct url={}",
                    server.api_type(),
                    server.name(),
                    server.url()
                ),
            }
        }
    }
}
