use std::path::PathBuf;

use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;

use super::{build_client, ensure_success};
use crate::error::Result;

const API_SYSTEM_INFO: &str = "/System/Info";

/// Emby and Jellyfin share most of their REST surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbyFlavor {
    Emby,
    Jellyfin,
}

impl EmbyFlavor {
    fn prefix(&self) -> &'static str {
        match self {
            EmbyFlavor::Emby => "/emby",
            EmbyFlavor::Jellyfin => "",
        }
    }

    fn libraries_path(&self) -> &'static str {
        match self {
            EmbyFlavor::Emby => "/Library/SelectableMediaFolders",
            EmbyFlavor::Jellyfin => "/Library/VirtualFolders",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            EmbyFlavor::Emby => "Emby",
            EmbyFlavor::Jellyfin => "Jellyfin",
        }
    }
}

#[derive(Debug, Deserialize)]
struct SystemInfo {
    #[serde(rename = "ServerName")]
    server_name: Option<String>,
}

/// Entry of the library listing; Emby calls the id `Id`, Jellyfin `ItemId`.
#[derive(Debug, Deserialize)]
struct LibraryFolder {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Id", alias = "ItemId")]
    id: Option<String>,
}

/// Emby or Jellyfin server client
pub struct EmbyApi {
    client: Client,
    name: String,
    url: String,
    token: String,
    flavor: EmbyFlavor,
}

impl EmbyApi {
    pub fn new(name: String, url: String, token: String, flavor: EmbyFlavor) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            name,
            url,
            token,
            flavor,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let endpoint = format!(
            "{}{}{}",
            self.url.trim_end_matches('/'),
            self.flavor.prefix(),
            path
        );
        let builder = self.client.request(method, endpoint);
        match self.flavor {
            EmbyFlavor::Emby => builder.query(&[("api_key", self.token.as_str())]),
            EmbyFlavor::Jellyfin => builder.header("X-Emby-Token", self.token.as_str()),
        }
    }

    pub async fn is_reachable(&self) -> bool {
        let result = match self.request(Method::GET, API_SYSTEM_INFO).send().await {
            Ok(response) => ensure_success(response, API_SYSTEM_INFO).await.map(|_| ()),
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                log::debug!(
                    "{}({}) reachability check failed: {}",
                    self.flavor.label(),
                    self.name,
                    e
                );
                false
            }
        }
    }

    pub async fn server_reported_name(&self) -> Result<String> {
        let response = self.request(Method::GET, API_SYSTEM_INFO).send().await?;
        let info: SystemInfo = ensure_success(response, API_SYSTEM_INFO).await?.json().await?;
        Ok(info.server_name.unwrap_or_else(|| self.name.clone()))
    }

    pub async fn library_id(&self, library: &str) -> Result<Option<String>> {
        let path = self.flavor.libraries_path();
        let response = self.request(Method::GET, path).send().await?;
        let folders: Vec<LibraryFolder> = ensure_success(response, path).await?.json().await?;

        Ok(folders
            .into_iter()
            .find(|f| f.name == library)
            .and_then(|f| f.id))
    }

    /// Recursive refresh of the whole library. Neither server accepts a
    /// folder list on this endpoint, so `paths` only shows up in the log.
    pub async fn trigger_scan(&self, library_id: &str, paths: &[PathBuf]) -> Result<()> {
        let path = format!("/Items/{}/Refresh", library_id);
        log::debug!(
            "{}({}) refreshing library {} for {} folder(s)",
            self.flavor.label(),
            self.name,
            library_id,
            paths.len()
        );

        let response = self
            .request(Method::POST, &path)
            .header("accept", "*/*")
            .query(&[
                ("Recursive", "true"),
                ("ImageRefreshMode", "Default"),
                ("MetadataRefreshMode", "Default"),
                ("ReplaceAllImages", "false"),
                ("ReplaceAllMetadata", "false"),
            ])
            .send()
            .await?;
        ensure_success(response, &path).await?;
        Ok(())
    }
}
