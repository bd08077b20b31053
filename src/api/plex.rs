use std::path::PathBuf;

use reqwest::Client;
use serde::Deserialize;

use super::{build_client, ensure_success};
use crate::error::{RemoteScanError, Result};

const API_SERVERS: &str = "/servers";
const API_LIBRARIES: &str = "/library/sections";
const TOKEN_PARAM: &str = "X-Plex-Token";

/// `<MediaContainer>` reply of `/servers`
#[derive(Debug, Deserialize)]
struct ServersContainer {
    #[serde(rename = "Server", default)]
    servers: Vec<ServerEntry>,
}

#[derive(Debug, Deserialize)]
struct ServerEntry {
    #[serde(rename = "@name")]
    name: Option<String>,
}

/// `<MediaContainer>` reply of `/library/sections`
#[derive(Debug, Deserialize)]
struct SectionsContainer {
    #[serde(rename = "Directory", default)]
    directories: Vec<Directory>,
}

#[derive(Debug, Deserialize)]
struct Directory {
    #[serde(rename = "@key")]
    key: String,
    #[serde(rename = "@title")]
    title: String,
}

fn parse_server_name(xml: &str) -> Result<Option<String>> {
    let container: ServersContainer = quick_xml::de::from_str(xml)
        .map_err(|e| RemoteScanError::Parse(format!("Plex servers reply: {}", e)))?;
    Ok(container.servers.into_iter().next().and_then(|s| s.name))
}

fn parse_sections(xml: &str) -> Result<Vec<(String, String)>> {
    let container: SectionsContainer = quick_xml::de::from_str(xml)
        .map_err(|e| RemoteScanError::Parse(format!("Plex library sections reply: {}", e)))?;
    Ok(container
        .directories
        .into_iter()
        .map(|d| (d.title, d.key))
        .collect())
}

/// Plex Media Server client
pub struct PlexApi {
    client: Client,
    name: String,
    url: String,
    token: String,
}

impl PlexApi {
    pub fn new(name: String, url: String, token: String) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            name,
            url,
            token,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.url.trim_end_matches('/'), path)
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<String> {
        let response = self
            .client
            .get(self.endpoint(path))
            .query(&[(TOKEN_PARAM, self.token.as_str())])
            .query(query)
            .send()
            .await?;

        let response = ensure_success(response, path).await?;
        Ok(response.text().await?)
    }

    pub async fn is_reachable(&self) -> bool {
        match self.get(API_SERVERS, &[]).await {
            Ok(_) => true,
            Err(e) => {
                log::debug!("Plex({}) reachability check failed: {}", self.name, e);
                false
            }
        }
    }

    pub async fn server_reported_name(&self) -> Result<String> {
        let body = self.get(API_SERVERS, &[]).await?;
        parse_server_name(&body)?.ok_or_else(|| {
            RemoteScanError::Parse(format!("Plex({}) malformed servers reply received", self.name))
        })
    }

    pub async fn library_id(&self, library: &str) -> Result<Option<String>> {
        let body = self.get(API_LIBRARIES, &[]).await?;
        Ok(parse_sections(&body)?
            .into_iter()
            .find(|(title, _)| title == library)
            .map(|(_, key)| key))
    }

    /// Partial scan of each folder, or a full library refresh when no folder is given.
    pub async fn trigger_scan(&self, library_id: &str, paths: &[PathBuf]) -> Result<()> {
        let refresh = format!("{}/{}/refresh", API_LIBRARIES, library_id);

        if paths.is_empty() {
            self.get(&refresh, &[]).await?;
            return Ok(());
        }

        let mut first_error = None;
        for path in paths {
            let path = path.to_string_lossy();
            if let Err(e) = self.get(&refresh, &[("path", path.as_ref())]).await {
                log::debug!("Plex({}) partial scan of {} failed: {}", self.name, path, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
