//! Pterodactyl application API client

use super::PanelClient;
use crate::error::DispatchError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

const SERVERS_PAGE_SIZE: u32 = 50_000;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct ServerList {
    #[serde(default)]
    data: Vec<ServerEntry>,
}

#[derive(Debug, Deserialize)]
struct ServerEntry {
    attributes: ServerAttributes,
}

#[derive(Debug, Deserialize)]
struct ServerAttributes {
    id: u64,
    uuid: String,
}

/// Panel client backed by the Pterodactyl application API
pub struct PterodactylClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl PterodactylClient {
    /// `panel_url` is the panel root, e.g. `https://panel.example.com`
    pub fn new(panel_url: &str, api_key: impl Into<String>) -> Result<Self, DispatchError> {
        Self::with_timeout(panel_url, api_key, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        panel_url: &str,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DispatchError> {
        let parsed = url::Url::parse(panel_url).map_err(|e| DispatchError::InvalidResponse {
            target: panel_url.to_string(),
            reason: format!("invalid panel URL: {}", e),
        })?;

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| DispatchError::Transport {
                target: panel_url.to_string(),
                source,
            })?;

        Ok(Self {
            http,
            base_url: format!("{}/api/application", parsed.as_str().trim_end_matches('/')),
            api_key: api_key.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
    }
}

#[async_trait]
impl PanelClient for PterodactylClient {
    async fn list_servers(&self) -> Result<HashMap<String, String>, DispatchError> {
        let target = "panel server list".to_string();
        let response = self
            .request(reqwest::Method::GET, "/servers")
            .query(&[("per_page", SERVERS_PAGE_SIZE)])
            .send()
            .await
            .map_err(|source| DispatchError::Transport {
                target: target.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Status {
                target,
                status: status.as_u16(),
            });
        }

        let list: ServerList = response
            .json()
            .await
            .map_err(|e| DispatchError::InvalidResponse {
                target: target.clone(),
                reason: e.to_string(),
            })?;

        let servers: HashMap<String, String> = list
            .data
            .into_iter()
            .map(|entry| (entry.attributes.uuid, entry.attributes.id.to_string()))
            .collect();
        debug!(servers = servers.len(), "Fetched panel server directory");
        Ok(servers)
    }

    async fn suspend(&self, server_id: &str) -> Result<(), DispatchError> {
        let target = format!("panel suspend for server {}", server_id);
        let response = self
            .request(reqwest::Method::POST, &format!("/servers/{}/suspend", server_id))
            .send()
            .await
            .map_err(|source| DispatchError::Transport {
                target: target.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Status {
                target,
                status: status.as_u16(),
            });
        }

        info!(server_id = %server_id, "Panel accepted suspension");
        Ok(())
    }
}
