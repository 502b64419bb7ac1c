//! API client for communicating with the agent's admin API

use anyhow::{Context, Result};
use protect_lib::{FlagRecord, HealthResponse, ReadinessResponse};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

/// API client for the agent admin API
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, api_message(&body));
        }

        response.json().await.context("Failed to parse response")
    }

    /// Make a POST request without a body
    pub async fn post<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, api_message(&body));
        }

        response.json().await.context("Failed to parse response")
    }

    /// GET a health endpoint; 503 still carries a JSON body
    pub async fn get_status<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to reach agent")?;

        let status = response.status();
        if !status.is_success() && status != StatusCode::SERVICE_UNAVAILABLE {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, api_message(&body));
        }

        response.json().await.context("Failed to parse response")
    }

    pub async fn list_flags(&self) -> Result<FlagList> {
        self.get("api/v1/flags").await
    }

    pub async fn get_flag(&self, uuid: &str) -> Result<FlagRecord> {
        self.get(&format!("api/v1/flags/{}", uuid)).await
    }

    pub async fn release_flag(&self, uuid: &str) -> Result<FlagRecord> {
        self.post(&format!("api/v1/flags/{}/release", uuid)).await
    }

    pub async fn list_strategies(&self) -> Result<StrategyList> {
        self.get("api/v1/strategies").await
    }

    pub async fn reload_strategies(&self) -> Result<ReloadResult> {
        self.post("api/v1/strategies/reload").await
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        self.get_status("healthz").await
    }

    pub async fn readiness(&self) -> Result<ReadinessResponse> {
        self.get_status("readyz").await
    }
}

/// Pull the `error` field out of an API error body, if there is one
fn api_message(body: &str) -> String {
    serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.error)
        .unwrap_or_else(|_| body.to_string())
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagList {
    pub records: Vec<FlagRecord>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySummary {
    pub name: String,
    #[serde(rename = "type")]
    pub category: String,
    pub checks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyList {
    pub strategies: Vec<StrategySummary>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadResult {
    pub loaded: usize,
    pub errors: Vec<String>,
    #[serde(default = "default_replaced")]
    pub replaced: bool,
}

fn default_replaced() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: &str = r#"{
        "container_uuid": "c-1",
        "server_id": "7",
        "flags": [{
            "strategy_name": "miner",
            "check_type": "process_check",
            "message": "High CPU",
            "evidence": {"kind": "processes", "threshold": 90.0, "processes": [
                {"pid": 42, "name": "xmrig", "cpu_percent": 97.5}
            ]},
            "detected_at": "2024-05-01T10:00:00Z"
        }],
        "first_detected_at": "2024-05-01T10:00:00Z",
        "last_action_at": "2024-05-01T10:00:01Z",
        "suspended": true,
        "suspended_at": "2024-05-01T10:00:01Z",
        "alerted_digests": []
    }"#;

    #[tokio::test]
    async fn test_list_flags() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/flags")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(r#"{{"records": [{}], "total": 1}}"#, RECORD))
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let list = client.list_flags().await.unwrap();

        mock.assert_async().await;
        assert_eq!(list.total, 1);
        assert_eq!(list.records[0].container_uuid, "c-1");
        assert!(list.records[0].suspended);
    }

    #[tokio::test]
    async fn test_release_not_found_surfaces_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/flags/nope/release")
            .with_status(404)
            .with_body(r#"{"error": "no flag record for nope"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client.release_flag("nope").await.unwrap_err();

        assert!(err.to_string().contains("404"));
        assert!(err.to_string().contains("no flag record for nope"));
    }

    #[tokio::test]
    async fn test_health_accepts_unavailable_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/healthz")
            .with_status(503)
            .with_body(r#"{"status": "unhealthy", "components": {"ledger": {"status": "unhealthy", "message": "corrupt", "updated_at": "2024-05-01T10:00:00Z"}}}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let health = client.health().await.unwrap();

        assert_eq!(health.status, protect_lib::ComponentStatus::Unhealthy);
        assert!(health.components.contains_key("ledger"));
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(ApiClient::new("not a url").is_err());
    }
}
