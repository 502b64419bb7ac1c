//! Webhook notifier for public and private alert channels

use super::alerts::{Incident, PublicAlert, WebhookPayload};
use super::Notifier;
use crate::error::DispatchError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Posts embed payloads to two webhook URLs
///
/// A missing URL disables that channel; sends to it succeed without a request.
pub struct WebhookNotifier {
    http: Client,
    public_url: Option<String>,
    private_url: Option<String>,
}

impl WebhookNotifier {
    pub fn new(public_url: Option<String>, private_url: Option<String>) -> Result<Self, DispatchError> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|source| DispatchError::Transport {
                target: "webhook client".to_string(),
                source,
            })?;

        Ok(Self {
            http,
            public_url: public_url.filter(|u| !u.trim().is_empty()),
            private_url: private_url.filter(|u| !u.trim().is_empty()),
        })
    }

    async fn post(&self, channel: &str, url: Option<&str>, payload: &WebhookPayload) -> Result<(), DispatchError> {
        let Some(url) = url else {
            debug!(channel = channel, "Webhook channel not configured, skipping");
            return Ok(());
        };
        let target = format!("{} webhook", channel);

        let response = self
            .http
            .post(url)
            .json(payload)
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
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_public(&self, alert: &PublicAlert) -> Result<(), DispatchError> {
        self.post("public", self.public_url.as_deref(), &WebhookPayload::public(alert))
            .await
    }

    async fn send_private(&self, incident: &Incident) -> Result<(), DispatchError> {
        self.post("private", self.private_url.as_deref(), &WebhookPayload::private(incident))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Decision;
    use chrono::Utc;
    use mockito::Matcher;
    use serde_json::json;

    fn alert() -> PublicAlert {
        PublicAlert {
            container_uuid: "c-1".to_string(),
            server_id: Some("7".to_string()),
            detected_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_public_alert_posts_embed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/public")
            .match_body(Matcher::PartialJson(json!({
                "embeds": [{"title": "Suspicious activity detected using Protect."}]
            })))
            .with_status(204)
            .create_async()
            .await;

        let notifier = WebhookNotifier::new(Some(format!("{}/public", server.url())), None).unwrap();
        notifier.send_public(&alert()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_private_alert_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/private")
            .with_status(429)
            .create_async()
            .await;

        let notifier = WebhookNotifier::new(None, Some(format!("{}/private", server.url()))).unwrap();
        let incident = Incident {
            container_uuid: "c-1".to_string(),
            server_id: None,
            decision: Decision::FirstDetection,
            flags: vec![],
            detected_at: Utc::now(),
        };
        let err = notifier.send_private(&incident).await.unwrap_err();
        assert!(matches!(err, DispatchError::Status { status: 429, .. }));
    }

    #[tokio::test]
    async fn test_unconfigured_channel_is_noop() {
        let notifier = WebhookNotifier::new(Some("  ".to_string()), None).unwrap();
        notifier.send_public(&alert()).await.unwrap();
    }
}
