//! Alert content and webhook embed formatting
//!
//! Two audiences:
//! - Public: low detail, only says suspicious activity was found
//! - Private: full incident with uuid, server id and every flag

use crate::ledger::Decision;
use crate::models::Flag;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

const EMBED_COLOR: u32 = 0x5046e4;
const FOOTER: &str = "Powered by Protect";
const PUBLIC_TITLE: &str = "Suspicious activity detected using Protect.";
const UNKNOWN: &str = "Unknown";

/// Webhook limit for a single embed field value
pub const MAX_FIELD_LEN: usize = 1024;

/// Low-detail alert for the public channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicAlert {
    pub container_uuid: String,
    pub server_id: Option<String>,
    pub detected_at: DateTime<Utc>,
}

/// Full-detail incident for the private channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub container_uuid: String,
    pub server_id: Option<String>,
    pub decision: Decision,
    pub flags: Vec<Flag>,
    pub detected_at: DateTime<Utc>,
}

impl Incident {
    /// One line per flag: strategy / check / message / evidence / time
    pub fn flag_lines(&self) -> Vec<String> {
        self.flags
            .iter()
            .map(|flag| {
                format!(
                    "[{}] {}: {} ({}) at {}",
                    flag.strategy_name,
                    flag.check_type,
                    flag.message,
                    flag.evidence,
                    rfc3339(flag.detected_at)
                )
            })
            .collect()
    }
}

/// Discord-compatible webhook body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    pub timestamp: String,
    pub footer: EmbedFooter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedFooter {
    pub text: String,
}

impl WebhookPayload {
    pub fn public(alert: &PublicAlert) -> Self {
        Self::single(Embed {
            title: PUBLIC_TITLE.to_string(),
            color: EMBED_COLOR,
            fields: vec![field("Container", alert.server_id.as_deref().unwrap_or(UNKNOWN), false)],
            timestamp: rfc3339(alert.detected_at),
            footer: footer(),
        })
    }

    pub fn private(incident: &Incident) -> Self {
        let server_id = incident.server_id.as_deref().unwrap_or(UNKNOWN);
        Self::single(Embed {
            title: format!("Incident [{}]", server_id),
            color: EMBED_COLOR,
            fields: vec![
                field("Docker UUID", &incident.container_uuid, true),
                field("Panel Server ID", server_id, true),
                field("Decision", incident.decision.as_str(), true),
                field("All Flags", &incident.flag_lines().join("\n"), false),
            ],
            timestamp: rfc3339(incident.detected_at),
            footer: footer(),
        })
    }

    fn single(embed: Embed) -> Self {
        Self { embeds: vec![embed] }
    }
}

fn field(name: &str, value: &str, inline: bool) -> EmbedField {
    EmbedField {
        name: name.to_string(),
        value: truncate(value, MAX_FIELD_LEN),
        inline,
    }
}

fn footer() -> EmbedFooter {
    EmbedFooter {
        text: FOOTER.to_string(),
    }
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Truncate to at most `max` characters, marking the cut with an ellipsis
fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    let mut cut: String = value.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
