//! Pipeline health for the protect agent
//!
//! Each stage of detection reports into the registry:
//! - `strategy_store`: degraded while rule files are rejected, unhealthy when
//!   the directory cannot be read and a stale set is in use
//! - `scanner`: degraded when containers were unavailable or timed out in
//!   the last cycle, unhealthy when containers could not be listed
//! - `ledger`: unhealthy while the flag ledger is unavailable and scanning
//!   is detection-only
//! - `dispatcher`: degraded when alerts or suspensions failed last cycle
//!
//! The agent is ready once started and while neither the ledger nor the
//! strategy store is unhealthy. Scanner and dispatcher trouble is retried
//! every cycle and does not affect readiness.

use crate::strategy::ReloadSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Working with reduced coverage
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        !matches!(self, ComponentStatus::Unhealthy)
    }

    /// The worse of two statuses
    fn worst(self, other: ComponentStatus) -> ComponentStatus {
        match (self, other) {
            (ComponentStatus::Unhealthy, _) | (_, ComponentStatus::Unhealthy) => ComponentStatus::Unhealthy,
            (ComponentStatus::Degraded, _) | (_, ComponentStatus::Degraded) => ComponentStatus::Degraded,
            _ => ComponentStatus::Healthy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            updated_at: Utc::now(),
        }
    }

    pub fn healthy() -> Self {
        Self::new(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Overall status is the worst component status
    pub fn compute_status(components: &BTreeMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .fold(ComponentStatus::Healthy, |acc, c| acc.worst(c.status))
    }
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub mod components {
    pub const STRATEGY_STORE: &str = "strategy_store";
    pub const SCANNER: &str = "scanner";
    pub const LEDGER: &str = "ledger";
    pub const DISPATCHER: &str = "dispatcher";

    pub const ALL: &[&str] = &[STRATEGY_STORE, SCANNER, LEDGER, DISPATCHER];

    /// Components whose failure makes the agent unready
    pub const CRITICAL: &[&str] = &[LEDGER, STRATEGY_STORE];
}

/// Shared, cloneable view of component health
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<BTreeMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every pipeline component as healthy
    pub async fn register_all(&self) {
        let mut components = self.components.write().await;
        for name in components::ALL {
            components.insert(name.to_string(), ComponentHealth::healthy());
        }
    }

    pub async fn component(&self, name: &str) -> Option<ComponentHealth> {
        self.components.read().await.get(name).cloned()
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.components.write().await.insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Reflect a strategy reload
    pub async fn observe_reload(&self, summary: &ReloadSummary) {
        let health = if !summary.replaced {
            ComponentHealth::unhealthy(format!(
                "strategy directory unreadable, keeping {} strategies",
                summary.loaded
            ))
        } else if !summary.errors.is_empty() {
            ComponentHealth::degraded(format!("{} strategy files rejected", summary.errors.len()))
        } else {
            ComponentHealth::healthy()
        };
        self.update(components::STRATEGY_STORE, health).await;
    }

    /// Reflect ledger availability at the start of a cycle
    pub async fn observe_ledger(&self, available: bool, last_error: Option<String>) {
        let health = if available {
            ComponentHealth::healthy()
        } else {
            ComponentHealth::unhealthy(format!(
                "detection only: {}",
                last_error.unwrap_or_else(|| "ledger unavailable".to_string())
            ))
        };
        self.update(components::LEDGER, health).await;
    }

    pub async fn observe_listing_failure(&self, error: &str) {
        self.set_unhealthy(components::SCANNER, format!("container listing failed: {}", error))
            .await;
    }

    /// Reflect the per-container results of a finished cycle
    pub async fn observe_cycle(&self, unavailable: usize, timed_out: usize, dispatch_failures: usize) {
        let scanner = if unavailable > 0 || timed_out > 0 {
            ComponentHealth::degraded(format!(
                "{} containers unavailable, {} timed out",
                unavailable, timed_out
            ))
        } else {
            ComponentHealth::healthy()
        };
        let dispatcher = if dispatch_failures > 0 {
            ComponentHealth::degraded(format!(
                "{} containers with failed alerts or suspensions",
                dispatch_failures
            ))
        } else {
            ComponentHealth::healthy()
        };

        let mut components = self.components.write().await;
        components.insert(components::SCANNER.to_string(), scanner);
        components.insert(components::DISPATCHER.to_string(), dispatcher);
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        if !*self.ready.read().await {
            return ReadinessResponse {
                ready: false,
                reason: Some("Agent not yet initialized".to_string()),
            };
        }

        let components = self.components.read().await;
        let failing = components::CRITICAL.iter().find_map(|name| {
            components
                .get(*name)
                .filter(|c| !c.status.is_operational())
                .map(|c| (name, c))
        });

        match failing {
            Some((name, health)) => ReadinessResponse {
                ready: false,
                reason: Some(format!(
                    "{} unhealthy: {}",
                    name,
                    health.message.as_deref().unwrap_or("no detail")
                )),
            },
            None => ReadinessResponse {
                ready: true,
                reason: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reload(loaded: usize, errors: usize, replaced: bool) -> ReloadSummary {
        ReloadSummary {
            loaded,
            errors: (0..errors).map(|i| format!("bad{}.protect: syntax", i)).collect(),
            replaced,
        }
    }

    async fn started() -> HealthRegistry {
        let registry = HealthRegistry::new();
        registry.register_all().await;
        registry.set_ready(true).await;
        registry
    }

    #[tokio::test]
    async fn test_all_components_start_healthy() {
        let registry = HealthRegistry::new();
        assert!(registry.health().await.components.is_empty());

        registry.register_all().await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert_eq!(health.components.len(), 4);
        assert!(registry.component("collector").await.is_none());
    }

    #[tokio::test]
    async fn test_rejected_strategy_files_degrade_until_fixed() {
        let registry = started().await;

        registry.observe_reload(&reload(2, 1, true)).await;
        let store = registry.component(components::STRATEGY_STORE).await.unwrap();
        assert_eq!(store.status, ComponentStatus::Degraded);
        assert_eq!(store.message.as_deref(), Some("1 strategy files rejected"));
        assert!(registry.readiness().await.ready);

        registry.observe_reload(&reload(3, 0, true)).await;
        assert_eq!(registry.health().await.status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_unreadable_strategy_directory_is_not_ready() {
        let registry = started().await;
        registry.observe_reload(&reload(2, 1, false)).await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Unhealthy);
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert!(readiness.reason.unwrap().starts_with("strategy_store unhealthy"));
    }

    #[tokio::test]
    async fn test_unavailable_ledger_means_detection_only() {
        let registry = started().await;
        registry
            .observe_ledger(false, Some("flagged.json is corrupt".to_string()))
            .await;

        let ledger = registry.component(components::LEDGER).await.unwrap();
        assert_eq!(ledger.status, ComponentStatus::Unhealthy);
        assert_eq!(ledger.message.as_deref(), Some("detection only: flagged.json is corrupt"));
        assert!(!registry.readiness().await.ready);

        registry.observe_ledger(true, None).await;
        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_cycle_trouble_degrades_without_losing_readiness() {
        let registry = started().await;
        registry.observe_cycle(1, 2, 1).await;

        let scanner = registry.component(components::SCANNER).await.unwrap();
        assert_eq!(scanner.status, ComponentStatus::Degraded);
        assert_eq!(scanner.message.as_deref(), Some("1 containers unavailable, 2 timed out"));
        assert_eq!(
            registry.component(components::DISPATCHER).await.unwrap().status,
            ComponentStatus::Degraded
        );
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);

        registry.observe_listing_failure("docker socket closed").await;
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
        assert!(registry.readiness().await.ready);

        registry.observe_cycle(0, 0, 0).await;
        assert_eq!(registry.health().await.status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_not_ready_before_startup() {
        let registry = HealthRegistry::new();
        registry.register_all().await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("Agent not yet initialized"));
    }
}
