//! Strategy reloads and their observable effects
//!
//! Every reload, whether requested through the admin API or triggered by a
//! change in the strategy directory, goes through [`StrategyReloader`] so
//! health, metrics and the structured log always describe the active set.

use super::{ReloadSummary, StrategyStore};
use crate::health::HealthRegistry;
use crate::observability::{ProtectMetrics, StructuredLogger};
use std::sync::Arc;
use tracing::error;

#[derive(Clone)]
pub struct StrategyReloader {
    store: Arc<StrategyStore>,
    health: HealthRegistry,
    metrics: ProtectMetrics,
    logger: StructuredLogger,
}

impl StrategyReloader {
    pub fn new(
        store: Arc<StrategyStore>,
        health: HealthRegistry,
        metrics: ProtectMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            store,
            health,
            metrics,
            logger,
        }
    }

    pub fn store(&self) -> &Arc<StrategyStore> {
        &self.store
    }

    /// Re-read the strategy directory off the async runtime and publish the outcome
    pub async fn reload(&self) -> ReloadSummary {
        let store = self.store.clone();
        let summary = match tokio::task::spawn_blocking(move || store.reload()).await {
            Ok(summary) => summary,
            Err(e) => {
                error!(error = %e, "Strategy reload task failed");
                ReloadSummary {
                    loaded: self.store.current().len(),
                    errors: vec![e.to_string()],
                    replaced: false,
                }
            }
        };
        self.publish(&summary).await;
        summary
    }

    async fn publish(&self, summary: &ReloadSummary) {
        for error in &summary.errors {
            self.logger.log_strategy_rejected(self.store.dir(), error);
        }
        self.logger
            .log_strategies_loaded(summary.loaded, summary.errors.len());
        self.metrics.set_strategies_loaded(summary.loaded as i64);
        self.health.observe_reload(summary).await;
    }
}
