//! Strategy directory watching
//!
//! Reloads the strategy store when rule files in the strategy directory are
//! created, modified or removed. Bursts of filesystem events are debounced
//! into a single reload, published like any other reload.

use super::StrategyReloader;
use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Watches a strategy directory and reloads the store on change
pub struct StrategyWatcher {
    reloader: StrategyReloader,
    debounce: Duration,
}

/// Keeps the watcher alive; watching stops when dropped
pub struct StrategyWatcherHandle {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Drop for StrategyWatcherHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl StrategyWatcher {
    pub fn new(reloader: StrategyReloader) -> Self {
        Self {
            reloader,
            debounce: DEFAULT_DEBOUNCE,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Start watching; must be called from within a tokio runtime
    pub fn start(self) -> Result<StrategyWatcherHandle> {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    let _ = tx.send(event);
                }
                Err(e) => warn!(error = %e, "Strategy watcher error"),
            },
            notify::Config::default(),
        )
        .context("Failed to create strategy directory watcher")?;

        let dir = self.reloader.store().dir().to_path_buf();
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", dir.display()))?;
        info!(dir = %dir.display(), "Watching strategy directory");

        let reloader = self.reloader;
        let debounce = self.debounce;

        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !is_relevant(&event) {
                    continue;
                }

                tokio::time::sleep(debounce).await;
                while rx.try_recv().is_ok() {}

                debug!("Strategy files changed, reloading");
                let summary = reloader.reload().await;
                info!(
                    loaded = summary.loaded,
                    errors = summary.errors.len(),
                    "Strategies reloaded after directory change"
                );
            }
        });

        Ok(StrategyWatcherHandle {
            _watcher: watcher,
            task,
        })
    }
}

fn is_relevant(event: &Event) -> bool {
    let kind_matches = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    kind_matches && event.paths.iter().any(|p| is_strategy_file(p))
}

fn is_strategy_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("protect") | Some("json")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{components, ComponentStatus, HealthRegistry};
    use crate::observability::{ProtectMetrics, StructuredLogger};
    use crate::strategy::StrategyStore;
    use notify::event::{CreateKind, ModifyKind};
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;

    const MINER: &str = r#"{"name": "miner", "type": "cryptomining",
        "checks": [{"type": "process_check", "cpu_threshold": 90}]}"#;

    async fn wait_for_store_status(health: &HealthRegistry, expected: ComponentStatus) -> bool {
        for _ in 0..100 {
            let status = health.component(components::STRATEGY_STORE).await.map(|c| c.status);
            if status == Some(expected) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_directory_changes_update_store_health() {
        let dir = TempDir::new().unwrap();
        let health = HealthRegistry::new();
        health.register_all().await;
        let store = Arc::new(StrategyStore::new(dir.path()));
        let reloader = StrategyReloader::new(
            store.clone(),
            health.clone(),
            ProtectMetrics::new(),
            StructuredLogger::new("test-node"),
        );

        let _handle = StrategyWatcher::new(reloader)
            .with_debounce(Duration::from_millis(20))
            .start()
            .unwrap();

        std::fs::write(dir.path().join("miner.protect"), MINER).unwrap();
        std::fs::write(dir.path().join("broken.protect"), "{ nope").unwrap();
        assert!(wait_for_store_status(&health, ComponentStatus::Degraded).await);
        assert_eq!(store.current().len(), 1);

        std::fs::remove_file(dir.path().join("broken.protect")).unwrap();
        assert!(wait_for_store_status(&health, ComponentStatus::Healthy).await);
    }

    #[test]
    fn test_relevant_events() {
        let create = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/strategies/miner.protect"));
        assert!(is_relevant(&create));

        let modify_other = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/strategies/README.md"));
        assert!(!is_relevant(&modify_other));

        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(PathBuf::from("/strategies/miner.protect"));
        assert!(!is_relevant(&access));
    }
}
