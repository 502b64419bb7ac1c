//! Scan coordination
//!
//! One cycle enumerates containers, evaluates each against the active
//! strategy set and drives the ledger and dispatcher:
//! - Containers are evaluated in parallel, bounded by a semaphore
//! - Snapshot and evaluation share one per-container deadline; evaluation
//!   runs on the blocking pool and, when cut short, its partial flags still
//!   count
//! - While the ledger is unavailable the cycle is detection-only

mod r#loop;


pub use r#loop::ScanLoop;

use crate::dispatch::{
    AlertOutcome, DispatchOutcome, Dispatcher, PanelClient, RetryPolicy, SuspendedPolicy, SuspensionOutcome,
};
use crate::evaluator::{EvaluationRun, StrategyEvaluator};
use crate::health::HealthRegistry;
use crate::ledger::{Decision, FlagLedger};
use crate::observability::{ProtectMetrics, StructuredLogger};
use crate::snapshot::SnapshotProvider;
use crate::strategy::{StrategySet, StrategyStore};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OnceCell, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// Configuration for scan cycles
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Containers evaluated concurrently (default: 8)
    pub max_parallel: usize,
    /// Per-container evaluation budget (default: 60 seconds)
    pub container_timeout: Duration,
    /// Handling of containers that are already suspended
    pub suspended_policy: SuspendedPolicy,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_parallel: 8,
            container_timeout: Duration::from_secs(60),
            suspended_policy: SuspendedPolicy::default(),
        }
    }
}

/// Per-container result of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Clean,
    Flagged,
    /// Not evaluated because it is already suspended
    Skipped,
    /// The snapshot could not be built
    Unavailable,
    /// Flags raised but not recorded or dispatched
    DetectionOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerScan {
    pub container_uuid: String,
    pub status: ScanStatus,
    pub flags: usize,
    pub faults: usize,
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<DispatchOutcome>,
}

impl ContainerScan {
    fn new(container_uuid: &str, status: ScanStatus) -> Self {
        Self {
            container_uuid: container_uuid.to_string(),
            status,
            flags: 0,
            faults: 0,
            timed_out: false,
            decision: None,
            outcome: None,
        }
    }
}

/// Summary of one scan cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleReport {
    pub started_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub scanned: usize,
    pub clean: usize,
    pub flagged: usize,
    pub suspended: usize,
    pub skipped: usize,
    pub unavailable: usize,
    pub timed_out: usize,
    /// The ledger was unavailable; nothing was recorded or dispatched
    pub detection_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub containers: Vec<ContainerScan>,
}

impl CycleReport {
    fn tally(&mut self, scan: &ContainerScan) {
        match scan.status {
            ScanStatus::Clean => self.clean += 1,
            ScanStatus::Flagged | ScanStatus::DetectionOnly => self.flagged += 1,
            ScanStatus::Skipped => self.skipped += 1,
            ScanStatus::Unavailable => self.unavailable += 1,
        }
        if matches!(
            scan.status,
            ScanStatus::Clean | ScanStatus::Flagged | ScanStatus::DetectionOnly
        ) {
            self.scanned += 1;
        }
        if scan.timed_out {
            self.timed_out += 1;
        }
        if scan.outcome.map_or(false, |o| o.suspension == SuspensionOutcome::Suspended) {
            self.suspended += 1;
        }
    }
}

/// Lazily fetched uuid→server id map, resolved at most once per cycle
pub struct ServerDirectory {
    panel: Arc<dyn PanelClient>,
    retry: RetryPolicy,
    servers: OnceCell<Option<HashMap<String, String>>>,
}

impl ServerDirectory {
    pub fn new(panel: Arc<dyn PanelClient>, retry: RetryPolicy) -> Self {
        Self {
            panel,
            retry,
            servers: OnceCell::new(),
        }
    }

    pub async fn resolve(&self, container_uuid: &str) -> Option<String> {
        let servers = self
            .servers
            .get_or_init(|| async {
                match self
                    .retry
                    .run("panel server list", || self.panel.list_servers())
                    .await
                {
                    Ok(servers) => Some(servers),
                    Err(e) => {
                        warn!(error = %e, "Panel server directory unavailable this cycle");
                        None
                    }
                }
            })
            .await;
        servers.as_ref()?.get(container_uuid).cloned()
    }
}

/// Drives one complete scan cycle at a time
#[derive(Clone)]
pub struct ScanCoordinator {
    store: Arc<StrategyStore>,
    evaluator: Arc<StrategyEvaluator>,
    provider: Arc<dyn SnapshotProvider>,
    ledger: Arc<FlagLedger>,
    dispatcher: Arc<Dispatcher>,
    health: Option<HealthRegistry>,
    metrics: ProtectMetrics,
    logger: StructuredLogger,
    config: ScanConfig,
}

impl ScanCoordinator {
    pub fn builder() -> ScanCoordinatorBuilder {
        ScanCoordinatorBuilder::new()
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Run one complete, independent scan cycle
    pub async fn run_cycle(&self) -> CycleReport {
        let start = Instant::now();
        let mut report = CycleReport {
            started_at: Some(Utc::now()),
            ..Default::default()
        };

        let ledger_ok = self.ledger.ensure_available().await;
        self.metrics.set_ledger_available(ledger_ok);
        self.update_ledger_health(ledger_ok).await;
        report.detection_only = !ledger_ok;

        let strategies = self.store.current();
        self.metrics.set_strategies_loaded(strategies.len() as i64);

        let containers = match self.provider.list_containers().await {
            Ok(containers) => containers,
            Err(e) => {
                error!(error = %e, "Failed to enumerate containers");
                if let Some(health) = &self.health {
                    health.observe_listing_failure(&e.to_string()).await;
                }
                report.error = Some(e.to_string());
                report.duration_ms = start.elapsed().as_millis() as u64;
                return report;
            }
        };

        let directory = Arc::new(ServerDirectory::new(
            self.dispatcher.panel().clone(),
            self.dispatcher.retry_policy().clone(),
        ));
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel.max(1)));
        let mut tasks = JoinSet::new();

        for container_uuid in containers {
            let this = self.clone();
            let strategies = strategies.clone();
            let directory = directory.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                this.scan_container(&container_uuid, strategies, &directory, ledger_ok)
                    .await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(scan) => {
                    report.tally(&scan);
                    report.containers.push(scan);
                }
                Err(e) => error!(error = %e, "Container scan task failed"),
            }
        }
        report.containers.sort_by(|a, b| a.container_uuid.cmp(&b.container_uuid));

        let elapsed = start.elapsed();
        report.duration_ms = elapsed.as_millis() as u64;
        self.metrics.observe_scan_cycle(elapsed.as_secs_f64());
        self.metrics.set_flagged_containers(self.ledger.len() as i64);
        self.update_cycle_health(&report).await;

        self.logger.log_cycle_complete(
            report.scanned,
            report.clean,
            report.flagged,
            report.suspended,
            report.unavailable,
            report.timed_out,
            report.detection_only,
            elapsed.as_millis(),
        );
        report
    }

    async fn scan_container(
        &self,
        container_uuid: &str,
        strategies: Arc<StrategySet>,
        directory: &ServerDirectory,
        ledger_ok: bool,
    ) -> ContainerScan {
        if self.config.suspended_policy == SuspendedPolicy::Skip && self.ledger.is_suspended(container_uuid) {
            debug!(container_uuid = %container_uuid, "Container already suspended, skipping");
            self.metrics.inc_containers_skipped();
            return ContainerScan::new(container_uuid, ScanStatus::Skipped);
        }

        let deadline = tokio::time::Instant::now() + self.config.container_timeout;

        let snapshot = match tokio::time::timeout_at(deadline, self.provider.snapshot(container_uuid)).await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => {
                warn!(container_uuid = %container_uuid, error = %e, "Snapshot unavailable, retrying next cycle");
                self.metrics.inc_snapshot_failures();
                return ContainerScan::new(container_uuid, ScanStatus::Unavailable);
            }
            Err(_) => {
                warn!(
                    container_uuid = %container_uuid,
                    timeout_ms = self.config.container_timeout.as_millis() as u64,
                    "Snapshot timed out, retrying next cycle"
                );
                self.metrics.inc_snapshot_failures();
                self.metrics.inc_evaluation_timeouts();
                let mut scan = ContainerScan::new(container_uuid, ScanStatus::Unavailable);
                scan.timed_out = true;
                return scan;
            }
        };
        self.metrics.inc_containers_scanned();

        let run = Arc::new(EvaluationRun::new());
        let evaluator = self.evaluator.clone();
        let worker_run = run.clone();
        let handle = tokio::task::spawn_blocking(move || {
            evaluator.evaluate_into(&strategies, &snapshot, &worker_run);
        });

        let timed_out = match tokio::time::timeout_at(deadline, handle).await {
            Ok(Ok(())) => false,
            Ok(Err(e)) => {
                error!(container_uuid = %container_uuid, error = %e, "Evaluation task failed");
                false
            }
            Err(_) => {
                run.cancel();
                warn!(
                    container_uuid = %container_uuid,
                    timeout_ms = self.config.container_timeout.as_millis() as u64,
                    "Evaluation timed out; submitting partial flags"
                );
                self.metrics.inc_evaluation_timeouts();
                true
            }
        };

        let flags = run.take_flags();
        let mut scan = ContainerScan::new(container_uuid, ScanStatus::Clean);
        scan.faults = run.fault_count();
        scan.timed_out = timed_out;
        scan.flags = flags.len();
        self.metrics.add_check_faults(scan.faults as u64);

        if flags.is_empty() {
            return scan;
        }

        let server_id = match directory.resolve(container_uuid).await {
            Some(id) => Some(id),
            None => self.ledger.get(container_uuid).and_then(|r| r.server_id),
        };

        for flag in &flags {
            self.logger.log_flag_raised(container_uuid, server_id.as_deref(), flag);
            self.metrics.inc_flags_raised(flag.check_type.as_str());
        }

        if !ledger_ok {
            warn!(
                container_uuid = %container_uuid,
                flags = flags.len(),
                "Ledger unavailable; flags not recorded and no action taken"
            );
            scan.status = ScanStatus::DetectionOnly;
            return scan;
        }

        let decision = match self
            .ledger
            .record(container_uuid, server_id.as_deref(), flags.clone())
            .await
        {
            Ok((_, decision)) => decision,
            Err(e) => {
                error!(
                    container_uuid = %container_uuid,
                    error = %e,
                    "Failed to record flags; no action taken"
                );
                scan.status = ScanStatus::DetectionOnly;
                return scan;
            }
        };

        let outcome = self
            .dispatcher
            .respond(container_uuid, server_id.as_deref(), &flags, decision)
            .await;
        self.record_outcome(&outcome);

        scan.status = ScanStatus::Flagged;
        scan.decision = Some(decision);
        scan.outcome = Some(outcome);
        scan
    }

    fn record_outcome(&self, outcome: &DispatchOutcome) {
        if outcome.alerts == AlertOutcome::Failed {
            self.metrics.inc_alert_failures();
        }
        match outcome.suspension {
            SuspensionOutcome::Suspended | SuspensionOutcome::SuspendedUnrecorded => self.metrics.inc_suspensions(),
            SuspensionOutcome::Failed | SuspensionOutcome::NoServerId | SuspensionOutcome::LedgerUnavailable => {
                self.metrics.inc_suspension_failures()
            }
            SuspensionOutcome::AlreadySuspended | SuspensionOutcome::NotAttempted => {}
        }
    }

    async fn update_ledger_health(&self, available: bool) {
        if let Some(health) = &self.health {
            health.observe_ledger(available, self.ledger.last_error()).await;
        }
    }

    async fn update_cycle_health(&self, report: &CycleReport) {
        let Some(health) = &self.health else {
            return;
        };
        let dispatch_failures = report
            .containers
            .iter()
            .filter_map(|c| c.outcome)
            .filter(|o| o.alerts == AlertOutcome::Failed || o.suspension == SuspensionOutcome::Failed)
            .count();
        health
            .observe_cycle(report.unavailable, report.timed_out, dispatch_failures)
            .await;
    }
}

/// Builder for the scan coordinator
pub struct ScanCoordinatorBuilder {
    store: Option<Arc<StrategyStore>>,
    evaluator: Option<Arc<StrategyEvaluator>>,
    provider: Option<Arc<dyn SnapshotProvider>>,
    ledger: Option<Arc<FlagLedger>>,
    dispatcher: Option<Arc<Dispatcher>>,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
    config: ScanConfig,
}

impl ScanCoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            evaluator: None,
            provider: None,
            ledger: None,
            dispatcher: None,
            health: None,
            logger: None,
            config: ScanConfig::default(),
        }
    }

    pub fn store(mut self, store: Arc<StrategyStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn evaluator(mut self, evaluator: StrategyEvaluator) -> Self {
        self.evaluator = Some(Arc::new(evaluator));
        self
    }

    pub fn provider(mut self, provider: Arc<dyn SnapshotProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn ledger(mut self, ledger: Arc<FlagLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<ScanCoordinator> {
        let logger = self.logger.unwrap_or_default();
        Ok(ScanCoordinator {
            store: self.store.ok_or_else(|| anyhow!("Strategy store is required"))?,
            evaluator: self
                .evaluator
                .unwrap_or_else(|| Arc::new(StrategyEvaluator::default().with_logger(logger.clone()))),
            provider: self.provider.ok_or_else(|| anyhow!("Snapshot provider is required"))?,
            ledger: self.ledger.ok_or_else(|| anyhow!("Flag ledger is required"))?,
            dispatcher: self.dispatcher.ok_or_else(|| anyhow!("Dispatcher is required"))?,
            health: self.health,
            metrics: ProtectMetrics::new(),
            logger,
            config: self.config,
        })
    }
}

impl Default for ScanCoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
