//! Observability infrastructure for the protect agent
//!
//! Provides:
//! - Prometheus metrics (scan latency, flags, suspensions, ledger state)
//! - Structured JSON logging of domain events with tracing

use crate::models::{CheckType, Flag};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge, Histogram, IntCounter,
    IntCounterVec, IntGauge,
};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for scan cycle duration (in seconds)
const CYCLE_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 180.0, 300.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ProtectMetricsInner> = OnceLock::new();

struct ProtectMetricsInner {
    scan_cycle_seconds: Histogram,
    containers_scanned: IntCounter,
    containers_skipped: IntCounter,
    snapshot_failures: IntCounter,
    evaluation_timeouts: IntCounter,
    check_faults: IntCounter,
    flags_raised: IntCounterVec,
    suspensions: IntCounter,
    suspension_failures: IntCounter,
    alert_failures: IntCounter,
    strategies_loaded: IntGauge,
    ledger_available: IntGauge,
    flagged_containers: IntGauge,
}

impl ProtectMetricsInner {
    fn new() -> Self {
        Self {
            scan_cycle_seconds: register_histogram!(
                "protect_scan_cycle_seconds",
                "Time spent on one full scan cycle",
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register scan_cycle_seconds"),

            containers_scanned: register_int_counter!(
                "protect_containers_scanned_total",
                "Containers evaluated against the active strategies"
            )
            .expect("Failed to register containers_scanned"),

            containers_skipped: register_int_counter!(
                "protect_containers_skipped_total",
                "Containers skipped because they are already suspended"
            )
            .expect("Failed to register containers_skipped"),

            snapshot_failures: register_int_counter!(
                "protect_snapshot_failures_total",
                "Containers whose snapshot could not be built"
            )
            .expect("Failed to register snapshot_failures"),

            evaluation_timeouts: register_int_counter!(
                "protect_evaluation_timeouts_total",
                "Container evaluations cut short by the timeout"
            )
            .expect("Failed to register evaluation_timeouts"),

            check_faults: register_int_counter!(
                "protect_check_faults_total",
                "Checks skipped because of an I/O or pattern fault"
            )
            .expect("Failed to register check_faults"),

            flags_raised: register_int_counter_vec!(
                "protect_flags_raised_total",
                "Flags raised by check type",
                &["check_type"]
            )
            .expect("Failed to register flags_raised"),

            suspensions: register_int_counter!(
                "protect_suspensions_total",
                "Containers suspended through the panel"
            )
            .expect("Failed to register suspensions"),

            suspension_failures: register_int_counter!(
                "protect_suspension_failures_total",
                "Suspensions that failed or were refused"
            )
            .expect("Failed to register suspension_failures"),

            alert_failures: register_int_counter!(
                "protect_alert_failures_total",
                "Alert deliveries that failed after retries"
            )
            .expect("Failed to register alert_failures"),

            strategies_loaded: register_int_gauge!(
                "protect_strategies_loaded",
                "Number of strategies in the active set"
            )
            .expect("Failed to register strategies_loaded"),

            ledger_available: register_int_gauge!(
                "protect_ledger_available",
                "1 when the flag ledger is readable and writable"
            )
            .expect("Failed to register ledger_available"),

            flagged_containers: register_int_gauge!(
                "protect_flagged_containers",
                "Containers with a flag record"
            )
            .expect("Failed to register flagged_containers"),
        }
    }
}

/// Protect metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct ProtectMetrics {
    _private: (),
}

impl Default for ProtectMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtectMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ProtectMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ProtectMetricsInner {
        GLOBAL_METRICS.get_or_init(ProtectMetricsInner::new)
    }

    pub fn observe_scan_cycle(&self, duration_secs: f64) {
        self.inner().scan_cycle_seconds.observe(duration_secs);
    }

    pub fn inc_containers_scanned(&self) {
        self.inner().containers_scanned.inc();
    }

    pub fn inc_containers_skipped(&self) {
        self.inner().containers_skipped.inc();
    }

    pub fn inc_snapshot_failures(&self) {
        self.inner().snapshot_failures.inc();
    }

    pub fn inc_evaluation_timeouts(&self) {
        self.inner().evaluation_timeouts.inc();
    }

    pub fn add_check_faults(&self, count: u64) {
        self.inner().check_faults.inc_by(count);
    }

    pub fn inc_flags_raised(&self, check_type: &str) {
        self.inner().flags_raised.with_label_values(&[check_type]).inc();
    }

    pub fn inc_suspensions(&self) {
        self.inner().suspensions.inc();
    }

    pub fn inc_suspension_failures(&self) {
        self.inner().suspension_failures.inc();
    }

    pub fn inc_alert_failures(&self) {
        self.inner().alert_failures.inc();
    }

    pub fn set_strategies_loaded(&self, count: i64) {
        self.inner().strategies_loaded.set(count);
    }

    pub fn set_ledger_available(&self, available: bool) {
        self.inner().ledger_available.set(i64::from(available));
    }

    pub fn set_flagged_containers(&self, count: i64) {
        self.inner().flagged_containers.set(count);
    }
}

/// Structured logger for agent events
///
/// Emits consistent JSON log lines with an `event` field for the
/// significant moments of a detection run.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self::new("protect")
    }
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str, strategies: usize, ledger_records: usize) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            strategies = strategies,
            ledger_records = ledger_records,
            "Protect agent started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Protect agent shutting down"
        );
    }

    /// Log the outcome of a strategy (re)load
    pub fn log_strategies_loaded(&self, loaded: usize, rejected: usize) {
        info!(
            event = "strategies_loaded",
            node = %self.node_name,
            loaded = loaded,
            rejected = rejected,
            "Strategy set loaded"
        );
    }

    /// Log a strategy file that was skipped
    pub fn log_strategy_rejected(&self, path: &Path, error: &str) {
        warn!(
            event = "strategy_rejected",
            node = %self.node_name,
            path = %path.display(),
            error = %error,
            "Strategy file rejected"
        );
    }

    /// Log a flag raised against a container
    pub fn log_flag_raised(&self, container_uuid: &str, server_id: Option<&str>, flag: &Flag) {
        warn!(
            event = "flag_raised",
            node = %self.node_name,
            container_uuid = %container_uuid,
            server_id = server_id.unwrap_or("unknown"),
            strategy = %flag.strategy_name,
            check_type = %flag.check_type,
            message = %flag.message,
            evidence = %flag.evidence,
            "Flag raised"
        );
    }

    /// Log a check that faulted and was skipped
    pub fn log_check_skipped(&self, container_uuid: &str, strategy: &str, check_type: CheckType, error: &str) {
        warn!(
            event = "check_skipped",
            node = %self.node_name,
            container_uuid = %container_uuid,
            strategy = %strategy,
            check_type = %check_type,
            error = %error,
            "Check faulted and was skipped"
        );
    }

    /// Log a flag produced after its evaluation had already been collected
    pub fn log_late_flag(&self, container_uuid: &str, flag: &Flag) {
        warn!(
            event = "late_flag_dropped",
            node = %self.node_name,
            container_uuid = %container_uuid,
            strategy = %flag.strategy_name,
            check_type = %flag.check_type,
            evidence = %flag.evidence,
            "Flag raised after the evaluation timed out; seen again next cycle"
        );
    }

    /// Log an alert channel that failed after retries
    pub fn log_alert_delivery_failed(&self, container_uuid: &str, channel: &str, error: &str) {
        warn!(
            event = "alert_delivery_failed",
            node = %self.node_name,
            container_uuid = %container_uuid,
            channel = %channel,
            error = %error,
            "Alert not delivered"
        );
    }

    /// Log a successful suspension
    pub fn log_container_suspended(&self, container_uuid: &str, server_id: &str) {
        info!(
            event = "container_suspended",
            node = %self.node_name,
            container_uuid = %container_uuid,
            server_id = %server_id,
            "Container suspended"
        );
    }

    /// Log a suspension that failed or was refused
    pub fn log_suspension_failed(&self, container_uuid: &str, server_id: Option<&str>, reason: &str) {
        warn!(
            event = "suspension_failed",
            node = %self.node_name,
            container_uuid = %container_uuid,
            server_id = server_id.unwrap_or("unknown"),
            reason = %reason,
            "Suspension not performed; retried next cycle"
        );
    }

    /// Log the ledger becoming unreadable or unwritable
    pub fn log_ledger_degraded(&self, path: &Path, error: &str) {
        warn!(
            event = "ledger_degraded",
            node = %self.node_name,
            path = %path.display(),
            error = %error,
            "Flag ledger unavailable; suspensions disabled until it recovers"
        );
    }

    /// Log a finished scan cycle
    #[allow(clippy::too_many_arguments)]
    pub fn log_cycle_complete(
        &self,
        scanned: usize,
        clean: usize,
        flagged: usize,
        suspended: usize,
        unavailable: usize,
        timed_out: usize,
        detection_only: bool,
        elapsed_ms: u128,
    ) {
        info!(
            event = "scan_cycle_complete",
            node = %self.node_name,
            scanned = scanned,
            clean = clean,
            flagged = flagged,
            suspended = suspended,
            unavailable = unavailable,
            timed_out = timed_out,
            detection_only = detection_only,
            elapsed_ms = elapsed_ms as u64,
            "Scan cycle complete"
        );
    }
}
