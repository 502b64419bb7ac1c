//! Response dispatch
//!
//! Turns a recorded flag set into side effects:
//! - Public and private alerts, deduplicated by flag-set digest
//! - A panel suspension, confirmed in the ledger only after it succeeds
//!
//! Delivery failures never block suspension, and suspension is refused while
//! the ledger is unavailable.

mod alerts;
mod panel;
mod webhook;

pub use alerts::{Embed, EmbedField, EmbedFooter, Incident, PublicAlert, WebhookPayload, MAX_FIELD_LEN};
pub use panel::PterodactylClient;
pub use webhook::WebhookNotifier;

use crate::check::flag_set_digest;
use crate::error::DispatchError;
use crate::ledger::{Decision, FlagLedger};
use crate::models::Flag;
use crate::observability::StructuredLogger;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Game panel operations
#[async_trait]
pub trait PanelClient: Send + Sync {
    /// Map of container uuid to panel server id
    async fn list_servers(&self) -> Result<HashMap<String, String>, DispatchError>;

    async fn suspend(&self, server_id: &str) -> Result<(), DispatchError>;
}

/// Operator notification channels
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_public(&self, alert: &PublicAlert) -> Result<(), DispatchError>;

    async fn send_private(&self, incident: &Incident) -> Result<(), DispatchError>;
}

/// Exponential backoff for outbound calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds or attempts are exhausted
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, DispatchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DispatchError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut backoff = self.initial_backoff;
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    warn!(
                        operation = what,
                        attempt = attempt,
                        max_attempts = attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Call failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, self.max_backoff);
                    attempt += 1;
                }
            }
        }
    }
}

/// What to do when an already-suspended container raises new flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendedPolicy {
    /// Do not evaluate suspended containers at all
    #[default]
    Skip,
    /// Evaluate and append history, stay silent
    RecordOnly,
    /// Evaluate, append history and send a private alert for unseen flag sets
    AlertNewFlags,
}

impl SuspendedPolicy {
    pub fn evaluates_suspended(&self) -> bool {
        !matches!(self, SuspendedPolicy::Skip)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertOutcome {
    /// Alerts delivered and the digest recorded
    Sent,
    /// This flag set was already alerted on
    Deduplicated,
    /// At least one channel failed; retried next cycle
    Failed,
    /// Alerts not sent by policy
    Suppressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspensionOutcome {
    Suspended,
    /// The panel accepted the suspension but the ledger write failed
    SuspendedUnrecorded,
    Failed,
    AlreadySuspended,
    NoServerId,
    LedgerUnavailable,
    NotAttempted,
}

/// Result of one `respond` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub alerts: AlertOutcome,
    pub suspension: SuspensionOutcome,
}

impl DispatchOutcome {
    fn nothing() -> Self {
        Self {
            alerts: AlertOutcome::Suppressed,
            suspension: SuspensionOutcome::NotAttempted,
        }
    }
}

/// Sends alerts and suspends flagged containers
pub struct Dispatcher {
    ledger: Arc<FlagLedger>,
    panel: Arc<dyn PanelClient>,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
    suspended_policy: SuspendedPolicy,
    logger: StructuredLogger,
}

impl Dispatcher {
    pub fn new(ledger: Arc<FlagLedger>, panel: Arc<dyn PanelClient>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            ledger,
            panel,
            notifier,
            retry: RetryPolicy::default(),
            suspended_policy: SuspendedPolicy::default(),
            logger: StructuredLogger::default(),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_suspended_policy(mut self, policy: SuspendedPolicy) -> Self {
        self.suspended_policy = policy;
        self
    }

    pub fn suspended_policy(&self) -> SuspendedPolicy {
        self.suspended_policy
    }

    pub fn panel(&self) -> &Arc<dyn PanelClient> {
        &self.panel
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// React to the flags just recorded for a container
    pub async fn respond(
        &self,
        container_uuid: &str,
        server_id: Option<&str>,
        flags: &[Flag],
        decision: Decision,
    ) -> DispatchOutcome {
        if flags.is_empty() {
            return DispatchOutcome::nothing();
        }

        let digest = flag_set_digest(flags);
        let already_alerted = self
            .ledger
            .get(container_uuid)
            .map_or(false, |r| r.has_alerted(&digest));

        if decision == Decision::AlreadySuspended {
            let alerts = match self.suspended_policy {
                SuspendedPolicy::Skip | SuspendedPolicy::RecordOnly => AlertOutcome::Suppressed,
                SuspendedPolicy::AlertNewFlags if already_alerted => AlertOutcome::Deduplicated,
                SuspendedPolicy::AlertNewFlags => {
                    let incident = self.incident(container_uuid, server_id, flags, decision);
                    if self.deliver_private(&incident).await {
                        self.remember_alerted(container_uuid, &digest).await;
                        AlertOutcome::Sent
                    } else {
                        AlertOutcome::Failed
                    }
                }
            };
            return DispatchOutcome {
                alerts,
                suspension: SuspensionOutcome::AlreadySuspended,
            };
        }

        let alerts = if already_alerted {
            debug!(container_uuid = %container_uuid, "Flag set already alerted, skipping alerts");
            AlertOutcome::Deduplicated
        } else {
            self.send_alerts(container_uuid, server_id, flags, decision, &digest).await
        };

        let suspension = self.suspend(container_uuid, server_id).await;
        DispatchOutcome { alerts, suspension }
    }

    async fn send_alerts(
        &self,
        container_uuid: &str,
        server_id: Option<&str>,
        flags: &[Flag],
        decision: Decision,
        digest: &str,
    ) -> AlertOutcome {
        let public = PublicAlert {
            container_uuid: container_uuid.to_string(),
            server_id: server_id.map(str::to_string),
            detected_at: Utc::now(),
        };
        let public_sent = match self
            .retry
            .run("public alert", || self.notifier.send_public(&public))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                self.logger
                    .log_alert_delivery_failed(container_uuid, "public", &e.to_string());
                false
            }
        };

        let incident = self.incident(container_uuid, server_id, flags, decision);
        let private_sent = self.deliver_private(&incident).await;

        if public_sent && private_sent {
            self.remember_alerted(container_uuid, digest).await;
            AlertOutcome::Sent
        } else {
            AlertOutcome::Failed
        }
    }

    async fn deliver_private(&self, incident: &Incident) -> bool {
        match self
            .retry
            .run("private alert", || self.notifier.send_private(incident))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                self.logger
                    .log_alert_delivery_failed(&incident.container_uuid, "private", &e.to_string());
                false
            }
        }
    }

    async fn remember_alerted(&self, container_uuid: &str, digest: &str) {
        if let Err(e) = self.ledger.mark_alerted(container_uuid, digest).await {
            warn!(
                container_uuid = %container_uuid,
                error = %e,
                "Could not record alert digest; alerts may repeat"
            );
        }
    }

    async fn suspend(&self, container_uuid: &str, server_id: Option<&str>) -> SuspensionOutcome {
        let Some(server_id) = server_id else {
            self.logger
                .log_suspension_failed(container_uuid, None, "no panel server id for container");
            return SuspensionOutcome::NoServerId;
        };

        if !self.ledger.is_available() {
            self.logger
                .log_suspension_failed(container_uuid, Some(server_id), "ledger unavailable");
            return SuspensionOutcome::LedgerUnavailable;
        }

        if let Err(e) = self
            .retry
            .run("panel suspend", || self.panel.suspend(server_id))
            .await
        {
            self.logger
                .log_suspension_failed(container_uuid, Some(server_id), &e.to_string());
            return SuspensionOutcome::Failed;
        }

        match self.ledger.mark_suspended(container_uuid).await {
            Ok(_) => {
                self.logger.log_container_suspended(container_uuid, server_id);
                SuspensionOutcome::Suspended
            }
            Err(e) => {
                error!(
                    container_uuid = %container_uuid,
                    server_id = %server_id,
                    error = %e,
                    "Container suspended but ledger update failed"
                );
                SuspensionOutcome::SuspendedUnrecorded
            }
        }
    }

    fn incident(&self, container_uuid: &str, server_id: Option<&str>, flags: &[Flag], decision: Decision) -> Incident {
        Incident {
            container_uuid: container_uuid.to_string(),
            server_id: server_id.map(str::to_string),
            decision,
            flags: flags.to_vec(),
            detected_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CheckType, Evidence, ProcessInfo};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct MockPanel {
        suspends: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl PanelClient for MockPanel {
        async fn list_servers(&self) -> Result<HashMap<String, String>, DispatchError> {
            Ok(HashMap::new())
        }

        async fn suspend(&self, server_id: &str) -> Result<(), DispatchError> {
            self.suspends.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(DispatchError::Status {
                    target: format!("suspend {}", server_id),
                    status: 500,
                });
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockNotifier {
        public: AtomicUsize,
        private: AtomicUsize,
        fail_public: AtomicBool,
    }

    #[async_trait]
    impl Notifier for MockNotifier {
        async fn send_public(&self, _alert: &PublicAlert) -> Result<(), DispatchError> {
            self.public.fetch_add(1, Ordering::SeqCst);
            if self.fail_public.load(Ordering::SeqCst) {
                return Err(DispatchError::Status {
                    target: "public webhook".to_string(),
                    status: 502,
                });
            }
            Ok(())
        }

        async fn send_private(&self, _incident: &Incident) -> Result<(), DispatchError> {
            self.private.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn flags() -> Vec<Flag> {
        vec![Flag {
            strategy_name: "miner".to_string(),
            check_type: CheckType::LogContent,
            message: "xmrig detected".to_string(),
            evidence: Evidence::LogLine {
                pattern: "xmrig".to_string(),
                line: "xmrig 6.0 started".to_string(),
            },
            detected_at: Utc::now(),
        }]
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    struct Harness {
        _dir: TempDir,
        ledger: Arc<FlagLedger>,
        panel: Arc<MockPanel>,
        notifier: Arc<MockNotifier>,
        dispatcher: Dispatcher,
    }

    fn harness(policy: SuspendedPolicy) -> Harness {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(FlagLedger::open(dir.path().join("flagged.json")));
        let panel = Arc::new(MockPanel::default());
        let notifier = Arc::new(MockNotifier::default());
        let dispatcher = Dispatcher::new(ledger.clone(), panel.clone(), notifier.clone())
            .with_retry(fast_retry())
            .with_suspended_policy(policy);
        Harness {
            _dir: dir,
            ledger,
            panel,
            notifier,
            dispatcher,
        }
    }

    #[tokio::test]
    async fn test_first_detection_alerts_and_suspends() {
        let h = harness(SuspendedPolicy::Skip);
        let (_, decision) = h.ledger.record("c-1", Some("7"), flags()).await.unwrap();

        let outcome = h.dispatcher.respond("c-1", Some("7"), &flags(), decision).await;

        assert_eq!(outcome.alerts, AlertOutcome::Sent);
        assert_eq!(outcome.suspension, SuspensionOutcome::Suspended);
        assert_eq!(h.notifier.public.load(Ordering::SeqCst), 1);
        assert_eq!(h.notifier.private.load(Ordering::SeqCst), 1);
        assert_eq!(h.panel.suspends.load(Ordering::SeqCst), 1);
        assert!(h.ledger.is_suspended("c-1"));
    }

    #[tokio::test]
    async fn test_failed_suspension_retries_without_duplicate_alerts() {
        let h = harness(SuspendedPolicy::Skip);
        h.panel.fail.store(true, Ordering::SeqCst);

        let (_, decision) = h.ledger.record("c-1", Some("7"), flags()).await.unwrap();
        let outcome = h.dispatcher.respond("c-1", Some("7"), &flags(), decision).await;
        assert_eq!(outcome.alerts, AlertOutcome::Sent);
        assert_eq!(outcome.suspension, SuspensionOutcome::Failed);
        assert_eq!(h.panel.suspends.load(Ordering::SeqCst), 2);
        assert!(!h.ledger.is_suspended("c-1"));

        // Next cycle: same flags, panel healthy again
        h.panel.fail.store(false, Ordering::SeqCst);
        let (_, decision) = h.ledger.record("c-1", Some("7"), flags()).await.unwrap();
        assert_eq!(decision, Decision::RepeatDetectionUnsuspended);

        let outcome = h.dispatcher.respond("c-1", Some("7"), &flags(), decision).await;
        assert_eq!(outcome.alerts, AlertOutcome::Deduplicated);
        assert_eq!(outcome.suspension, SuspensionOutcome::Suspended);
        assert_eq!(h.notifier.public.load(Ordering::SeqCst), 1);
        assert_eq!(h.notifier.private.load(Ordering::SeqCst), 1);
    }

    fn miner_flags(cpu: f64) -> Vec<Flag> {
        vec![Flag {
            strategy_name: "miner".to_string(),
            check_type: CheckType::ProcessCheck,
            message: format!("High CPU: xmrig (pid 4242, {:.1}%)", cpu),
            evidence: Evidence::Processes {
                processes: vec![ProcessInfo {
                    pid: 4242,
                    name: "xmrig".to_string(),
                    cpu_percent: cpu,
                }],
                threshold: 90.0,
            },
            detected_at: Utc::now(),
        }]
    }

    #[tokio::test]
    async fn test_failing_panel_with_drifting_cpu_alerts_once() {
        let h = harness(SuspendedPolicy::Skip);
        h.panel.fail.store(true, Ordering::SeqCst);

        let mut outcomes = Vec::new();
        for cpu in [95.0, 95.3, 96.1] {
            let flags = miner_flags(cpu);
            let (_, decision) = h.ledger.record("c-1", Some("7"), flags.clone()).await.unwrap();
            let outcome = h.dispatcher.respond("c-1", Some("7"), &flags, decision).await;
            assert_eq!(outcome.suspension, SuspensionOutcome::Failed);
            outcomes.push(outcome.alerts);
        }

        assert_eq!(
            outcomes,
            vec![AlertOutcome::Sent, AlertOutcome::Deduplicated, AlertOutcome::Deduplicated]
        );
        assert_eq!(h.notifier.public.load(Ordering::SeqCst), 1);
        assert_eq!(h.notifier.private.load(Ordering::SeqCst), 1);
        assert_eq!(h.ledger.get("c-1").unwrap().flags.len(), 3);
    }

    #[tokio::test]
    async fn test_alert_new_flags_ignores_cpu_drift() {
        let h = harness(SuspendedPolicy::AlertNewFlags);
        let (_, decision) = h.ledger.record("c-1", Some("7"), miner_flags(95.0)).await.unwrap();
        h.dispatcher.respond("c-1", Some("7"), &miner_flags(95.0), decision).await;

        let (_, decision) = h.ledger.record("c-1", Some("7"), miner_flags(97.4)).await.unwrap();
        let outcome = h.dispatcher.respond("c-1", Some("7"), &miner_flags(97.4), decision).await;

        assert_eq!(outcome.alerts, AlertOutcome::Deduplicated);
        assert_eq!(h.notifier.private.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_already_suspended_never_suspends_again() {
        let h = harness(SuspendedPolicy::RecordOnly);
        let (_, decision) = h.ledger.record("c-1", Some("7"), flags()).await.unwrap();
        h.dispatcher.respond("c-1", Some("7"), &flags(), decision).await;

        let (_, decision) = h.ledger.record("c-1", Some("7"), flags()).await.unwrap();
        assert_eq!(decision, Decision::AlreadySuspended);
        let outcome = h.dispatcher.respond("c-1", Some("7"), &flags(), decision).await;

        assert_eq!(outcome.alerts, AlertOutcome::Suppressed);
        assert_eq!(outcome.suspension, SuspensionOutcome::AlreadySuspended);
        assert_eq!(h.panel.suspends.load(Ordering::SeqCst), 1);
        assert_eq!(h.notifier.private.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_alert_new_flags_policy_sends_private_once() {
        let h = harness(SuspendedPolicy::AlertNewFlags);
        let (_, decision) = h.ledger.record("c-1", Some("7"), flags()).await.unwrap();
        h.dispatcher.respond("c-1", Some("7"), &flags(), decision).await;

        let mut new_flags = flags();
        new_flags[0].evidence = Evidence::LogLine {
            pattern: "minerd".to_string(),
            line: "minerd -o stratum+tcp://pool".to_string(),
        };

        for expected in [AlertOutcome::Sent, AlertOutcome::Deduplicated] {
            let (_, decision) = h.ledger.record("c-1", Some("7"), new_flags.clone()).await.unwrap();
            let outcome = h.dispatcher.respond("c-1", Some("7"), &new_flags, decision).await;
            assert_eq!(outcome.alerts, expected);
            assert_eq!(outcome.suspension, SuspensionOutcome::AlreadySuspended);
        }

        assert_eq!(h.notifier.public.load(Ordering::SeqCst), 1);
        assert_eq!(h.notifier.private.load(Ordering::SeqCst), 2);
        assert_eq!(h.panel.suspends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_public_failure_does_not_block_suspension() {
        let h = harness(SuspendedPolicy::Skip);
        h.notifier.fail_public.store(true, Ordering::SeqCst);

        let (_, decision) = h.ledger.record("c-1", Some("7"), flags()).await.unwrap();
        let outcome = h.dispatcher.respond("c-1", Some("7"), &flags(), decision).await;

        assert_eq!(outcome.alerts, AlertOutcome::Failed);
        assert_eq!(outcome.suspension, SuspensionOutcome::Suspended);
        assert!(!h.ledger.get("c-1").unwrap().has_alerted(&flag_set_digest(&flags())));
    }

    #[tokio::test]
    async fn test_missing_server_id_defers_suspension() {
        let h = harness(SuspendedPolicy::Skip);
        let (_, decision) = h.ledger.record("c-1", None, flags()).await.unwrap();
        let outcome = h.dispatcher.respond("c-1", None, &flags(), decision).await;

        assert_eq!(outcome.alerts, AlertOutcome::Sent);
        assert_eq!(outcome.suspension, SuspensionOutcome::NoServerId);
        assert_eq!(h.panel.suspends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retry_policy_gives_up() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result: Result<(), DispatchError> = fast_retry()
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(DispatchError::Status {
                    target: "x".to_string(),
                    status: 503,
                })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
