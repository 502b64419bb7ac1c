//! Strategy evaluation
//!
//! Runs every check of every active strategy against one container snapshot.
//! A faulting check is logged and skipped; it never aborts the remaining
//! checks of the strategy or other strategies. Flags are produced in
//! strategy-load order, then check-declaration order.

use crate::check::CheckExecutor;
use crate::models::{ContainerSnapshot, Flag};
use crate::observability::StructuredLogger;
use crate::strategy::{Strategy, StrategySet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Shared state for one in-flight container evaluation
///
/// Flags are published here as they are produced so a caller that gives up
/// waiting can still collect the partial result. Once collected, the run is
/// closed: a check that was already in flight and matches afterwards is
/// counted as late instead of being pushed.
#[derive(Debug, Default)]
pub struct EvaluationRun {
    flags: Mutex<Vec<Flag>>,
    collected: AtomicBool,
    cancelled: AtomicBool,
    faults: AtomicUsize,
    late: AtomicUsize,
}

impl EvaluationRun {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop before the next check
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Flags produced so far; closes the run
    pub fn take_flags(&self) -> Vec<Flag> {
        let mut flags = self.lock_flags();
        self.collected.store(true, Ordering::SeqCst);
        std::mem::take(&mut *flags)
    }

    /// Number of checks skipped because of a fault
    pub fn fault_count(&self) -> usize {
        self.faults.load(Ordering::SeqCst)
    }

    /// Flags raised after the run was collected
    pub fn late_count(&self) -> usize {
        self.late.load(Ordering::SeqCst)
    }

    /// Returns false when the run was already collected
    fn push(&self, flag: Flag) -> bool {
        let mut flags = self.lock_flags();
        if self.collected.load(Ordering::SeqCst) {
            self.late.fetch_add(1, Ordering::SeqCst);
            return false;
        }
        flags.push(flag);
        true
    }

    fn lock_flags(&self) -> MutexGuard<'_, Vec<Flag>> {
        self.flags.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Runs strategies against container snapshots
#[derive(Debug, Clone, Default)]
pub struct StrategyEvaluator {
    executor: CheckExecutor,
    logger: StructuredLogger,
}

impl StrategyEvaluator {
    pub fn new(executor: CheckExecutor) -> Self {
        Self {
            executor,
            logger: StructuredLogger::default(),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn executor(&self) -> &CheckExecutor {
        &self.executor
    }

    /// Evaluate one strategy, returning its flags in check order
    pub fn evaluate(&self, strategy: &Strategy, snapshot: &ContainerSnapshot) -> Vec<Flag> {
        let run = EvaluationRun::new();
        self.evaluate_strategy(strategy, snapshot, &run);
        run.take_flags()
    }

    /// Evaluate all strategies in load order
    pub fn evaluate_all(&self, strategies: &StrategySet, snapshot: &ContainerSnapshot) -> Vec<Flag> {
        let run = EvaluationRun::new();
        self.evaluate_into(strategies, snapshot, &run);
        run.take_flags()
    }

    /// Evaluate all strategies, publishing flags into `run`
    ///
    /// Returns early once `run` is cancelled.
    pub fn evaluate_into(&self, strategies: &StrategySet, snapshot: &ContainerSnapshot, run: &EvaluationRun) {
        for strategy in strategies.iter() {
            if run.is_cancelled() {
                return;
            }
            self.evaluate_strategy(strategy, snapshot, run);
        }
    }

    fn evaluate_strategy(&self, strategy: &Strategy, snapshot: &ContainerSnapshot, run: &EvaluationRun) {
        for check in &strategy.checks {
            if run.is_cancelled() {
                debug!(
                    container = %snapshot.container_uuid,
                    strategy = %strategy.name,
                    "Evaluation cancelled"
                );
                return;
            }

            match self.executor.evaluate(&strategy.name, check, snapshot) {
                Ok(Some(flag)) => {
                    debug!(
                        container = %snapshot.container_uuid,
                        strategy = %strategy.name,
                        check_type = %flag.check_type,
                        "Check matched"
                    );
                    if !run.push(flag.clone()) {
                        self.logger.log_late_flag(&snapshot.container_uuid, &flag);
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    run.faults.fetch_add(1, Ordering::SeqCst);
                    self.logger.log_check_skipped(
                        &snapshot.container_uuid,
                        &strategy.name,
                        check.check_type(),
                        &e.to_string(),
                    );
                }
            }
        }
    }
}
