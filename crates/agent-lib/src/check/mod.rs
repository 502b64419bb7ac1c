//! Check execution
//!
//! Evaluates a single [`Check`] against a [`ContainerSnapshot`]:
//! - File checks resolve paths inside the volume root and never follow
//!   symlinks out of it
//! - Runtime checks read the snapshot's log, process and network views
//! - Missing files and unavailable views yield no flag, not a fault

mod dependency;
pub mod digest;
mod files;
mod paths;
mod runtime;
mod template;

pub use digest::{flag_set_digest, sha256_file, sha256_hex};
pub use paths::normalize_volume_path;
pub use template::render_message;

use crate::error::CheckFault;
use crate::models::{ContainerSnapshot, Flag};
use crate::strategy::{Check, CheckKind};
use chrono::Utc;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Resource limits applied while evaluating checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorLimits {
    /// Maximum bytes read from a single file for pattern matching
    pub file_read_cap: u64,
    /// Maximum log lines considered by log checks
    pub log_tail_lines: usize,
}

impl Default for ExecutorLimits {
    fn default() -> Self {
        Self {
            file_read_cap: 8 * 1024 * 1024,
            log_tail_lines: 1000,
        }
    }
}

/// Stateless evaluator for individual checks
#[derive(Debug, Clone, Default)]
pub struct CheckExecutor {
    limits: ExecutorLimits,
}

impl CheckExecutor {
    pub fn new(limits: ExecutorLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ExecutorLimits {
        &self.limits
    }

    /// Evaluate one check, returning a flag when it matches
    pub fn evaluate(
        &self,
        strategy_name: &str,
        check: &Check,
        snapshot: &ContainerSnapshot,
    ) -> Result<Option<Flag>, CheckFault> {
        let root = snapshot.volume_root.as_path();
        let cap = self.limits.file_read_cap;

        let evidence = match &check.kind {
            CheckKind::FileExistence { patterns, negate } => {
                files::file_existence(root, required_path(check)?, patterns, *negate)?
            }
            CheckKind::FileContent {
                patterns,
                match_mode,
                sha256,
            } => files::file_content(root, required_path(check)?, patterns, *match_mode, sha256, cap)?,
            CheckKind::FileSize {
                threshold,
                direction,
            } => files::file_size(root, required_path(check)?, *threshold, *direction)?,
            CheckKind::Dependency { patterns } => {
                dependency::dependency(root, required_path(check)?, patterns, cap)?
            }
            CheckKind::LogContent {
                patterns,
                match_mode,
            } => runtime::log_content(
                snapshot.log_tail.as_deref(),
                patterns,
                *match_mode,
                self.limits.log_tail_lines,
            )?,
            CheckKind::ProcessCheck { cpu_threshold } => {
                runtime::process_check(snapshot.processes.as_deref(), *cpu_threshold)
            }
            CheckKind::NetworkUsage {
                threshold,
                window_secs,
            } => runtime::network_usage(snapshot.network.as_ref(), *threshold, *window_secs),
        };

        Ok(evidence.map(|evidence| Flag {
            strategy_name: strategy_name.to_string(),
            check_type: check.check_type(),
            message: render_message(&check.message, &evidence),
            evidence,
            detected_at: Utc::now(),
        }))
    }
}

fn required_path(check: &Check) -> Result<&str, CheckFault> {
    check.target_path().ok_or(CheckFault::MissingPath)
}

/// Read at most `cap` bytes from the start of a file
pub(crate) fn read_capped(path: &Path, cap: u64) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    File::open(path)?.take(cap).read_to_end(&mut buf)?;
    Ok(buf)
}
