//! Declarative detection strategies
//!
//! A strategy is a named, ordered list of checks loaded from a JSON rule file
//! (`*.protect` or `*.json`). Checks are a tagged union over the fixed set of
//! variants in [`CheckType`]; an unknown `type` rejects the whole file.

mod reloader;
mod store;
mod watcher;

pub use reloader::StrategyReloader;
pub use store::{load, parse_strategy, LoadReport, ReloadSummary, StrategySet, StrategyStore};
pub use watcher::{StrategyWatcher, StrategyWatcherHandle};

use crate::check::normalize_volume_path;
use crate::models::CheckType;
use serde::{Deserialize, Serialize};

const DEFAULT_MESSAGE: &str = "An undefined issue was detected";
const DEFAULT_MANIFEST: &str = "package.json";
const DEFAULT_NETWORK_WINDOW_SECS: u64 = 60;

/// Named, ordered collection of checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub name: String,
    /// Informational category (e.g. "cryptomining")
    #[serde(rename = "type")]
    pub category: String,
    pub checks: Vec<Check>,
}

impl Strategy {
    /// Validate structural invariants that serde cannot express
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("strategy name must not be empty".to_string());
        }
        if self.category.trim().is_empty() {
            return Err("strategy type must not be empty".to_string());
        }
        for (index, check) in self.checks.iter().enumerate() {
            check
                .validate()
                .map_err(|reason| format!("check #{} ({}): {}", index, check.check_type(), reason))?;
        }
        Ok(())
    }
}

/// A single typed rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Check {
    /// Message template, see [`crate::check::render_message`]
    #[serde(default = "default_message")]
    pub message: String,

    /// Volume-relative path; a leading `/` refers to the volume root
    #[serde(default, alias = "file", skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(flatten)]
    pub kind: CheckKind,
}

/// Variant-specific check configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckKind {
    FileExistence {
        /// Glob patterns matched against entries below `path`
        #[serde(default)]
        patterns: Vec<String>,
        /// Flag when absent instead of when present
        #[serde(default)]
        negate: bool,
    },
    FileContent {
        #[serde(default)]
        patterns: Vec<String>,
        #[serde(default)]
        match_mode: MatchMode,
        /// Known-bad SHA-256 digests of the whole file
        #[serde(default)]
        sha256: Vec<String>,
    },
    FileSize {
        #[serde(alias = "max_size")]
        threshold: u64,
        #[serde(default)]
        direction: SizeDirection,
    },
    Dependency {
        #[serde(default)]
        patterns: Vec<String>,
    },
    LogContent {
        #[serde(default)]
        patterns: Vec<String>,
        #[serde(default)]
        match_mode: MatchMode,
    },
    ProcessCheck {
        #[serde(alias = "threshold")]
        cpu_threshold: f64,
    },
    NetworkUsage {
        /// Bytes per second
        threshold: u64,
        #[serde(default = "default_window_secs")]
        window_secs: u64,
    },
}

/// How string patterns are matched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    #[default]
    Substring,
    Regex,
}

/// Which side of a size threshold raises a flag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeDirection {
    #[default]
    Over,
    Under,
}

fn default_message() -> String {
    DEFAULT_MESSAGE.to_string()
}

fn default_window_secs() -> u64 {
    DEFAULT_NETWORK_WINDOW_SECS
}

impl Check {
    pub fn check_type(&self) -> CheckType {
        self.kind.check_type()
    }

    /// Path for file-backed checks; dependency checks fall back to `package.json`
    pub fn target_path(&self) -> Option<&str> {
        match (&self.kind, self.path.as_deref()) {
            (CheckKind::Dependency { .. }, None) => Some(DEFAULT_MANIFEST),
            (_, path) => path,
        }
    }

    fn requires_path(&self) -> bool {
        matches!(
            self.kind,
            CheckKind::FileExistence { .. } | CheckKind::FileContent { .. } | CheckKind::FileSize { .. }
        )
    }

    fn validate(&self) -> Result<(), String> {
        if self.requires_path() && self.path.as_deref().map_or(true, |p| p.trim().is_empty()) {
            return Err("a path is required".to_string());
        }
        if let Some(path) = self.target_path() {
            if normalize_volume_path(path).is_none() {
                return Err(format!("path '{}' escapes the volume root", path));
            }
        }
        match &self.kind {
            CheckKind::ProcessCheck { cpu_threshold } if !cpu_threshold.is_finite() || *cpu_threshold < 0.0 => {
                Err("cpu_threshold must be a non-negative number".to_string())
            }
            CheckKind::NetworkUsage { window_secs, .. } if *window_secs == 0 => {
                Err("window_secs must be greater than zero".to_string())
            }
            _ => Ok(()),
        }
    }
}

impl CheckKind {
    pub fn check_type(&self) -> CheckType {
        match self {
            CheckKind::FileExistence { .. } => CheckType::FileExistence,
            CheckKind::FileContent { .. } => CheckType::FileContent,
            CheckKind::FileSize { .. } => CheckType::FileSize,
            CheckKind::Dependency { .. } => CheckType::Dependency,
            CheckKind::LogContent { .. } => CheckType::LogContent,
            CheckKind::ProcessCheck { .. } => CheckType::ProcessCheck,
            CheckKind::NetworkUsage { .. } => CheckType::NetworkUsage,
        }
    }
}
