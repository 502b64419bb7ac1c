//! Agent configuration
//!
//! Layered from an optional file (path from `PROTECT_CONFIG`, default
//! `config.json`) and `PROTECT_*` environment variables, environment last.

use anyhow::{bail, Context, Result};
use protect_lib::check::ExecutorLimits;
use protect_lib::dispatch::{RetryPolicy, SuspendedPolicy};
use protect_lib::scan::ScanConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_PATH_VAR: &str = "PROTECT_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Name reported in structured logs
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health/metrics/admin
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Directory holding one volume directory per container
    #[serde(default = "default_volumes_dir")]
    pub volumes_dir: PathBuf,

    #[serde(default = "default_strategies_dir")]
    pub strategies_dir: PathBuf,

    /// Flag ledger file
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,

    /// Panel base URL
    #[serde(default, alias = "panel")]
    pub panel_url: String,

    /// Panel application API key
    #[serde(default, alias = "key")]
    pub panel_api_key: String,

    #[serde(default, alias = "public_whook")]
    pub public_webhook_url: Option<String>,

    #[serde(default, alias = "private_whook")]
    pub private_webhook_url: Option<String>,

    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    #[serde(default = "default_max_parallel_scans")]
    pub max_parallel_scans: usize,

    /// Per-container evaluation budget
    #[serde(default = "default_container_timeout")]
    pub container_timeout_secs: u64,

    #[serde(default = "default_file_read_cap")]
    pub file_read_cap_bytes: u64,

    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: usize,

    #[serde(default = "default_dispatch_max_attempts")]
    pub dispatch_max_attempts: u32,

    #[serde(default = "default_dispatch_initial_backoff")]
    pub dispatch_initial_backoff_ms: u64,

    /// Handling of containers that are already suspended
    #[serde(default)]
    pub suspended_policy: SuspendedPolicy,

    /// Reload strategies when the directory changes
    #[serde(default = "default_watch_strategies")]
    pub watch_strategies: bool,
}

fn default_node_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_volumes_dir() -> PathBuf {
    PathBuf::from("/var/lib/pterodactyl/volumes")
}

fn default_strategies_dir() -> PathBuf {
    PathBuf::from("./strategies")
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("flagged.json")
}

fn default_scan_interval() -> u64 {
    180
}

fn default_max_parallel_scans() -> usize {
    8
}

fn default_container_timeout() -> u64 {
    60
}

fn default_file_read_cap() -> u64 {
    8 * 1024 * 1024
}

fn default_log_tail_lines() -> usize {
    1000
}

fn default_dispatch_max_attempts() -> u32 {
    3
}

fn default_dispatch_initial_backoff() -> u64 {
    500
}

fn default_watch_strategies() -> bool {
    true
}

impl AgentConfig {
    /// Load configuration from the config file and environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load configuration from `path` (if it exists) overlaid with the environment
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("PROTECT")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path.display()))?;

        let config: AgentConfig = config
            .try_deserialize()
            .context("Invalid agent configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the agent cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.panel_url.trim().is_empty() {
            bail!("panel_url is required");
        }
        if self.panel_api_key.trim().is_empty() {
            bail!("panel_api_key is required");
        }
        if self.scan_interval_secs == 0 {
            bail!("scan_interval_secs must be greater than zero");
        }
        if self.max_parallel_scans == 0 {
            bail!("max_parallel_scans must be greater than zero");
        }
        if self.dispatch_max_attempts == 0 {
            bail!("dispatch_max_attempts must be greater than zero");
        }
        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            max_parallel: self.max_parallel_scans,
            container_timeout: Duration::from_secs(self.container_timeout_secs),
            suspended_policy: self.suspended_policy,
        }
    }

    pub fn executor_limits(&self) -> ExecutorLimits {
        ExecutorLimits {
            file_read_cap: self.file_read_cap_bytes,
            log_tail_lines: self.log_tail_lines,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.dispatch_max_attempts,
            initial_backoff: Duration::from_millis(self.dispatch_initial_backoff_ms),
            ..Default::default()
        }
    }
}
