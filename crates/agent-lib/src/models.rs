//! Core data models for the detection engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The fixed set of check variants a strategy may contain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    FileExistence,
    FileContent,
    FileSize,
    Dependency,
    LogContent,
    ProcessCheck,
    NetworkUsage,
}

impl CheckType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckType::FileExistence => "file_existence",
            CheckType::FileContent => "file_content",
            CheckType::FileSize => "file_size",
            CheckType::Dependency => "dependency",
            CheckType::LogContent => "log_content",
            CheckType::ProcessCheck => "process_check",
            CheckType::NetworkUsage => "network_usage",
        }
    }
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A process observed inside a container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
}

/// Cumulative network byte counters at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSample {
    pub at: DateTime<Utc>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

impl CounterSample {
    pub fn total(&self) -> u64 {
        self.rx_bytes.saturating_add(self.tx_bytes)
    }
}

/// Recent network counter history, oldest sample first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkCounters {
    pub samples: Vec<CounterSample>,
}

impl NetworkCounters {
    pub fn latest(&self) -> Option<&CounterSample> {
        self.samples.last()
    }
}

/// Read-only view of one container, assembled once per scan cycle
#[derive(Debug, Clone)]
pub struct ContainerSnapshot {
    pub container_uuid: String,
    /// Root of the container's mounted volume on the host
    pub volume_root: PathBuf,
    /// Most recent log lines, `None` when logs could not be read
    pub log_tail: Option<Vec<String>>,
    /// Process table, `None` when it could not be read
    pub processes: Option<Vec<ProcessInfo>>,
    /// Network counter history, `None` when stats could not be read
    pub network: Option<NetworkCounters>,
    pub captured_at: DateTime<Utc>,
}

impl ContainerSnapshot {
    /// Snapshot with only a volume root; runtime views are unavailable
    pub fn new(container_uuid: impl Into<String>, volume_root: impl Into<PathBuf>) -> Self {
        Self {
            container_uuid: container_uuid.into(),
            volume_root: volume_root.into(),
            log_tail: None,
            processes: None,
            network: None,
            captured_at: Utc::now(),
        }
    }

    pub fn with_logs(mut self, lines: Vec<String>) -> Self {
        self.log_tail = Some(lines);
        self
    }

    pub fn with_processes(mut self, processes: Vec<ProcessInfo>) -> Self {
        self.processes = Some(processes);
        self
    }

    pub fn with_network(mut self, network: NetworkCounters) -> Self {
        self.network = Some(network);
        self
    }
}

/// What a check observed when it matched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Evidence {
    FileExistence {
        path: String,
        /// Entry that matched one of the check's glob patterns
        matched: Option<String>,
        present: bool,
    },
    ContentMatch {
        path: String,
        pattern: String,
        offset: u64,
        sha256: Option<String>,
    },
    Digest {
        path: String,
        sha256: String,
    },
    FileSize {
        path: String,
        size: u64,
        threshold: u64,
    },
    Dependency {
        manifest: String,
        dependency: String,
        pattern: String,
    },
    LogLine {
        pattern: String,
        line: String,
    },
    Processes {
        processes: Vec<ProcessInfo>,
        threshold: f64,
    },
    NetworkRate {
        bytes_per_sec: f64,
        window_secs: u64,
        total_bytes: u64,
        threshold: u64,
    },
}

impl Evidence {
    /// What was detected, without the measurements taken this cycle
    ///
    /// Two observations of the same process, file or pattern share an
    /// identity even when CPU, sizes or rates differ.
    pub fn identity(&self) -> String {
        match self {
            Evidence::FileExistence { path, matched, present } => {
                format!("{}|{}|{}", path, matched.as_deref().unwrap_or(""), present)
            }
            Evidence::ContentMatch { path, pattern, offset, .. } => format!("{}|{}|{}", path, pattern, offset),
            Evidence::Digest { path, sha256 } => format!("{}|{}", path, sha256),
            Evidence::FileSize { path, threshold, .. } => format!("{}|{}", path, threshold),
            Evidence::Dependency { manifest, dependency, .. } => format!("{}|{}", manifest, dependency),
            Evidence::LogLine { pattern, .. } => pattern.clone(),
            Evidence::Processes { processes, .. } => {
                let mut ids: Vec<String> = processes.iter().map(|p| format!("{}:{}", p.pid, p.name)).collect();
                ids.sort();
                ids.join(",")
            }
            Evidence::NetworkRate { threshold, .. } => threshold.to_string(),
        }
    }
}

impl fmt::Display for Evidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Evidence::FileExistence {
                path,
                matched,
                present,
            } => {
                let state = if *present { "present" } else { "absent" };
                match matched {
                    Some(entry) => write!(f, "{} {} in {}", entry, state, path),
                    None => write!(f, "{} {}", path, state),
                }
            }
            Evidence::ContentMatch {
                path,
                pattern,
                offset,
                sha256,
            } => {
                write!(f, "'{}' in {} at byte {}", pattern, path, offset)?;
                if let Some(digest) = sha256 {
                    write!(f, " (sha256 {})", digest)?;
                }
                Ok(())
            }
            Evidence::Digest { path, sha256 } => write!(f, "{} sha256 {}", path, sha256),
            Evidence::FileSize {
                path,
                size,
                threshold,
            } => write!(f, "{} is {} bytes (threshold {})", path, size, threshold),
            Evidence::Dependency {
                manifest,
                dependency,
                pattern,
            } => write!(f, "{} in {} matches '{}'", dependency, manifest, pattern),
            Evidence::LogLine { pattern, line } => write!(f, "'{}' in log: {}", pattern, line),
            Evidence::Processes {
                processes,
                threshold,
            } => {
                let listed: Vec<String> = processes
                    .iter()
                    .map(|p| format!("{} (pid {}) {:.1}%", p.name, p.pid, p.cpu_percent))
                    .collect();
                write!(f, "{} above {:.1}% CPU", listed.join(", "), threshold)
            }
            Evidence::NetworkRate {
                bytes_per_sec,
                window_secs,
                threshold,
                ..
            } => write!(
                f,
                "{:.0} B/s over {}s (threshold {} B/s)",
                bytes_per_sec, window_secs, threshold
            ),
        }
    }
}

/// Evidence that one check of one strategy matched; immutable once created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    pub strategy_name: String,
    pub check_type: CheckType,
    pub message: String,
    pub evidence: Evidence,
    pub detected_at: DateTime<Utc>,
}

/// Persisted per-container accumulation of flags and suspension state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagRecord {
    pub container_uuid: String,
    pub server_id: Option<String>,
    pub flags: Vec<Flag>,
    pub first_detected_at: DateTime<Utc>,
    pub last_action_at: DateTime<Utc>,
    pub suspended: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspended_at: Option<DateTime<Utc>>,
    /// Content digests of flag sets already alerted on
    #[serde(default)]
    pub alerted_digests: Vec<String>,
}

impl FlagRecord {
    pub fn new(
        container_uuid: impl Into<String>,
        server_id: Option<String>,
        flags: Vec<Flag>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            container_uuid: container_uuid.into(),
            server_id,
            flags,
            first_detected_at: now,
            last_action_at: now,
            suspended: false,
            suspended_at: None,
            alerted_digests: Vec::new(),
        }
    }

    /// A container handled and suspended before flag history was kept
    pub fn handled(container_uuid: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            suspended: true,
            suspended_at: Some(now),
            ..Self::new(container_uuid, None, Vec::new(), now)
        }
    }

    pub fn has_alerted(&self, digest: &str) -> bool {
        self.alerted_digests.iter().any(|d| d == digest)
    }
}
