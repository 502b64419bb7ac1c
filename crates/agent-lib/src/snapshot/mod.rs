//! Container snapshots
//!
//! A snapshot is assembled once per container per scan cycle and is the only
//! input the evaluator sees. Providers enumerate containers and build
//! snapshots; [`DockerSnapshotProvider`] reads volumes from disk and the
//! runtime views from the Docker API.

mod docker;

pub use docker::{parse_top, DockerSnapshotProvider};

use crate::error::SnapshotUnavailable;
use crate::models::{ContainerSnapshot, CounterSample, NetworkCounters};
use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashSet, VecDeque};
use std::path::Path;

const DEFAULT_HISTORY_SAMPLES: usize = 16;

/// Source of containers and their snapshots
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// Container uuids to scan this cycle
    async fn list_containers(&self) -> Result<Vec<String>>;

    /// Build the snapshot for one container
    async fn snapshot(&self, container_uuid: &str) -> Result<ContainerSnapshot, SnapshotUnavailable>;
}

/// Container uuids taken from the directory names under `volumes_dir`
pub fn list_volume_containers(volumes_dir: &Path) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(volumes_dir)
        .with_context(|| format!("Failed to read volumes directory {}", volumes_dir.display()))?;

    let mut uuids: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .filter(|name| !name.starts_with('.'))
        .collect();
    uuids.sort();
    Ok(uuids)
}

/// Bounded per-container history of network counter samples
#[derive(Debug)]
pub struct CounterHistory {
    samples: DashMap<String, VecDeque<CounterSample>>,
    max_samples: usize,
}

impl Default for CounterHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SAMPLES)
    }
}

impl CounterHistory {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: DashMap::new(),
            max_samples: max_samples.max(2),
        }
    }

    /// Append a sample and return the container's history, oldest first
    ///
    /// A sample lower than the previous one means the counters were reset
    /// (container restart); older samples are discarded.
    pub fn record(&self, container_uuid: &str, sample: CounterSample) -> NetworkCounters {
        let mut history = self.samples.entry(container_uuid.to_string()).or_default();

        if history.back().map_or(false, |last| sample.total() < last.total()) {
            history.clear();
        }
        history.push_back(sample);
        while history.len() > self.max_samples {
            history.pop_front();
        }

        NetworkCounters {
            samples: history.iter().copied().collect(),
        }
    }

    /// Forget containers that no longer exist
    pub fn retain(&self, live: &HashSet<String>) {
        self.samples.retain(|uuid, _| live.contains(uuid));
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
