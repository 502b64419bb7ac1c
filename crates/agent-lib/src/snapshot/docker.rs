//! Docker-backed snapshot provider
//!
//! Containers are the directories under the volumes directory, each named
//! after its container. Runtime views come from the Docker API:
//! - Log tail from `logs`
//! - Process table from `top` (`ps aux` columns)
//! - Network counters from one-shot `stats`
//!
//! A failing runtime view leaves that field `None`; only a missing volume or
//! container makes the whole snapshot unavailable.

use super::{list_volume_containers, CounterHistory, SnapshotProvider};
use crate::error::SnapshotUnavailable;
use crate::models::{ContainerSnapshot, CounterSample, ProcessInfo};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{InspectContainerOptions, LogsOptions, StatsOptions, TopOptions};
use bollard::errors::Error as BollardError;
use bollard::Docker;
use chrono::Utc;
use std::path::PathBuf;
use tokio_stream::StreamExt;
use tracing::debug;

pub struct DockerSnapshotProvider {
    docker: Docker,
    volumes_dir: PathBuf,
    log_tail_lines: usize,
    history: CounterHistory,
}

impl DockerSnapshotProvider {
    /// Connect to the local Docker daemon
    pub fn connect(volumes_dir: impl Into<PathBuf>, log_tail_lines: usize) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().context("Failed to connect to Docker daemon")?;
        Ok(Self::with_client(docker, volumes_dir, log_tail_lines))
    }

    pub fn with_client(docker: Docker, volumes_dir: impl Into<PathBuf>, log_tail_lines: usize) -> Self {
        Self {
            docker,
            volumes_dir: volumes_dir.into(),
            log_tail_lines,
            history: CounterHistory::default(),
        }
    }

    async fn log_tail(&self, container_uuid: &str) -> Option<Vec<String>> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: self.log_tail_lines.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.logs(container_uuid, Some(options));
        let mut output = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(log) => output.push_str(&log.to_string()),
                Err(e) => {
                    debug!(container_uuid = %container_uuid, error = %e, "Log tail unavailable");
                    return None;
                }
            }
        }

        Some(output.lines().map(str::to_string).collect())
    }

    async fn processes(&self, container_uuid: &str) -> Option<Vec<ProcessInfo>> {
        let options = TopOptions { ps_args: "aux" };
        match self.docker.top_processes(container_uuid, Some(options)).await {
            Ok(top) => Some(parse_top(
                top.titles.as_deref().unwrap_or_default(),
                top.processes.as_deref().unwrap_or_default(),
            )),
            Err(e) => {
                debug!(container_uuid = %container_uuid, error = %e, "Process table unavailable");
                None
            }
        }
    }

    async fn network_sample(&self, container_uuid: &str) -> Option<CounterSample> {
        let options = StatsOptions {
            stream: false,
            one_shot: true,
        };

        let mut stream = self.docker.stats(container_uuid, Some(options));
        match stream.next().await {
            Some(Ok(stats)) => {
                let (rx_bytes, tx_bytes) = stats
                    .networks
                    .unwrap_or_default()
                    .values()
                    .fold((0u64, 0u64), |(rx, tx), net| {
                        (rx.saturating_add(net.rx_bytes), tx.saturating_add(net.tx_bytes))
                    });
                Some(CounterSample {
                    at: Utc::now(),
                    rx_bytes,
                    tx_bytes,
                })
            }
            Some(Err(e)) => {
                debug!(container_uuid = %container_uuid, error = %e, "Network stats unavailable");
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl SnapshotProvider for DockerSnapshotProvider {
    async fn list_containers(&self) -> Result<Vec<String>> {
        let uuids = list_volume_containers(&self.volumes_dir)?;
        self.history.retain(&uuids.iter().cloned().collect());
        Ok(uuids)
    }

    async fn snapshot(&self, container_uuid: &str) -> Result<ContainerSnapshot, SnapshotUnavailable> {
        let volume_root = self.volumes_dir.join(container_uuid);
        if !volume_root.is_dir() {
            return Err(SnapshotUnavailable::new(container_uuid, "volume directory missing"));
        }

        match self
            .docker
            .inspect_container(container_uuid, None::<InspectContainerOptions>)
            .await
        {
            Ok(_) => {}
            Err(BollardError::DockerResponseServerError { status_code: 404, .. }) => {
                return Err(SnapshotUnavailable::new(container_uuid, "container not found"));
            }
            Err(e) => return Err(SnapshotUnavailable::new(container_uuid, e.to_string())),
        }

        let mut snapshot = ContainerSnapshot::new(container_uuid, volume_root);
        snapshot.log_tail = self.log_tail(container_uuid).await;
        snapshot.processes = self.processes(container_uuid).await;
        snapshot.network = self
            .network_sample(container_uuid)
            .await
            .map(|sample| self.history.record(container_uuid, sample));

        Ok(snapshot)
    }
}

/// Extract pid, command and CPU% from `top` output, locating columns by title
pub fn parse_top(titles: &[String], rows: &[Vec<String>]) -> Vec<ProcessInfo> {
    let column = |names: &[&str]| titles.iter().position(|t| names.contains(&t.as_str()));

    let (Some(pid_col), Some(cpu_col), Some(cmd_col)) = (
        column(&["PID"]),
        column(&["%CPU", "C"]),
        column(&["COMMAND", "CMD"]),
    ) else {
        return Vec::new();
    };

    rows.iter()
        .filter_map(|row| {
            let pid = row.get(pid_col)?.trim().parse().ok()?;
            let cpu_percent = row.get(cpu_col)?.trim().parse().ok()?;
            let name = row.get(cmd_col)?.trim().to_string();
            Some(ProcessInfo {
                pid,
                name,
                cpu_percent,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_ps_aux_columns() {
        let titles = strings(&[
            "USER", "PID", "%CPU", "%MEM", "VSZ", "RSS", "TTY", "STAT", "START", "TIME", "COMMAND",
        ]);
        let rows = vec![
            strings(&[
                "container", "12", "3.5", "10.0", "1", "1", "?", "Ssl", "10:00", "0:01", "java -jar server.jar",
            ]),
            strings(&["container", "57", "97.2", "1.0", "1", "1", "?", "R", "10:05", "9:59", "./xmrig"]),
        ];

        let processes = parse_top(&titles, &rows);
        assert_eq!(processes.len(), 2);
        assert_eq!(processes[1].pid, 57);
        assert_eq!(processes[1].name, "./xmrig");
        assert!((processes[1].cpu_percent - 97.2).abs() < 1e-9);
    }

    #[test]
    fn test_parse_default_ps_columns() {
        let titles = strings(&["UID", "PID", "PPID", "C", "STIME", "TTY", "TIME", "CMD"]);
        let rows = vec![strings(&["1000", "5", "1", "88", "10:00", "?", "00:10:00", "minerd"])];

        let processes = parse_top(&titles, &rows);
        assert_eq!(processes[0].name, "minerd");
        assert_eq!(processes[0].cpu_percent, 88.0);
    }

    #[test]
    fn test_parse_skips_malformed_rows() {
        let titles = strings(&["PID", "%CPU", "COMMAND"]);
        let rows = vec![strings(&["x", "1.0", "a"]), strings(&["2"]), strings(&["3", "4.0", "b"])];

        let processes = parse_top(&titles, &rows);
        assert_eq!(processes.len(), 1);
        assert_eq!(processes[0].pid, 3);
    }

    #[test]
    fn test_parse_missing_columns() {
        let titles = strings(&["PID", "COMMAND"]);
        assert!(parse_top(&titles, &[strings(&["1", "x"])]).is_empty());
    }
}
