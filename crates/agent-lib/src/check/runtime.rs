//! Runtime checks over the snapshot's log, process and network views

use crate::error::CheckFault;
use crate::models::{Evidence, NetworkCounters, ProcessInfo};
use crate::strategy::MatchMode;
use chrono::Duration;
use regex::Regex;

// Upper bound for a rate window, keeps the chrono arithmetic in range
const MAX_WINDOW_SECS: i64 = 365 * 24 * 3600;

pub(super) fn log_content(
    log_tail: Option<&[String]>,
    patterns: &[String],
    mode: MatchMode,
    max_lines: usize,
) -> Result<Option<Evidence>, CheckFault> {
    let Some(lines) = log_tail else {
        return Ok(None);
    };
    let lines = &lines[lines.len().saturating_sub(max_lines)..];

    for pattern in patterns.iter().filter(|p| !p.is_empty()) {
        let hit = match mode {
            MatchMode::Substring => {
                let needle = pattern.to_lowercase();
                lines.iter().find(|line| line.to_lowercase().contains(&needle))
            }
            MatchMode::Regex => {
                let re = Regex::new(pattern).map_err(|source| CheckFault::Pattern {
                    pattern: pattern.clone(),
                    source,
                })?;
                lines.iter().find(|line| re.is_match(line))
            }
        };

        if let Some(line) = hit {
            return Ok(Some(Evidence::LogLine {
                pattern: pattern.clone(),
                line: line.clone(),
            }));
        }
    }

    Ok(None)
}

pub(super) fn process_check(processes: Option<&[ProcessInfo]>, threshold: f64) -> Option<Evidence> {
    let offenders: Vec<ProcessInfo> = processes?
        .iter()
        .filter(|p| p.cpu_percent > threshold)
        .cloned()
        .collect();

    (!offenders.is_empty()).then(|| Evidence::Processes {
        processes: offenders,
        threshold,
    })
}

/// Flags when the combined rx+tx rate over the window exceeds `threshold` B/s
///
/// The baseline is the newest sample at least `window_secs` older than the
/// latest one, or the oldest sample when history is shorter than the window.
/// Fewer than two samples or a counter reset yields no flag.
pub(super) fn network_usage(
    network: Option<&NetworkCounters>,
    threshold: u64,
    window_secs: u64,
) -> Option<Evidence> {
    let samples = &network?.samples;
    let latest = samples.last()?;

    let window = i64::try_from(window_secs).unwrap_or(MAX_WINDOW_SECS).min(MAX_WINDOW_SECS);
    let cutoff = latest.at - Duration::seconds(window);

    let baseline = samples
        .iter()
        .rev()
        .skip(1)
        .find(|s| s.at <= cutoff)
        .or_else(|| samples.first().filter(|s| s.at < latest.at))?;

    let elapsed = (latest.at - baseline.at).num_milliseconds() as f64 / 1000.0;
    if elapsed <= 0.0 || latest.total() < baseline.total() {
        return None;
    }

    let bytes_per_sec = (latest.total() - baseline.total()) as f64 / elapsed;
    (bytes_per_sec > threshold as f64).then(|| Evidence::NetworkRate {
        bytes_per_sec,
        window_secs: elapsed.round() as u64,
        total_bytes: latest.total(),
        threshold,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CounterSample;
    use chrono::{TimeZone, Utc};

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    fn sample(secs: i64, rx: u64, tx: u64) -> CounterSample {
        CounterSample {
            at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            rx_bytes: rx,
            tx_bytes: tx,
        }
    }

    #[test]
    fn test_log_content_case_insensitive() {
        let tail = lines(&["[INFO] Done (3.2s)!", "[WARN] XMRig miner started"]);
        let patterns = vec!["xmrig".to_string()];
        let evidence = log_content(Some(&tail), &patterns, MatchMode::Substring, 1000)
            .unwrap()
            .unwrap();
        assert_eq!(
            evidence,
            Evidence::LogLine {
                pattern: "xmrig".to_string(),
                line: "[WARN] XMRig miner started".to_string(),
            }
        );
    }

    #[test]
    fn test_log_content_only_considers_tail() {
        let tail = lines(&["xmrig", "a", "b"]);
        let patterns = vec!["xmrig".to_string()];
        assert!(log_content(Some(&tail), &patterns, MatchMode::Substring, 2)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_log_content_unavailable_logs() {
        let patterns = vec!["xmrig".to_string()];
        assert!(log_content(None, &patterns, MatchMode::Substring, 1000)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_log_content_regex() {
        let tail = lines(&["connecting to pool.minexmr.com:4444"]);
        let patterns = vec![r"pool\.\w+\.com:\d+".to_string()];
        assert!(log_content(Some(&tail), &patterns, MatchMode::Regex, 1000)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_process_check_lists_all_offenders() {
        let processes = vec![
            ProcessInfo {
                pid: 1,
                name: "java".to_string(),
                cpu_percent: 40.0,
            },
            ProcessInfo {
                pid: 2,
                name: "xmrig".to_string(),
                cpu_percent: 95.0,
            },
            ProcessInfo {
                pid: 3,
                name: "minerd".to_string(),
                cpu_percent: 91.0,
            },
        ];

        match process_check(Some(&processes), 90.0).unwrap() {
            Evidence::Processes { processes, .. } => {
                let names: Vec<_> = processes.iter().map(|p| p.name.as_str()).collect();
                assert_eq!(names, vec!["xmrig", "minerd"]);
            }
            other => panic!("unexpected evidence {:?}", other),
        }

        assert!(process_check(Some(&processes), 99.0).is_none());
        assert!(process_check(None, 0.0).is_none());
    }

    #[test]
    fn test_network_rate_over_window() {
        let counters = NetworkCounters {
            samples: vec![sample(0, 0, 0), sample(30, 1_000, 1_000), sample(60, 60_000, 60_000)],
        };

        match network_usage(Some(&counters), 1_000, 60).unwrap() {
            Evidence::NetworkRate {
                bytes_per_sec,
                window_secs,
                total_bytes,
                ..
            } => {
                assert!((bytes_per_sec - 2_000.0).abs() < f64::EPSILON);
                assert_eq!(window_secs, 60);
                assert_eq!(total_bytes, 120_000);
            }
            other => panic!("unexpected evidence {:?}", other),
        }

        assert!(network_usage(Some(&counters), 5_000, 60).is_none());
    }

    #[test]
    fn test_network_needs_two_samples() {
        let counters = NetworkCounters {
            samples: vec![sample(0, 10_000_000, 10_000_000)],
        };
        assert!(network_usage(Some(&counters), 0, 60).is_none());
        assert!(network_usage(None, 0, 60).is_none());
    }

    #[test]
    fn test_network_counter_reset_yields_none() {
        let counters = NetworkCounters {
            samples: vec![sample(0, 5_000_000, 0), sample(60, 100, 0)],
        };
        assert!(network_usage(Some(&counters), 0, 60).is_none());
    }
}
