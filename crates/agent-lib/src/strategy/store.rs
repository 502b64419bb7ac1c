//! Strategy loading and the process-wide active strategy set
//!
//! Every rule file is parsed independently: a malformed file is reported and
//! skipped while the remaining files still load. Reloading swaps the whole set
//! behind a lock, so readers always hold one complete set.

use super::Strategy;
use crate::error::ParseError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

/// File extensions recognised as strategy files
const STRATEGY_EXTENSIONS: &[&str] = &["protect", "json"];

/// Result of loading a strategy directory
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Valid strategies in file-name order
    pub strategies: Vec<Strategy>,
    /// One entry per rejected file
    pub errors: Vec<ParseError>,
}

/// Immutable set of strategies active for evaluation
#[derive(Debug, Clone)]
pub struct StrategySet {
    strategies: Vec<Strategy>,
    loaded_at: DateTime<Utc>,
}

impl StrategySet {
    pub fn new(strategies: Vec<Strategy>) -> Self {
        Self {
            strategies,
            loaded_at: Utc::now(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Strategy> {
        self.strategies.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Strategy> {
        self.strategies.iter().find(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

/// Outcome of a store reload, suitable for API responses
#[derive(Debug, Clone, Serialize)]
pub struct ReloadSummary {
    pub loaded: usize,
    pub errors: Vec<String>,
    /// False when the directory itself could not be read and the previous set was kept
    pub replaced: bool,
}

/// Parse and validate one strategy file's contents
pub fn parse_strategy(path: &Path, contents: &str) -> Result<Strategy, ParseError> {
    let strategy: Strategy = serde_json::from_str(contents).map_err(|source| ParseError::Syntax {
        path: path.to_path_buf(),
        source,
    })?;

    strategy.validate().map_err(|reason| ParseError::Invalid {
        path: path.to_path_buf(),
        reason,
    })?;

    Ok(strategy)
}

/// Load every strategy file in `dir`
///
/// Fails only when the directory itself cannot be listed; per-file problems
/// are collected in [`LoadReport::errors`].
pub fn load(dir: &Path) -> Result<LoadReport, ParseError> {
    let io_err = |source| ParseError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let is_strategy = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| STRATEGY_EXTENSIONS.contains(&e))
            .unwrap_or(false);
        if is_strategy && path.is_file() {
            files.push(path);
        }
    }
    files.sort();

    let mut report = LoadReport::default();
    let mut names = HashSet::new();

    for path in files {
        let parsed = std::fs::read_to_string(&path)
            .map_err(|source| ParseError::Io {
                path: path.clone(),
                source,
            })
            .and_then(|contents| parse_strategy(&path, &contents));

        match parsed {
            Ok(strategy) if !names.insert(strategy.name.clone()) => {
                report.errors.push(ParseError::Duplicate {
                    path,
                    name: strategy.name,
                });
            }
            Ok(strategy) => {
                info!(
                    strategy = %strategy.name,
                    checks = strategy.checks.len(),
                    file = %path.display(),
                    "Loaded strategy"
                );
                report.strategies.push(strategy);
            }
            Err(e) => report.errors.push(e),
        }
    }

    for error in &report.errors {
        warn!(file = %error.path().display(), error = %error, "Skipping strategy file");
    }

    Ok(report)
}

/// Owner of the active strategy set
pub struct StrategyStore {
    dir: PathBuf,
    current: RwLock<Arc<StrategySet>>,
}

impl StrategyStore {
    /// Create an empty store bound to a strategy directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            current: RwLock::new(Arc::new(StrategySet::empty())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The current complete strategy set
    pub fn current(&self) -> Arc<StrategySet> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the active set wholesale
    pub fn replace(&self, set: StrategySet) {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = Arc::new(set);
    }

    /// Re-read the strategy directory and swap in the new set
    pub fn reload(&self) -> ReloadSummary {
        match load(&self.dir) {
            Ok(report) => {
                let loaded = report.strategies.len();
                let errors = report.errors.iter().map(|e| e.to_string()).collect();
                if loaded == 0 {
                    warn!(dir = %self.dir.display(), "No valid strategies loaded");
                }
                self.replace(StrategySet::new(report.strategies));
                info!(dir = %self.dir.display(), loaded, "Strategy set replaced");
                ReloadSummary {
                    loaded,
                    errors,
                    replaced: true,
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to read strategy directory, keeping previous set");
                ReloadSummary {
                    loaded: self.current().len(),
                    errors: vec![e.to_string()],
                    replaced: false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const MINER: &str = r#"{"name": "miner", "type": "cryptomining",
        "checks": [{"type": "process_check", "cpu_threshold": 90}]}"#;
    const MALWARE: &str = r#"{"name": "malware", "type": "malware",
        "checks": [
            {"type": "file_existence", "path": "/malware.sh"},
            {"type": "file_content", "path": "start.sh", "patterns": ["xmrig"]}
        ]}"#;

    fn write(dir: &TempDir, name: &str, contents: &str) {
        fs::write(dir.path().join(name), contents).unwrap();
    }

    #[test]
    fn test_load_valid_and_malformed() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a_miner.protect", MINER);
        write(&dir, "b_broken.protect", "{ not json");
        write(&dir, "c_malware.json", MALWARE);
        write(&dir, "d_unknown.protect", r#"{"name": "u", "type": "t", "checks": [{"type": "magic"}]}"#);
        write(&dir, "notes.txt", "ignored");

        let report = load(dir.path()).unwrap();

        let names: Vec<&str> = report.strategies.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["miner", "malware"]);
        assert_eq!(report.strategies[0].checks.len(), 1);
        assert_eq!(report.strategies[1].checks.len(), 2);
        assert_eq!(report.errors.len(), 2);
        assert!(report
            .errors
            .iter()
            .any(|e| e.path().ends_with("b_broken.protect")));
    }

    #[test]
    fn test_duplicate_names_keep_first() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.protect", MINER);
        write(&dir, "b.protect", MINER);

        let report = load(dir.path()).unwrap();

        assert_eq!(report.strategies.len(), 1);
        assert!(matches!(report.errors[0], ParseError::Duplicate { .. }));
    }

    #[test]
    fn test_missing_fields_rejected() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.protect", r#"{"name": "x", "checks": []}"#);
        write(&dir, "b.protect", r#"{"name": "", "type": "t", "checks": []}"#);

        let report = load(dir.path()).unwrap();

        assert!(report.strategies.is_empty());
        assert_eq!(report.errors.len(), 2);
    }

    #[test]
    fn test_load_missing_directory() {
        let result = load(Path::new("/nonexistent/protect/strategies"));
        assert!(matches!(result, Err(ParseError::Io { .. })));
    }

    #[test]
    fn test_store_reload_replaces_whole_set() {
        let dir = TempDir::new().unwrap();
        write(&dir, "miner.protect", MINER);

        let store = StrategyStore::new(dir.path());
        assert!(store.current().is_empty());

        let summary = store.reload();
        assert_eq!(summary.loaded, 1);
        assert!(summary.replaced);
        let first = store.current();
        assert!(first.get("miner").is_some());

        fs::remove_file(dir.path().join("miner.protect")).unwrap();
        write(&dir, "malware.protect", MALWARE);
        store.reload();

        let second = store.current();
        assert!(second.get("miner").is_none());
        assert!(second.get("malware").is_some());
        // Readers holding the old set still see it complete
        assert_eq!(first.len(), 1);
        assert!(first.get("miner").is_some());
    }

    #[test]
    fn test_store_keeps_set_when_directory_vanishes() {
        let dir = TempDir::new().unwrap();
        write(&dir, "miner.protect", MINER);
        let path = dir.path().to_path_buf();

        let store = StrategyStore::new(&path);
        store.reload();
        drop(dir);

        let summary = store.reload();
        assert!(!summary.replaced);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(store.current().len(), 1);
    }
}
