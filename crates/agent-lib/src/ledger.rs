//! Persistent flag ledger
//!
//! The ledger is the single source of truth for "already handled":
//! - One [`FlagRecord`] per container uuid, flag history only ever appended
//! - `suspended` goes false→true through [`FlagLedger::mark_suspended`] and is
//!   only cleared by [`FlagLedger::release`]
//! - Every mutation is read-decide-write under a per-uuid lock and is
//!   persisted (temp file + fsync + rename) before memory is updated
//!
//! A ledger file that cannot be read opens the ledger as unavailable. An
//! unavailable ledger never writes, so a corrupt file is never clobbered;
//! [`FlagLedger::ensure_available`] retries the load.

use crate::error::LedgerError;
use crate::models::{Flag, FlagRecord};
use crate::observability::StructuredLogger;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Outcome of recording a flag set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    FirstDetection,
    RepeatDetectionUnsuspended,
    AlreadySuspended,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::FirstDetection => "first_detection",
            Decision::RepeatDetectionUnsuspended => "repeat_detection_unsuspended",
            Decision::AlreadySuspended => "already_suspended",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable map of container uuid to flag record
pub struct FlagLedger {
    path: PathBuf,
    records: DashMap<String, FlagRecord>,
    key_locks: DashMap<String, Arc<Mutex<()>>>,
    write_lock: Mutex<()>,
    available: AtomicBool,
    last_error: StdMutex<Option<String>>,
    logger: StructuredLogger,
}

impl FlagLedger {
    /// Open the ledger at `path`; a missing file starts an empty ledger
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::open_with_logger(path, StructuredLogger::default())
    }

    /// Open the ledger, reporting degradation through `logger`
    pub fn open_with_logger(path: impl Into<PathBuf>, logger: StructuredLogger) -> Self {
        let ledger = Self {
            path: path.into(),
            records: DashMap::new(),
            key_locks: DashMap::new(),
            write_lock: Mutex::new(()),
            available: AtomicBool::new(false),
            last_error: StdMutex::new(None),
            logger,
        };
        ledger.try_load();
        ledger
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Last load or write error, if the ledger is degraded
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|e| (*e).clone())
    }

    /// Retry loading from disk when unavailable; returns availability
    pub async fn ensure_available(&self) -> bool {
        if self.is_available() {
            return true;
        }
        let _guard = self.write_lock.lock().await;
        if !self.is_available() {
            self.try_load();
        }
        self.is_available()
    }

    /// Record a non-empty flag set for a container
    pub async fn record(
        &self,
        container_uuid: &str,
        server_id: Option<&str>,
        flags: Vec<Flag>,
    ) -> Result<(FlagRecord, Decision), LedgerError> {
        if flags.is_empty() {
            return Err(LedgerError::EmptyFlagSet(container_uuid.to_string()));
        }
        self.check_available()?;

        let lock = self.key_lock(container_uuid);
        let _guard = lock.lock().await;

        let now = Utc::now();
        let (record, decision) = match self.get(container_uuid) {
            None => (
                FlagRecord::new(container_uuid, server_id.map(str::to_string), flags, now),
                Decision::FirstDetection,
            ),
            Some(mut record) => {
                let decision = if record.suspended {
                    Decision::AlreadySuspended
                } else {
                    Decision::RepeatDetectionUnsuspended
                };
                record.flags.extend(flags);
                record.last_action_at = now;
                if let Some(server_id) = server_id {
                    record.server_id = Some(server_id.to_string());
                }
                (record, decision)
            }
        };

        self.commit(record.clone()).await?;
        debug!(
            container_uuid = %container_uuid,
            decision = %decision,
            total_flags = record.flags.len(),
            "Flags recorded"
        );
        Ok((record, decision))
    }

    /// Mark a container suspended; a no-op when it already is
    pub async fn mark_suspended(&self, container_uuid: &str) -> Result<FlagRecord, LedgerError> {
        self.update(container_uuid, |record| {
            if record.suspended {
                return false;
            }
            let now = Utc::now();
            record.suspended = true;
            record.suspended_at = Some(now);
            record.last_action_at = now;
            true
        })
        .await
    }

    /// Remember that alerts for a flag-set digest were delivered
    pub async fn mark_alerted(&self, container_uuid: &str, digest: &str) -> Result<FlagRecord, LedgerError> {
        self.update(container_uuid, |record| {
            if record.has_alerted(digest) {
                return false;
            }
            record.alerted_digests.push(digest.to_string());
            true
        })
        .await
    }

    /// External remediation: clear the suspension, keep the flag history
    pub async fn release(&self, container_uuid: &str) -> Result<FlagRecord, LedgerError> {
        let record = self
            .update(container_uuid, |record| {
                record.suspended = false;
                record.suspended_at = None;
                record.alerted_digests.clear();
                record.last_action_at = Utc::now();
                true
            })
            .await?;
        info!(container_uuid = %container_uuid, "Container released from suspension");
        Ok(record)
    }

    pub fn get(&self, container_uuid: &str) -> Option<FlagRecord> {
        self.records.get(container_uuid).map(|r| r.value().clone())
    }

    /// All records ordered by container uuid
    pub fn list(&self) -> Vec<FlagRecord> {
        let mut records: Vec<FlagRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.container_uuid.cmp(&b.container_uuid));
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_suspended(&self, container_uuid: &str) -> bool {
        self.records
            .get(container_uuid)
            .map_or(false, |r| r.suspended)
    }

    async fn update<F>(&self, container_uuid: &str, mutate: F) -> Result<FlagRecord, LedgerError>
    where
        F: FnOnce(&mut FlagRecord) -> bool,
    {
        self.check_available()?;

        let lock = self.key_lock(container_uuid);
        let _guard = lock.lock().await;

        let mut record = self
            .get(container_uuid)
            .ok_or_else(|| LedgerError::NotFound(container_uuid.to_string()))?;

        if mutate(&mut record) {
            self.commit(record.clone()).await?;
        }
        Ok(record)
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(LedgerError::Unavailable(
                self.last_error()
                    .unwrap_or_else(|| "ledger has not been loaded".to_string()),
            ))
        }
    }

    fn key_lock(&self, container_uuid: &str) -> Arc<Mutex<()>> {
        self.key_locks
            .entry(container_uuid.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Persist the full map with `record` applied, then update memory
    async fn commit(&self, record: FlagRecord) -> Result<(), LedgerError> {
        let _guard = self.write_lock.lock().await;
        self.check_available()?;

        let mut snapshot: BTreeMap<String, FlagRecord> = self
            .records
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        snapshot.insert(record.container_uuid.clone(), record.clone());

        if let Err(e) = self.persist(&snapshot).await {
            self.mark_unavailable(&e);
            return Err(e);
        }

        self.records.insert(record.container_uuid.clone(), record);
        Ok(())
    }

    async fn persist(&self, snapshot: &BTreeMap<String, FlagRecord>) -> Result<(), LedgerError> {
        let bytes = serde_json::to_vec_pretty(snapshot).map_err(LedgerError::Serialize)?;
        let io_err = |source| LedgerError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let temp_path = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&temp_path).await.map_err(io_err)?;
        file.write_all(&bytes).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        drop(file);

        tokio::fs::rename(&temp_path, &self.path).await.map_err(io_err)?;
        Ok(())
    }

    fn try_load(&self) {
        match read_records(&self.path) {
            Ok(records) => {
                let count = records.len();
                self.records.clear();
                for (uuid, mut record) in records {
                    if record.container_uuid.is_empty() {
                        record.container_uuid = uuid.clone();
                    }
                    self.records.insert(uuid, record);
                }
                self.available.store(true, Ordering::SeqCst);
                if let Ok(mut last) = self.last_error.lock() {
                    *last = None;
                }
                info!(path = %self.path.display(), records = count, "Flag ledger loaded");
            }
            Err(e) => self.mark_unavailable(&e),
        }
    }

    fn mark_unavailable(&self, error: &LedgerError) {
        self.available.store(false, Ordering::SeqCst);
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(error.to_string());
        }
        self.logger.log_ledger_degraded(&self.path, &error.to_string());
    }
}

/// One value of the ledger map as found on disk
///
/// Older ledgers stored a bare `true` per handled container.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Record(FlagRecord),
    Handled(bool),
}

fn read_records(path: &Path) -> Result<BTreeMap<String, FlagRecord>, LedgerError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(source) => {
            return Err(LedgerError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if contents.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let entries: BTreeMap<String, StoredEntry> =
        serde_json::from_str(&contents).map_err(|source| LedgerError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;

    let now = Utc::now();
    let mut records = BTreeMap::new();
    for (uuid, entry) in entries {
        match entry {
            StoredEntry::Record(record) => {
                records.insert(uuid, record);
            }
            StoredEntry::Handled(true) => {
                let record = FlagRecord::handled(&uuid, now);
                records.insert(uuid, record);
            }
            StoredEntry::Handled(false) => {
                debug!(container_uuid = %uuid, "Ignoring unhandled legacy ledger entry");
            }
        }
    }
    Ok(records)
}
