//! Error taxonomy for the detection engine
//!
//! Each error kind maps to one isolation unit:
//! - `ParseError` skips a strategy file
//! - `CheckFault` skips a single check
//! - `SnapshotUnavailable` skips a container for the cycle
//! - `DispatchError` leaves the container unsuspended for the next cycle
//! - `LedgerError` disables suspension until the ledger recovers

use std::path::{Path, PathBuf};
use thiserror::Error;

/// A strategy file (or the strategy directory) could not be loaded
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed strategy file {}: {source}", path.display())]
    Syntax {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid strategy in {}: {reason}", path.display())]
    Invalid { path: PathBuf, reason: String },

    #[error("duplicate strategy name '{name}' in {}", path.display())]
    Duplicate { path: PathBuf, name: String },
}

impl ParseError {
    /// File (or directory) the error refers to
    pub fn path(&self) -> &Path {
        match self {
            ParseError::Io { path, .. }
            | ParseError::Syntax { path, .. }
            | ParseError::Invalid { path, .. }
            | ParseError::Duplicate { path, .. } => path,
        }
    }
}

/// A single check could not be evaluated
#[derive(Debug, Error)]
pub enum CheckFault {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("path '{0}' escapes the volume root")]
    PathEscape(String),

    #[error("check requires a path")]
    MissingPath,

    #[error("malformed manifest {}: {reason}", path.display())]
    Manifest { path: PathBuf, reason: String },
}

/// The runtime could not produce a snapshot for a container this cycle
#[derive(Debug, Error)]
#[error("snapshot unavailable for container {container_uuid}: {reason}")]
pub struct SnapshotUnavailable {
    pub container_uuid: String,
    pub reason: String,
}

impl SnapshotUnavailable {
    pub fn new(container_uuid: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            container_uuid: container_uuid.into(),
            reason: reason.into(),
        }
    }
}

/// A panel or webhook call failed
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("request to {target} failed: {source}")]
    Transport {
        target: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{target} responded with status {status}")]
    Status { target: String, status: u16 },

    #[error("invalid response from {target}: {reason}")]
    InvalidResponse { target: String, reason: String },
}

/// The persistent flag ledger could not be read or written
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger file {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize ledger: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("ledger is unavailable: {0}")]
    Unavailable(String),

    #[error("no flags to record for container {0}")]
    EmptyFlagSet(String),

    #[error("no flag record for container {0}")]
    NotFound(String),
}
