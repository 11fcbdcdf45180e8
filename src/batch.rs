//! Bulk uploads and task creation driven by a CSV manifest

use std::path::PathBuf;

use thiserror::Error;

/// CSV manifest parsing and per-row path resolution
pub mod manifest;

/// Run report and the three output ledgers
pub mod report;

/// Event sink for progress reporting
pub mod observer;

/// The batch state machine
pub mod orchestrator;

/// Errors that abort a whole batch run
///
/// Anything that goes wrong for a single row is recorded in the report instead.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("malformed manifest: {0}")]
    MalformedManifest(String),
    #[error("can't read manifest {path}: {source}")]
    ManifestRead { path: PathBuf, source: csv::Error },
    #[error("no upload ledger at {0}, run an upload batch first")]
    MissingLedger(PathBuf),
    #[error("can't load upload ledger {path}: {source}")]
    LedgerRead { path: PathBuf, source: anyhow::Error },
    #[error("can't write {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },
    #[error("can't serialise results: {0}")]
    Serialise(#[from] serde_json::Error),
}
