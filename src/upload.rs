//! Single file uploads and the run-scoped upload ledger

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::error::TransportError;
use crate::api::transport::{Operation, RetryingTransport};

pub static SUPPORTED_EXTENSIONS: [&str; 4] = [".vcf", ".vcf.gz", ".pdf", ".txt"];

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("unsupported file type {extension:?} for {path}, supported types: {}", SUPPORTED_EXTENSIONS.join(", "))]
    UnsupportedFileType { path: PathBuf, extension: String },
    #[error("file not found or unreadable: {0}")]
    FileNotFound(PathBuf),
    #[error("upload of {path} failed: {source}")]
    Transport { path: PathBuf, source: TransportError },
    #[error("upload of {path} returned no upload_path: {body}")]
    MalformedResponse { path: PathBuf, body: String },
}

impl UploadError {
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::UnsupportedFileType { .. } => "UnsupportedFileType",
            UploadError::FileNotFound(_) => "FileNotFound",
            UploadError::Transport { .. } => "TransportError",
            UploadError::MalformedResponse { .. } => "MalformedResponse",
        }
    }
}

/// Mapping from local file name to the remote path the API stored it under
///
/// Entries are never overwritten, a name that is already present is served from the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadLedger {
    entries: BTreeMap<String, String>,
}

impl UploadLedger {
    /// Ledger key for a local path
    pub fn key(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    pub fn get(&self, path: &Path) -> Option<&str> {
        self.entries.get(&Self::key(path)).map(String::as_str)
    }

    /// Record a remote path, returning false (and keeping the old entry) if the key exists
    pub fn record(&mut self, path: &Path, remote: String) -> bool {
        let key = Self::key(path);
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, remote);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load a ledger written by an earlier run (`upload_results.json`)
    pub fn load(path: &Path) -> anyhow::Result<UploadLedger> {
        info!("Loading upload ledger from {}", path.display());
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Extension used for the supported type check, `.gz` keeps the extension before it
pub fn file_extension(path: &Path) -> String {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let Some((stem, ext)) = name.rsplit_once('.') else {
        return String::new();
    };
    if ext == "gz" {
        if let Some((_, inner)) = stem.rsplit_once('.') {
            return format!(".{inner}.gz");
        }
    }
    format!(".{ext}")
}

/// Local preconditions checked before any network traffic, returns the file size
pub fn check_local_file(path: &Path) -> Result<u64, UploadError> {
    let extension = file_extension(path);
    if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        warn!("Refusing to upload {}: unsupported type {extension:?}", path.display());
        return Err(UploadError::UnsupportedFileType { path: path.to_path_buf(), extension });
    }

    let metadata = fs::metadata(path).map_err(|_| UploadError::FileNotFound(path.to_path_buf()))?;
    if !metadata.is_file() || File::open(path).is_err() {
        return Err(UploadError::FileNotFound(path.to_path_buf()));
    }
    Ok(metadata.len())
}

/// Where a remote path came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Uploaded {
    /// Sent over the network during this call
    Fresh(String),
    /// Already in the ledger, nothing was sent
    Reused(String),
}

impl Uploaded {
    pub fn remote_path(&self) -> &str {
        match self {
            Uploaded::Fresh(path) | Uploaded::Reused(path) => path,
        }
    }
}

pub struct UploadCoordinator {
    transport: RetryingTransport,
    endpoint: String,
}

impl UploadCoordinator {
    pub fn new(transport: RetryingTransport, endpoint: &str) -> UploadCoordinator {
        UploadCoordinator { transport, endpoint: endpoint.to_string() }
    }

    /// Upload one file and return the server's remote path
    pub async fn upload(&self, local: &Path, prefix: Option<&str>) -> Result<String, UploadError> {
        let size = check_local_file(local)?;
        info!("Uploading {} ({:.1} MB) with prefix {:?}", local.display(), size as f64 / (1024.0 * 1024.0), prefix);

        let response = self
            .transport
            .send(&self.endpoint, Operation::Upload { file: local, prefix }, size)
            .await
            .map_err(|source| UploadError::Transport { path: local.to_path_buf(), source })?;

        let remote = response
            .json()
            .ok()
            .and_then(|v| v.get("upload_path").and_then(|p| p.as_str()).map(str::to_string))
            .filter(|p| !p.is_empty())
            .ok_or_else(|| UploadError::MalformedResponse { path: local.to_path_buf(), body: response.body.clone() })?;

        info!("Uploaded {} to {}", local.display(), remote);
        Ok(remote)
    }

    /// Upload unless the ledger already knows this file, recording new remote paths
    pub async fn upload_once(&self, local: &Path, prefix: Option<&str>, ledger: &mut UploadLedger) -> Result<Uploaded, UploadError> {
        if let Some(remote) = ledger.get(local) {
            info!("{} already uploaded to {}, reusing", local.display(), remote);
            return Ok(Uploaded::Reused(remote.to_string()));
        }
        let remote = self.upload(local, prefix).await?;
        ledger.record(local, remote.clone());
        Ok(Uploaded::Fresh(remote))
    }
}
