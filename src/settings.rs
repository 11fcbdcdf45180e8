//! Runtime settings: API location, credentials and output locations

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use thiserror::Error;
use url::Url;

pub static DEFAULT_BASE_URL: &str = "https://vg-api.btgenomics.com:8082/api/";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("token file not found: {0}")]
    TokenNotFound(PathBuf),
    #[error("token file is empty: {0}")]
    EmptyToken(PathBuf),
    #[error("can't read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("invalid API URL {url}: {source}")]
    InvalidUrl { url: String, source: url::ParseError },
    #[error("task config {path} is not valid JSON: {source}")]
    JsonDecode { path: PathBuf, source: serde_json::Error },
    #[error("task config {path} fails schema validation: {}", .errors.join("; "))]
    Schema { path: PathBuf, errors: Vec<String> },
    #[error("task config {path} can't be deserialised: {source}")]
    Deserialisation { path: PathBuf, source: serde_json::Error },
    #[error("embedded task config schema is invalid: {0}")]
    BadSchema(String),
}

/// Names of the three endpoints, relative to the base URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub upload: String,
    pub create_task: String,
    pub status: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Endpoints {
            upload: "upload".to_string(),
            create_task: "createtask".to_string(),
            status: "getstatus".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub base_url: Url,
    pub endpoints: Endpoints,
    pub token: String,
    /// Where batch ledgers are written
    pub output_dir: PathBuf,
    /// Prefix for relative manifest paths
    pub data_dir: Option<PathBuf>,
}

impl Settings {
    pub fn new(base_url: &str, token_path: &Path, output_dir: PathBuf, data_dir: Option<PathBuf>) -> Result<Settings, ConfigError> {
        let base_url = parse_base_url(base_url)?;
        let token = read_token(token_path)?;
        info!("API base URL is {}", base_url);
        Ok(Settings { base_url, endpoints: Endpoints::default(), token, output_dir, data_dir })
    }
}

/// Parse the base URL, making sure relative endpoint joins keep the last path segment
pub fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let normalised = match raw.ends_with('/') {
        true => raw.to_string(),
        false => format!("{raw}/"),
    };
    Url::parse(&normalised).map_err(|source| ConfigError::InvalidUrl { url: raw.to_string(), source })
}

/// Read a bearer token from a text file, ignoring surrounding whitespace
pub fn read_token(path: &Path) -> Result<String, ConfigError> {
    if !path.exists() {
        warn!("Can't find token file at {}", path.display());
        return Err(ConfigError::TokenNotFound(path.to_path_buf()));
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
    let token = raw.trim();
    if token.is_empty() {
        return Err(ConfigError::EmptyToken(path.to_path_buf()));
    }
    info!("Token loaded from {}", path.display());
    Ok(token.to_string())
}
