use std::fmt;

use thiserror::Error;

/// HTTP status codes worth another attempt
pub static TRANSIENT_STATUS: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Why a single attempt failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    /// The server answered with a non-2xx status
    Status { status: u16, body: String },
    /// Connect, read or overall timeout elapsed
    Timeout(String),
    /// The connection couldn't be established
    Connect(String),
    /// Anything else: local I/O, malformed request or response
    Request(String),
}

impl AttemptFailure {
    /// Timeouts and a handful of status codes are transient, everything else fails fast
    pub fn is_transient(&self) -> bool {
        match self {
            AttemptFailure::Status { status, .. } => TRANSIENT_STATUS.contains(status),
            AttemptFailure::Timeout(_) | AttemptFailure::Connect(_) => true,
            AttemptFailure::Request(_) => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            AttemptFailure::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Server error message, read from a JSON `message` field when there is one
    pub fn server_message(&self) -> Option<String> {
        match self {
            AttemptFailure::Status { body, .. } => Some(
                serde_json::from_str::<serde_json::Value>(body)
                    .ok()
                    .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
                    .unwrap_or_else(|| body.clone()),
            ),
            _ => None,
        }
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AttemptFailure::Status { status, .. } => {
                write!(f, "HTTP {}: {}", status, self.server_message().unwrap_or_default())
            }
            AttemptFailure::Timeout(msg) => write!(f, "timeout: {msg}"),
            AttemptFailure::Connect(msg) => write!(f, "connection failed: {msg}"),
            AttemptFailure::Request(msg) => write!(f, "request failed: {msg}"),
        }
    }
}

/// A request that failed after the retry policy gave up
#[derive(Debug, Clone, Error)]
#[error("{cause} (after {attempts} attempt(s))")]
pub struct TransportError {
    pub attempts: u32,
    pub cause: AttemptFailure,
}
