use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use serde_json::Value;

use crate::api::client::{ApiClient, ApiResponse, Timeouts};
use crate::api::error::{AttemptFailure, TransportError};

/// Files at or above this size get the long timeout profile
pub static LARGE_FILE_BYTES: u64 = 100 * 1024 * 1024;

/// Sizing hint for JSON requests, always well under the large file threshold
pub static JSON_PAYLOAD_BYTES: u64 = 4 * 1024;

/// Pick timeouts from the payload size
///
/// | payload     | connect | read   | overall |
/// | ----------- | ------- | ------ | ------- |
/// | < 100 MiB   | 30s     | 5 min  | none    |
/// | >= 100 MiB  | 30s     | 10 min | 15 min  |
pub fn timeouts_for(size_bytes: u64) -> Timeouts {
    match size_bytes >= LARGE_FILE_BYTES {
        true => Timeouts {
            connect: Duration::from_secs(30),
            read: Duration::from_secs(10 * 60),
            overall: Some(Duration::from_secs(15 * 60)),
        },
        false => Timeouts {
            connect: Duration::from_secs(30),
            read: Duration::from_secs(5 * 60),
            overall: None,
        },
    }
}

/// Bounded exponential backoff without jitter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Multiplied by 2^n after attempt n
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy { max_attempts: 3, backoff_unit: Duration::from_secs(1) }
    }
}

impl RetryPolicy {
    /// Delay between attempt `attempt` (1-based) and the next one
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff_unit.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// The single HTTP operation being retried
#[derive(Debug, Clone, Copy)]
pub enum Operation<'a> {
    Upload { file: &'a Path, prefix: Option<&'a str> },
    PostJson { body: &'a Value },
    GetJson { query: &'a [(&'a str, &'a str)] },
}

/// Wraps an [ApiClient] with the size aware timeout policy and transient failure retries
///
/// Stateless across calls, clones share the underlying client.
#[derive(Clone)]
pub struct RetryingTransport {
    client: Arc<dyn ApiClient>,
    policy: RetryPolicy,
}

impl RetryingTransport {
    pub fn new(client: Arc<dyn ApiClient>) -> RetryingTransport {
        RetryingTransport { client, policy: RetryPolicy::default() }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Send `operation` to `endpoint`, retrying transient failures
    ///
    /// Non-2xx responses become [AttemptFailure::Status]. Only the final failure is returned,
    /// along with the number of attempts made.
    pub async fn send(&self, endpoint: &str, operation: Operation<'_>, size_bytes: u64) -> Result<ApiResponse, TransportError> {
        let timeouts = timeouts_for(size_bytes);
        let mut attempt: u32 = 1;

        loop {
            let outcome = self.attempt(endpoint, operation, timeouts).await;
            let failure = match outcome {
                Ok(response) => {
                    if attempt > 1 {
                        info!("{endpoint} succeeded on attempt {attempt}");
                    }
                    return Ok(response);
                }
                Err(failure) => failure,
            };

            if !failure.is_transient() {
                warn!("{endpoint} failed (not retried): {failure}");
                return Err(TransportError { attempts: attempt, cause: failure });
            }
            if attempt >= self.policy.max_attempts {
                warn!("{endpoint} failed, giving up after {attempt} attempts: {failure}");
                return Err(TransportError { attempts: attempt, cause: failure });
            }

            let delay = self.policy.delay_after(attempt);
            warn!("{endpoint} attempt {attempt}/{} failed: {failure}, retrying in {delay:?}", self.policy.max_attempts);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn attempt(&self, endpoint: &str, operation: Operation<'_>, timeouts: Timeouts) -> Result<ApiResponse, AttemptFailure> {
        let response = match operation {
            Operation::Upload { file, prefix } => self.client.upload(endpoint, file, prefix, timeouts).await?,
            Operation::PostJson { body } => self.client.post_json(endpoint, body, timeouts).await?,
            Operation::GetJson { query } => self.client.get_json(endpoint, query, timeouts).await?,
        };

        match response.is_success() {
            true => Ok(response),
            false => Err(AttemptFailure::Status { status: response.status, body: response.body }),
        }
    }
}
