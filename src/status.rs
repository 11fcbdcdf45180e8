//! Task status checks, polling and rendering

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use log::{info, warn};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tinytemplate::TinyTemplate;

use crate::api::error::TransportError;
use crate::api::transport::{Operation, RetryingTransport, JSON_PAYLOAD_BYTES};
use crate::request::config::FileField;

/// Value left in example configs, never a real id
static PLACEHOLDER_ID: &str = "your_submission_id_here";

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("invalid submission id {0:?}")]
    InvalidSubmissionId(String),
    #[error("status check failed: {0}")]
    Transport(#[from] TransportError),
    #[error("status response is not JSON: {0}")]
    MalformedResponse(String),
    #[error("max_checks must be at least 1")]
    NoChecks,
    #[error("can't render status: {0}")]
    Render(#[from] tinytemplate::error::Error),
}

/// Processing state reported by the API
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskPhase {
    Created,
    Initialized,
    Running,
    Completed,
    Failed,
    Cancelled,
    Unknown(String),
}

impl TaskPhase {
    pub fn parse(raw: &str) -> TaskPhase {
        match raw {
            "CREATED" => TaskPhase::Created,
            "INITIALIZED" => TaskPhase::Initialized,
            "RUNNING" => TaskPhase::Running,
            "COMPLETED" => TaskPhase::Completed,
            "FAILED" => TaskPhase::Failed,
            "CANCELLED" => TaskPhase::Cancelled,
            other => TaskPhase::Unknown(other.to_string()),
        }
    }

    /// No further status changes are expected
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskPhase::Completed | TaskPhase::Failed | TaskPhase::Cancelled)
    }

    pub fn description(&self) -> String {
        match self {
            TaskPhase::Created => "Task has been created and is waiting to be processed".to_string(),
            TaskPhase::Initialized => "Task has been initialized and is being prepared for processing".to_string(),
            TaskPhase::Running => "Task is currently being processed by the analysis pipeline".to_string(),
            TaskPhase::Completed => "Task has been completed successfully".to_string(),
            TaskPhase::Failed => "Task processing failed - check error logs".to_string(),
            TaskPhase::Cancelled => "Task was cancelled by user or system".to_string(),
            TaskPhase::Unknown(raw) => format!("Unknown status: {raw}"),
        }
    }
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TaskPhase::Created => write!(f, "CREATED"),
            TaskPhase::Initialized => write!(f, "INITIALIZED"),
            TaskPhase::Running => write!(f, "RUNNING"),
            TaskPhase::Completed => write!(f, "COMPLETED"),
            TaskPhase::Failed => write!(f, "FAILED"),
            TaskPhase::Cancelled => write!(f, "CANCELLED"),
            TaskPhase::Unknown(raw) => write!(f, "{raw}"),
        }
    }
}

/// Status payload for one submission
///
/// The payload is kept as returned, typed accessors read the fields the client cares about.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskStatus {
    pub submission_id: String,
    pub phase: TaskPhase,
    pub payload: Value,
}

impl TaskStatus {
    pub fn from_json(submission_id: &str, payload: Value) -> TaskStatus {
        let phase = TaskPhase::parse(payload.get("status").and_then(Value::as_str).unwrap_or("UNKNOWN"));
        TaskStatus { submission_id: submission_id.to_string(), phase, payload }
    }

    pub fn field(&self, name: &str) -> Option<String> {
        match self.payload.get(name)? {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Render with the included status template
    pub fn render(&self) -> Result<String, StatusError> {
        /// included status template
        static STATUS: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/status.txt"));
        let mut tt = TinyTemplate::new();
        tt.set_default_formatter(&tinytemplate::format_unescaped);
        tt.add_template("status", STATUS)?;

        let or_na = |name: &str| self.field(name).unwrap_or_else(|| "N/A".to_string());
        let files = [
            ("Proband VCF", FileField::Vcf),
            ("Father VCF", FileField::Father),
            ("Mother VCF", FileField::Mother),
            ("Clinical File", FileField::Clinical),
            ("CNV File", FileField::Cnv),
        ]
        .iter()
        .map(|(label, field)| FileLine { label: label.to_string(), path: or_na(field.name()) })
        .collect();

        let context = StatusContext {
            submission_id: self.submission_id.clone(),
            status: self.phase.to_string(),
            description: self.phase.description(),
            task_id: or_na("task_id"),
            title: or_na("title"),
            project: or_na("project"),
            vcf_mode: or_na("vcf_mode"),
            assembly: or_na("assembly"),
            files,
            creation_time: or_na("creation_time"),
            version: or_na("version"),
            checked_at: Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        };
        Ok(tt.render("status", &context)?)
    }
}

/// Rendering context for status
#[derive(Serialize)]
struct StatusContext {
    submission_id: String,
    status: String,
    description: String,
    task_id: String,
    title: String,
    project: String,
    vcf_mode: String,
    assembly: String,
    files: Vec<FileLine>,
    creation_time: String,
    version: String,
    checked_at: String,
}

#[derive(Serialize)]
struct FileLine {
    label: String,
    path: String,
}

pub struct StatusChecker {
    transport: RetryingTransport,
    endpoint: String,
}

impl StatusChecker {
    pub fn new(transport: RetryingTransport, endpoint: &str) -> StatusChecker {
        StatusChecker { transport, endpoint: endpoint.to_string() }
    }

    pub async fn check(&self, submission_id: &str) -> Result<TaskStatus, StatusError> {
        let submission_id = submission_id.trim();
        if submission_id.is_empty() || submission_id == PLACEHOLDER_ID {
            return Err(StatusError::InvalidSubmissionId(submission_id.to_string()));
        }

        info!("Checking status of {submission_id}");
        let query = [("submission_id", submission_id)];
        let response = self.transport.send(&self.endpoint, Operation::GetJson { query: &query }, JSON_PAYLOAD_BYTES).await?;
        let payload = response.json().map_err(|_| StatusError::MalformedResponse(response.body.clone()))?;
        Ok(TaskStatus::from_json(submission_id, payload))
    }

    /// Poll until the task reaches a terminal phase or `max_checks` checks were made
    ///
    /// `on_check` sees every status along with whether the phase changed since the last check.
    pub async fn monitor<F>(&self, submission_id: &str, interval: Duration, max_checks: u32, mut on_check: F) -> Result<TaskStatus, StatusError>
    where
        F: FnMut(&TaskStatus, bool),
    {
        if max_checks == 0 {
            return Err(StatusError::NoChecks);
        }
        let mut last_phase: Option<TaskPhase> = None;
        let mut check = 1;

        loop {
            let status = self.check(submission_id).await?;
            let changed = last_phase.as_ref() != Some(&status.phase);
            info!("Check {check}/{max_checks}: {} is {}", submission_id, status.phase);
            on_check(&status, changed);
            last_phase = Some(status.phase.clone());

            if status.phase.is_terminal() {
                return Ok(status);
            }
            if check >= max_checks {
                warn!("Stopped monitoring {submission_id} after {max_checks} checks, last status {}", status.phase);
                return Ok(status);
            }
            tokio::time::sleep(interval).await;
            check += 1;
        }
    }
}
