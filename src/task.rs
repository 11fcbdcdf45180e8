//! Task creation from a validated configuration and the upload ledger

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::api::error::TransportError;
use crate::api::transport::{Operation, RetryingTransport, JSON_PAYLOAD_BYTES};
use crate::request::config::FileField;
use crate::request::validate::ValidTask;
use crate::upload::UploadLedger;

/// Server messages that mean the title and project pair was already submitted
static DUPLICATE_MARKERS: [&str; 2] = ["already been submitted", "already exists"];

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0} has no uploaded remote path")]
    MissingUpload(FileField),
    #[error("task {title:?} in project {project:?} has already been submitted")]
    DuplicateTask { title: String, project: String },
    #[error("task creation failed: {0}")]
    Transport(TransportError),
    #[error("task creation returned no submission_id: {0}")]
    MalformedResponse(String),
}

impl TaskError {
    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::MissingUpload(_) => "MissingUpload",
            TaskError::DuplicateTask { .. } => "DuplicateTask",
            TaskError::Transport(_) => "TransportError",
            TaskError::MalformedResponse(_) => "MalformedResponse",
        }
    }
}

/// Outcome of one task creation request, as written to `task_results.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub vcf_mode: String,
}

impl TaskResult {
    pub fn submitted(title: &str, vcf_mode: &str, submission_id: String) -> TaskResult {
        TaskResult { title: title.to_string(), submission_id: Some(submission_id), error: None, vcf_mode: vcf_mode.to_string() }
    }

    pub fn failed(title: &str, vcf_mode: &str, error: String) -> TaskResult {
        TaskResult { title: title.to_string(), submission_id: None, error: Some(error), vcf_mode: vcf_mode.to_string() }
    }

    pub fn is_success(&self) -> bool {
        self.submission_id.is_some()
    }
}

pub struct TaskCoordinator {
    transport: RetryingTransport,
    endpoint: String,
}

impl TaskCoordinator {
    pub fn new(transport: RetryingTransport, endpoint: &str) -> TaskCoordinator {
        TaskCoordinator { transport, endpoint: endpoint.to_string() }
    }

    /// Submit a task and return its submission id
    pub async fn create_task(&self, task: &ValidTask<'_>, ledger: &UploadLedger) -> Result<String, TaskError> {
        let body = request_body(task, ledger)?;
        info!("Creating {} task {} ({})", task.mode, task.config.title, task.assembly);

        let response = match self.transport.send(&self.endpoint, Operation::PostJson { body: &body }, JSON_PAYLOAD_BYTES).await {
            Ok(response) => response,
            Err(err) if is_duplicate(&err) => {
                warn!("Task {} was already submitted", task.config.title);
                return Err(TaskError::DuplicateTask { title: task.config.title.clone(), project: task.config.project.clone() });
            }
            Err(err) => return Err(TaskError::Transport(err)),
        };

        let submission_id = response
            .json()
            .ok()
            .and_then(|v| v.get("submission_id").and_then(submission_id_string))
            .filter(|id| !id.is_empty())
            .ok_or_else(|| TaskError::MalformedResponse(response.body.clone()))?;

        info!("Task {} created: {}", task.config.title, submission_id);
        Ok(submission_id)
    }
}

/// Build the createtask JSON body, substituting remote paths for every local file field
pub fn request_body(task: &ValidTask<'_>, ledger: &UploadLedger) -> Result<Value, TaskError> {
    let config = task.config;
    let mut body = Map::new();
    body.insert("title".to_string(), json!(config.title));
    body.insert("project".to_string(), json!(config.project));
    body.insert("vcf_mode".to_string(), json!(task.mode.to_string()));
    body.insert("assembly".to_string(), json!(task.assembly.to_string()));
    if let Some(text) = config.clinical_text() {
        body.insert("clinical_info".to_string(), json!(text));
    }

    for (field, local) in config.files() {
        let remote = ledger.get(local).ok_or(TaskError::MissingUpload(field))?;
        body.insert(field.name().to_string(), json!(remote));
    }

    Ok(Value::Object(body))
}

fn is_duplicate(err: &TransportError) -> bool {
    if err.cause.status() == Some(409) {
        return true;
    }
    err.cause
        .server_message()
        .map(|message| {
            let message = message.to_lowercase();
            DUPLICATE_MARKERS.iter().any(|marker| message.contains(marker))
        })
        .unwrap_or(false)
}

/// Submission ids are opaque, accept numbers as well as strings
fn submission_id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}
